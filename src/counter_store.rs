// Shared per-interface traffic counters.
// Writers: capture threads (increment). Readers: scheduler (snapshot_and_reset), HTTP (peek).

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError, RwLock};

use crate::models::{ClassificationCounters, ClassificationEvent, Direction};

#[derive(Debug, Default)]
struct Slot {
    /// Traffic since the last snapshot.
    window: ClassificationCounters,
    /// Traffic since startup; never reset.
    lifetime: ClassificationCounters,
}

/// Concurrently updated counter table keyed by interface name.
///
/// The table itself is behind an `RwLock` that is only write-locked to add an
/// interface; each interface has its own `Mutex`, held just long enough to add
/// to or swap out its counters. A snapshot therefore never stalls capture on
/// other interfaces, and every increment lands either before or after the swap.
#[derive(Debug, Default)]
pub struct InterfaceCounterStore {
    slots: RwLock<HashMap<String, Mutex<Slot>>>,
}

impl InterfaceCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with zeroed counters for every given interface.
    pub fn with_interfaces<I, S>(interfaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let slots = interfaces
            .into_iter()
            .map(|name| (name.into(), Mutex::new(Slot::default())))
            .collect();
        Self {
            slots: RwLock::new(slots),
        }
    }

    /// Credit `byte_len` bytes to `interface`. Inbound ad traffic also counts
    /// towards `ad_bytes_received`, in the same critical section.
    pub fn increment(&self, interface: &str, direction: Direction, byte_len: u64, is_ad: bool) {
        {
            let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = slots.get(interface) {
                let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
                slot.window.add(direction, byte_len, is_ad);
                slot.lifetime.add(direction, byte_len, is_ad);
                return;
            }
        }
        // Interface appeared after startup.
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.entry(interface.to_string()).or_default();
        let slot = slot.get_mut().unwrap_or_else(PoisonError::into_inner);
        slot.window.add(direction, byte_len, is_ad);
        slot.lifetime.add(direction, byte_len, is_ad);
    }

    pub fn apply(&self, event: &ClassificationEvent) {
        self.increment(
            &event.interface,
            event.direction,
            event.byte_len,
            event.destination_is_ad,
        );
    }

    /// Return every interface's counters accumulated since the previous call and
    /// zero them. Interfaces are kept (with zero counters) for the next window.
    pub fn snapshot_and_reset(&self) -> BTreeMap<String, ClassificationCounters> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots
            .iter()
            .map(|(name, slot)| {
                let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
                (name.clone(), std::mem::take(&mut slot.window))
            })
            .collect()
    }

    /// Current window counters, without resetting them.
    pub fn peek(&self) -> BTreeMap<String, ClassificationCounters> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots
            .iter()
            .map(|(name, slot)| {
                let slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
                (name.clone(), slot.window)
            })
            .collect()
    }

    /// Per-interface totals since startup.
    pub fn lifetime(&self) -> BTreeMap<String, ClassificationCounters> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots
            .iter()
            .map(|(name, slot)| {
                let slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
                (name.clone(), slot.lifetime)
            })
            .collect()
    }

    /// Process-wide totals since startup.
    pub fn lifetime_totals(&self) -> ClassificationCounters {
        let mut total = ClassificationCounters::default();
        for counters in self.lifetime().values() {
            total.merge(counters);
        }
        total
    }

    pub fn interfaces(&self) -> Vec<String> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = slots.keys().cloned().collect();
        names.sort();
        names
    }
}

/// `100 * ad / received` over all interfaces; `0.0` when nothing was received.
pub fn ad_traffic_percent(counters: &BTreeMap<String, ClassificationCounters>) -> f64 {
    let (ad, received) = counters.values().fold((0u128, 0u128), |(ad, rx), c| {
        (ad + c.ad_bytes_received as u128, rx + c.bytes_received as u128)
    });
    if received == 0 {
        return 0.0;
    }
    100.0 * ad as f64 / received as f64
}
