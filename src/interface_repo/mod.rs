// Interface enumeration and OS byte counters via sysinfo

mod linux;

use crate::models::{InterfaceInfo, RawCounterDelta};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::Networks;
use tracing::instrument;

pub struct InterfaceRepo {
    networks: Arc<std::sync::Mutex<Networks>>,
}

impl Default for InterfaceRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl InterfaceRepo {
    pub fn new() -> Self {
        Self {
            networks: Arc::new(std::sync::Mutex::new(Networks::new_with_refreshed_list())),
        }
    }

    #[instrument(skip(self), fields(repo = "interfaces", operation = "list_interfaces"))]
    pub async fn list_interfaces(&self) -> anyhow::Result<Vec<InterfaceInfo>> {
        let networks = self.networks.clone();
        tokio::task::spawn_blocking(move || {
            let mut networks_guard = networks
                .lock()
                .map_err(|e| anyhow::anyhow!("sysinfo networks lock poisoned: {}", e))?;
            networks_guard.refresh(true);
            let mut interfaces: Vec<InterfaceInfo> = networks_guard
                .list()
                .iter()
                .map(|(name, data)| {
                    let addrs: Vec<_> = data.ip_networks().iter().map(|n| n.addr).collect();
                    InterfaceInfo {
                        name: name.clone(),
                        mac_address: data.mac_address().to_string(),
                        is_up: linux::read_is_up(name).unwrap_or(!addrs.is_empty()),
                        addrs,
                        speed: linux::get_interface_speed(name),
                    }
                })
                .collect();
            interfaces.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(interfaces)
        })
        .await
        .map_err(|e| anyhow::anyhow!("sysinfo task join: {}", e))?
    }

    /// Cumulative (sent, received) byte counters per interface.
    async fn read_totals(&self) -> anyhow::Result<BTreeMap<String, (u64, u64)>> {
        let networks = self.networks.clone();
        tokio::task::spawn_blocking(move || {
            let mut networks_guard = networks
                .lock()
                .map_err(|e| anyhow::anyhow!("sysinfo networks lock poisoned: {}", e))?;
            networks_guard.refresh(true);
            Ok(networks_guard
                .list()
                .iter()
                .map(|(name, data)| {
                    (
                        name.clone(),
                        (data.total_transmitted(), data.total_received()),
                    )
                })
                .collect())
        })
        .await
        .map_err(|e| anyhow::anyhow!("sysinfo task join: {}", e))?
    }

    /// OS-level bytes sent/received per interface over `window`.
    #[instrument(skip(self), fields(repo = "interfaces", operation = "sample_counter_deltas"))]
    pub async fn sample_counter_deltas(
        &self,
        window: Duration,
    ) -> anyhow::Result<BTreeMap<String, RawCounterDelta>> {
        let before = self.read_totals().await?;
        tokio::time::sleep(window).await;
        let after = self.read_totals().await?;
        Ok(counter_deltas(&before, &after))
    }
}

/// Per-interface difference of two counter readings. Interfaces missing from
/// either reading are skipped; counter resets yield 0 rather than wrapping.
pub fn counter_deltas(
    before: &BTreeMap<String, (u64, u64)>,
    after: &BTreeMap<String, (u64, u64)>,
) -> BTreeMap<String, RawCounterDelta> {
    after
        .iter()
        .filter_map(|(name, &(sent, recv))| {
            let &(prev_sent, prev_recv) = before.get(name)?;
            Some((
                name.clone(),
                RawCounterDelta {
                    bytes_sent: sent.saturating_sub(prev_sent),
                    bytes_received: recv.saturating_sub(prev_recv),
                },
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deltas_skip_new_interfaces_and_clamp_resets() {
        let before = BTreeMap::from([
            ("eth0".to_string(), (100, 1000)),
            ("wlan0".to_string(), (500, 500)),
        ]);
        let after = BTreeMap::from([
            ("eth0".to_string(), (150, 1800)),
            ("wlan0".to_string(), (10, 600)),
            ("tun0".to_string(), (5, 5)),
        ]);
        let d = counter_deltas(&before, &after);
        assert_eq!(d.len(), 2);
        assert_eq!(
            d["eth0"],
            RawCounterDelta {
                bytes_sent: 50,
                bytes_received: 800
            }
        );
        assert_eq!(d["wlan0"].bytes_sent, 0);
        assert_eq!(d["wlan0"].bytes_received, 100);
    }
}
