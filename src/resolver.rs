// Reverse DNS for remote peers. Lookups run on worker threads; the capture path
// only ever touches the cache and a non-blocking queue.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::ResolutionError;

/// Maps an address to a hostname.
pub trait HostResolver: Send + Sync {
    fn resolve(&self, ip: IpAddr) -> Result<String, ResolutionError>;
}

/// Blocking name lookup used by the resolver workers.
pub type LookupFn = Arc<dyn Fn(IpAddr) -> Option<String> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub workers: usize,
    pub lookup_timeout: Duration,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    pub queue_capacity: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            lookup_timeout: Duration::from_secs(2),
            cache_ttl: Duration::from_secs(300),
            cache_capacity: 10_000,
            queue_capacity: 256,
        }
    }
}

/// Aggregate outcome counters; per-lookup failures are only ever counted here.
#[derive(Debug, Default)]
pub struct ResolverStats {
    hits: AtomicU64,
    misses: AtomicU64,
    resolved: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolverStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub resolved: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub dropped: u64,
}

impl ResolverStats {
    pub fn snapshot(&self) -> ResolverStatsSnapshot {
        ResolverStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
enum Entry {
    /// First lookup queued; no answer yet.
    Pending,
    Resolved {
        outcome: Result<String, ResolutionError>,
        at: Instant,
    },
    /// Expired answer, still served while a fresh lookup is queued.
    Refreshing {
        outcome: Result<String, ResolutionError>,
    },
}

impl Entry {
    fn in_flight(&self) -> bool {
        matches!(self, Entry::Pending | Entry::Refreshing { .. })
    }
}

struct Cache {
    entries: HashMap<IpAddr, Entry>,
    ttl: Duration,
    capacity: usize,
}

impl Cache {
    /// Insert, evicting expired then oldest answers when full. Entries with a
    /// lookup in flight are never evicted and are always admitted; there are at
    /// most `queue_capacity + workers` of them.
    fn insert(&mut self, ip: IpAddr, entry: Entry) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&ip) {
            let ttl = self.ttl;
            self.entries.retain(|_, e| match e {
                Entry::Resolved { at, .. } => at.elapsed() < ttl,
                _ => true,
            });
            if self.entries.len() >= self.capacity {
                let oldest = self
                    .entries
                    .iter()
                    .filter_map(|(k, e)| match e {
                        Entry::Resolved { at, .. } => Some((*k, *at)),
                        _ => None,
                    })
                    .min_by_key(|(_, at)| *at)
                    .map(|(k, _)| k);
                match oldest {
                    Some(k) => {
                        self.entries.remove(&k);
                    }
                    None if !entry.in_flight() => return,
                    None => {}
                }
            }
        }
        self.entries.insert(ip, entry);
    }
}

/// Cache-fronted reverse DNS resolver.
///
/// `resolve` never blocks on the network: a miss queues the address for a
/// worker and reports [`ResolutionError::Pending`]. Workers bound each lookup
/// with `lookup_timeout`; a timeout is cached exactly like a failed lookup.
pub struct ReverseDnsResolver {
    cache: Arc<Mutex<Cache>>,
    query_tx: mpsc::SyncSender<IpAddr>,
    stats: Arc<ResolverStats>,
    _workers: Vec<thread::JoinHandle<()>>,
}

impl ReverseDnsResolver {
    /// Resolver backed by the system's reverse lookup (`getnameinfo`).
    pub fn new(config: ResolverConfig) -> std::io::Result<Self> {
        Self::with_lookup(
            config,
            Arc::new(|ip: IpAddr| dns_lookup::lookup_addr(&ip).ok()),
        )
    }

    /// Resolver with a custom blocking lookup (tests, alternative backends).
    pub fn with_lookup(config: ResolverConfig, lookup: LookupFn) -> std::io::Result<Self> {
        let (query_tx, query_rx) = mpsc::sync_channel::<IpAddr>(config.queue_capacity.max(1));
        let query_rx = Arc::new(Mutex::new(query_rx));
        let cache = Arc::new(Mutex::new(Cache {
            entries: HashMap::new(),
            ttl: config.cache_ttl,
            capacity: config.cache_capacity.max(1),
        }));
        let stats = Arc::new(ResolverStats::default());

        let mut workers = Vec::with_capacity(config.workers.max(1));
        for i in 0..config.workers.max(1) {
            let rx = query_rx.clone();
            let cache = cache.clone();
            let stats = stats.clone();
            let lookup = lookup.clone();
            let timeout = config.lookup_timeout;
            let h = thread::Builder::new()
                .name(format!("netmon-rdns-{i}"))
                .spawn(move || rdns_worker(rx, cache, stats, lookup, timeout))?;
            workers.push(h);
        }

        Ok(Self {
            cache,
            query_tx,
            stats,
            _workers: workers,
        })
    }

    pub fn stats(&self) -> ResolverStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn shared_stats(&self) -> Arc<ResolverStats> {
        self.stats.clone()
    }
}

impl HostResolver for ReverseDnsResolver {
    fn resolve(&self, ip: IpAddr) -> Result<String, ResolutionError> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        let ttl = cache.ttl;
        let (cached, fresh) = match cache.entries.get(&ip) {
            Some(Entry::Pending) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Err(ResolutionError::Pending(ip));
            }
            Some(Entry::Refreshing { outcome }) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return outcome.clone();
            }
            Some(Entry::Resolved { outcome, at }) => (Some(outcome.clone()), at.elapsed() < ttl),
            None => (None, false),
        };
        if fresh && let Some(outcome) = cached {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return outcome;
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        let queued = self.query_tx.try_send(ip).is_ok();
        if !queued {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        }
        match cached {
            // Expired: keep answering with the old outcome until the new one lands.
            Some(stale) => {
                if queued {
                    cache.entries.insert(
                        ip,
                        Entry::Refreshing {
                            outcome: stale.clone(),
                        },
                    );
                }
                stale
            }
            None if queued => {
                cache.insert(ip, Entry::Pending);
                Err(ResolutionError::Pending(ip))
            }
            None => Err(ResolutionError::QueueFull(ip)),
        }
    }
}

/// Worker thread: pulls queued addresses, resolves them with a bounded wait and
/// records the outcome. Exits when the resolver (query sender) is dropped.
fn rdns_worker(
    rx: Arc<Mutex<mpsc::Receiver<IpAddr>>>,
    cache: Arc<Mutex<Cache>>,
    stats: Arc<ResolverStats>,
    lookup: LookupFn,
    timeout: Duration,
) {
    loop {
        let next = {
            let rx = rx.lock().unwrap_or_else(PoisonError::into_inner);
            rx.recv()
        };
        let Ok(ip) = next else {
            return;
        };
        let outcome = match resolve_with_timeout(ip, &lookup, timeout) {
            Ok(Some(name)) if !name.is_empty() && name != ip.to_string() => {
                stats.resolved.fetch_add(1, Ordering::Relaxed);
                Ok(name)
            }
            Ok(_) => {
                stats.failures.fetch_add(1, Ordering::Relaxed);
                Err(ResolutionError::NotFound(ip))
            }
            Err(e) => {
                stats.timeouts.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        };
        let mut cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.insert(
            ip,
            Entry::Resolved {
                outcome,
                at: Instant::now(),
            },
        );
    }
}

/// Run the blocking lookup on a short-lived thread and wait at most `timeout`.
/// A lookup that outlives the wait finishes in the background and is discarded.
fn resolve_with_timeout(
    ip: IpAddr,
    lookup: &LookupFn,
    timeout: Duration,
) -> Result<Option<String>, ResolutionError> {
    let (tx, rx) = mpsc::sync_channel(1);
    let lookup = lookup.clone();
    let spawned = thread::Builder::new()
        .name("netmon-rdns-query".into())
        .spawn(move || {
            let _ = tx.send(lookup(ip));
        });
    match spawned {
        Ok(_) => rx
            .recv_timeout(timeout)
            .map_err(|_| ResolutionError::Timeout(ip)),
        Err(_) => Ok(None),
    }
}
