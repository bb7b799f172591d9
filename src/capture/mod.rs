// Live packet capture. One OS thread per interface reads frames, classifies them
// and credits the shared counter store. Threads poll a cancel flag between reads,
// so stop() takes effect within one source read timeout.

mod pnet_source;

pub use pnet_source::{PnetSource, open_sources};

use std::io;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use serde::Serialize;

use crate::classifier::{CapturedFrame, LinkType, TrafficClassifier};
use crate::counter_store::InterfaceCounterStore;
use crate::error::CaptureError;

/// Consecutive read errors tolerated before an interface is given up on.
const MAX_CONSECUTIVE_READ_ERRORS: u32 = 10;
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Something that yields raw link-layer frames.
pub trait PacketSource: Send {
    /// Next frame, or `Ok(None)` when the read timed out without traffic.
    fn next_frame(&mut self) -> io::Result<Option<&[u8]>>;
}

/// An opened source together with the interface it reads from.
pub struct CaptureSource {
    pub interface: String,
    pub link_type: LinkType,
    pub local_mac: Option<pnet::util::MacAddr>,
    pub local_addrs: Vec<IpAddr>,
    pub source: Box<dyn PacketSource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum CaptureState {
    Idle,
    Capturing,
    Stopped,
}

impl CaptureState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => CaptureState::Idle,
            1 => CaptureState::Capturing,
            _ => CaptureState::Stopped,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureStats {
    pub frames: u64,
    pub classified: u64,
    pub ignored: u64,
    pub read_errors: u64,
}

#[derive(Default)]
struct Shared {
    state: AtomicU8,
    cancel: AtomicBool,
    active: AtomicUsize,
    frames: AtomicU64,
    classified: AtomicU64,
    ignored: AtomicU64,
    read_errors: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl Shared {
    fn set_state(&self, state: CaptureState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: CaptureState, to: CaptureState) -> Result<(), CaptureState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(CaptureState::from_u8)
    }
}

/// Capture engine: `Idle -> Capturing -> Stopped`.
pub struct PacketCaptureEngine {
    classifier: Arc<TrafficClassifier>,
    store: Arc<InterfaceCounterStore>,
    shared: Arc<Shared>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl PacketCaptureEngine {
    pub fn new(classifier: Arc<TrafficClassifier>, store: Arc<InterfaceCounterStore>) -> Self {
        Self {
            classifier,
            store,
            shared: Arc::new(Shared::default()),
            threads: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> CaptureState {
        CaptureState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames: self.shared.frames.load(Ordering::Relaxed),
            classified: self.shared.classified.load(Ordering::Relaxed),
            ignored: self.shared.ignored.load(Ordering::Relaxed),
            read_errors: self.shared.read_errors.load(Ordering::Relaxed),
        }
    }

    /// Last fatal capture error, if any interface gave up.
    pub fn last_error(&self) -> Option<String> {
        self.shared
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Start one capture thread per source. Only valid from `Idle`; an engine
    /// is started at most once.
    pub fn start(&self, sources: Vec<CaptureSource>) -> Result<(), CaptureError> {
        self.shared
            .transition(CaptureState::Idle, CaptureState::Capturing)
            .map_err(CaptureError::NotIdle)?;
        if sources.is_empty() {
            self.shared.set_state(CaptureState::Stopped);
            return Err(CaptureError::NoInterfaces);
        }

        let mut threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
        // Count every thread up front so an early exit cannot report Stopped
        // while later interfaces are still being started.
        self.shared.active.store(sources.len(), Ordering::Release);
        for source in sources {
            let interface = source.interface.clone();
            let shared = self.shared.clone();
            let classifier = self.classifier.clone();
            let store = self.store.clone();
            let spawned = thread::Builder::new()
                .name(format!("netmon-capture-{interface}"))
                .spawn(move || capture_loop(source, &classifier, &store, &shared));
            match spawned {
                Ok(h) => threads.push(h),
                Err(e) => {
                    tracing::error!(interface = %interface, error = %e, "failed to spawn capture thread");
                    finish(&self.shared);
                }
            }
        }
        tracing::info!(interfaces = threads.len(), "packet capture started");
        Ok(())
    }

    /// Request cancellation; threads exit after their current read returns.
    pub fn stop(&self) {
        self.shared.cancel.store(true, Ordering::Release);
        let _ = self
            .shared
            .transition(CaptureState::Idle, CaptureState::Stopped);
    }

    /// Wait for every capture thread to exit (blocking).
    pub fn join(&self) {
        let threads: Vec<_> = self
            .threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for h in threads {
            let _ = h.join();
        }
    }
}

/// Marks one capture thread finished; the last one moves the engine to `Stopped`.
fn finish(shared: &Shared) {
    if shared.active.fetch_sub(1, Ordering::AcqRel) == 1 {
        shared.set_state(CaptureState::Stopped);
        tracing::debug!("packet capture stopped");
    }
}

fn capture_loop(
    mut source: CaptureSource,
    classifier: &TrafficClassifier,
    store: &InterfaceCounterStore,
    shared: &Shared,
) {
    let mut consecutive_errors = 0u32;
    while !shared.cancel.load(Ordering::Acquire) {
        match source.source.next_frame() {
            Ok(Some(data)) => {
                consecutive_errors = 0;
                shared.frames.fetch_add(1, Ordering::Relaxed);
                let frame = CapturedFrame {
                    interface: &source.interface,
                    link_type: source.link_type,
                    local_mac: source.local_mac,
                    local_addrs: &source.local_addrs,
                    data,
                };
                match classifier.classify(&frame) {
                    Some(event) => {
                        store.apply(&event);
                        shared.classified.fetch_add(1, Ordering::Relaxed);
                    }
                    None => {
                        shared.ignored.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            Ok(None) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                shared.read_errors.fetch_add(1, Ordering::Relaxed);
                consecutive_errors += 1;
                if consecutive_errors >= MAX_CONSECUTIVE_READ_ERRORS {
                    let err = CaptureError::Device {
                        interface: source.interface.clone(),
                        source: e,
                    };
                    tracing::error!(error = %err, "packet capture stopped for interface");
                    *shared
                        .last_error
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner) = Some(err.to_string());
                    break;
                }
                thread::sleep(READ_ERROR_BACKOFF);
            }
        }
    }
    finish(shared);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocklist::BlocklistMatcher;
    use crate::classifier::tests::{StaticResolver, ipv4_frame};
    use std::collections::{HashMap, VecDeque};
    use std::net::Ipv4Addr;
    use std::time::Instant;

    /// Replays canned reads, then idles like a quiet link.
    struct ScriptedSource {
        reads: VecDeque<io::Result<Vec<u8>>>,
        current: Vec<u8>,
        endless_error: Option<io::ErrorKind>,
    }

    impl PacketSource for ScriptedSource {
        fn next_frame(&mut self) -> io::Result<Option<&[u8]>> {
            match self.reads.pop_front() {
                Some(Ok(frame)) => {
                    self.current = frame;
                    Ok(Some(&self.current))
                }
                Some(Err(e)) => Err(e),
                None => {
                    if let Some(kind) = self.endless_error {
                        return Err(io::Error::new(kind, "device gone"));
                    }
                    thread::sleep(Duration::from_millis(1));
                    Ok(None)
                }
            }
        }
    }

    const LOCAL: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 10);
    const AD: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 5);
    const OTHER: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 8);

    fn engine() -> (PacketCaptureEngine, Arc<InterfaceCounterStore>) {
        let names = HashMap::from([(IpAddr::V4(AD), "pagead.doubleclick.net".to_string())]);
        let classifier = TrafficClassifier::new(
            Arc::new(BlocklistMatcher::from_rules(["||doubleclick.net^"])),
            Arc::new(StaticResolver(names)),
        );
        let store = Arc::new(InterfaceCounterStore::with_interfaces(["eth0"]));
        (
            PacketCaptureEngine::new(Arc::new(classifier), store.clone()),
            store,
        )
    }

    fn source(reads: Vec<io::Result<Vec<u8>>>, endless_error: Option<io::ErrorKind>) -> CaptureSource {
        CaptureSource {
            interface: "eth0".into(),
            link_type: LinkType::Ethernet,
            local_mac: None,
            local_addrs: vec![IpAddr::V4(LOCAL)],
            source: Box::new(ScriptedSource {
                reads: reads.into(),
                current: Vec::new(),
                endless_error,
            }),
        }
    }

    fn wait_until(mut f: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !f() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn captured_frames_reach_the_store() {
        let (engine, store) = engine();
        assert_eq!(engine.state(), CaptureState::Idle);
        let mut arp = vec![0u8; 42];
        arp[12] = 0x08;
        arp[13] = 0x06;
        engine
            .start(vec![source(
                vec![
                    Ok(ipv4_frame(AD, LOCAL, 200)),
                    Ok(ipv4_frame(OTHER, LOCAL, 800)),
                    Ok(ipv4_frame(LOCAL, OTHER, 100)),
                    Ok(arp),
                ],
                None,
            )])
            .unwrap();
        assert_eq!(engine.state(), CaptureState::Capturing);
        wait_until(|| engine.stats().frames == 4);

        engine.stop();
        engine.join();
        assert_eq!(engine.state(), CaptureState::Stopped);

        let stats = engine.stats();
        assert_eq!(stats.classified, 3);
        assert_eq!(stats.ignored, 1);
        let eth0 = store.snapshot_and_reset()["eth0"];
        assert_eq!(eth0.bytes_received, 1000);
        assert_eq!(eth0.ad_bytes_received, 200);
        assert_eq!(eth0.bytes_sent, 100);
    }

    #[test]
    fn transient_read_errors_are_recovered() {
        let (engine, store) = engine();
        engine
            .start(vec![source(
                vec![
                    Err(io::Error::other("glitch")),
                    Ok(ipv4_frame(OTHER, LOCAL, 64)),
                ],
                None,
            )])
            .unwrap();
        wait_until(|| engine.stats().frames == 1);
        engine.stop();
        engine.join();
        assert_eq!(engine.stats().read_errors, 1);
        assert!(engine.last_error().is_none());
        assert_eq!(store.peek()["eth0"].bytes_received, 64);
    }

    #[test]
    fn persistent_errors_stop_the_engine() {
        let (engine, _store) = engine();
        engine
            .start(vec![source(vec![], Some(io::ErrorKind::NotFound))])
            .unwrap();
        wait_until(|| engine.state() == CaptureState::Stopped);
        assert_eq!(engine.state(), CaptureState::Stopped);
        assert!(engine.last_error().unwrap().contains("eth0"));
        engine.join();
    }

    #[test]
    fn start_without_sources_fails() {
        let (engine, _store) = engine();
        assert!(matches!(engine.start(vec![]), Err(CaptureError::NoInterfaces)));
        assert_eq!(engine.state(), CaptureState::Stopped);
    }

    #[test]
    fn start_is_accepted_only_once() {
        let (engine, _store) = engine();
        engine.start(vec![source(vec![], None)]).unwrap();
        assert!(matches!(
            engine.start(vec![source(vec![], None)]),
            Err(CaptureError::NotIdle(CaptureState::Capturing))
        ));
        engine.stop();
        engine.join();
        assert!(matches!(
            engine.start(vec![source(vec![], None)]),
            Err(CaptureError::NotIdle(CaptureState::Stopped))
        ));
        assert_eq!(engine.state(), CaptureState::Stopped);
    }

    #[test]
    fn concurrent_starts_spawn_one_set_of_threads() {
        let (engine, _store) = engine();
        let engine = Arc::new(engine);
        let results: Vec<_> = (0..4)
            .map(|_| {
                let engine = engine.clone();
                thread::spawn(move || engine.start(vec![source(vec![], None)]).is_ok())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect();
        assert_eq!(results.iter().filter(|ok| **ok).count(), 1);
        assert_eq!(engine.threads.lock().unwrap().len(), 1);
        engine.stop();
        engine.join();
    }

    #[test]
    fn stop_returns_promptly_on_idle_link() {
        let (engine, _store) = engine();
        engine.start(vec![source(vec![], None)]).unwrap();
        let started = Instant::now();
        engine.stop();
        engine.join();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(engine.state(), CaptureState::Stopped);
    }
}
