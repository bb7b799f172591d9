// Measurement scheduler: one active speed test plus a traffic snapshot per tick.
// Samples go to the history writer task (mpsc) and to live clients (broadcast).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Duration, Instant, interval, sleep_until};

use crate::capture::PacketCaptureEngine;
use crate::config::{IntervalConfig, SchedulerConfig};
use crate::counter_store::{InterfaceCounterStore, ad_traffic_percent};
use crate::error::MeasurementError;
use crate::interface_repo::InterfaceRepo;
use crate::models::Sample;
use crate::resolver::ResolverStats;
use crate::speedtest::ActiveMeasurer;

/// Rate limit for the "no live clients" message.
const NO_RECEIVERS_WARN_INTERVAL: Duration = Duration::from_secs(60);

/// Produces one `Sample` per call. Holds no lock across the speed test.
pub struct Sampler<M> {
    measurer: Arc<M>,
    store: Arc<InterfaceCounterStore>,
    interface_repo: Option<Arc<InterfaceRepo>>,
    measurement_timeout: Duration,
    os_counter_window: Duration,
}

impl<M: ActiveMeasurer> Sampler<M> {
    pub fn new(
        measurer: Arc<M>,
        store: Arc<InterfaceCounterStore>,
        interface_repo: Option<Arc<InterfaceRepo>>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            measurer,
            store,
            interface_repo,
            measurement_timeout: Duration::from_secs(config.measurement_timeout_secs),
            os_counter_window: Duration::from_millis(config.os_counter_window_ms),
        }
    }

    /// Run one tick: measure, read OS counters, then snapshot and reset the
    /// classification counters. A failed measurement still yields a sample.
    pub async fn run_cycle(&self) -> Sample {
        let measured = match tokio::time::timeout(self.measurement_timeout, self.measurer.measure())
            .await
        {
            Ok(result) => result,
            Err(_) => Err(MeasurementError::Timeout(self.measurement_timeout)),
        };

        let os_counters = match &self.interface_repo {
            Some(repo) if !self.os_counter_window.is_zero() => {
                match repo.sample_counter_deltas(self.os_counter_window).await {
                    Ok(deltas) => deltas,
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            operation = "sample_counter_deltas",
                            "OS counter sampling failed"
                        );
                        BTreeMap::new()
                    }
                }
            }
            _ => BTreeMap::new(),
        };

        let per_interface = self.store.snapshot_and_reset();
        let ad_traffic_percent = ad_traffic_percent(&per_interface);

        let (speed, measurement_error) = match measured {
            Ok(speed) => (Some(speed), None),
            Err(e) => {
                tracing::warn!(error = %e, operation = "measure", "speed test failed");
                (None, Some(e.to_string()))
            }
        };

        Sample {
            timestamp: now_millis(),
            download_mbps: speed.map(|s| s.download_mbps),
            upload_mbps: speed.map(|s| s.upload_mbps),
            latency_ms: speed.map(|s| s.latency_ms),
            ad_traffic_percent,
            per_interface,
            os_counters,
            measurement_error,
        }
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_else(|e| {
            tracing::warn!(
                error = %e,
                operation = "get_timestamp",
                "system time error"
            );
            0
        })
}

/// Sampler, channels, observability handles and shutdown for the scheduler.
pub struct SchedulerDeps<M> {
    pub sampler: Sampler<M>,
    pub interval: Arc<IntervalConfig>,
    pub tx: broadcast::Sender<Sample>,
    pub write_tx: mpsc::Sender<Sample>,
    pub latest: watch::Sender<Option<Sample>>,
    pub store: Arc<InterfaceCounterStore>,
    pub resolver_stats: Option<Arc<ResolverStats>>,
    pub capture: Option<Arc<PacketCaptureEngine>>,
    pub ws_sample_connections: Arc<AtomicUsize>,
    pub samples_saved_total: Arc<AtomicU64>,
    pub shutdown_rx: oneshot::Receiver<()>,
}

/// Spawns the scheduler loop. Shutdown is honoured only while sleeping between
/// cycles, so a running cycle always delivers its sample. On exit `write_tx` is
/// dropped, which lets the history writer drain and stop.
pub fn spawn<M: ActiveMeasurer>(
    deps: SchedulerDeps<M>,
    config: &SchedulerConfig,
) -> tokio::task::JoinHandle<()> {
    let SchedulerDeps {
        sampler,
        interval: interval_config,
        tx,
        write_tx,
        latest,
        store,
        resolver_stats,
        capture,
        ws_sample_connections,
        samples_saved_total,
        mut shutdown_rx,
    } = deps;
    let stats_log_interval = Duration::from_secs(config.stats_log_interval_secs);

    tokio::spawn(async move {
        let mut stats_log_tick = interval(stats_log_interval);
        stats_log_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut samples_emitted: u64 = 0;
        let mut last_no_receivers_warn: Option<Instant> = None;

        'cycles: loop {
            let cycle_interval = interval_config.interval();
            let sample = sampler.run_cycle().await;
            samples_emitted += 1;

            tracing::info!(
                download_mbps = ?sample.download_mbps,
                upload_mbps = ?sample.upload_mbps,
                latency_ms = ?sample.latency_ms,
                ad_traffic_percent = sample.ad_traffic_percent,
                interfaces = sample.per_interface.len(),
                "sample"
            );

            latest.send_replace(Some(sample.clone()));
            if tx.send(sample.clone()).is_err() {
                let should_warn = last_no_receivers_warn
                    .is_none_or(|t| t.elapsed() >= NO_RECEIVERS_WARN_INTERVAL);
                if should_warn {
                    tracing::debug!(
                        operation = "broadcast_sample",
                        "No active WebSocket clients; broadcast channel has no receivers"
                    );
                    last_no_receivers_warn = Some(Instant::now());
                }
            }
            if write_tx.send(sample).await.is_err() {
                tracing::debug!("Sample writer channel closed");
            }

            let deadline = Instant::now() + cycle_interval;
            loop {
                tokio::select! {
                    _ = sleep_until(deadline) => break,
                    _ = &mut shutdown_rx => {
                        tracing::debug!("Scheduler shutting down");
                        break 'cycles;
                    }
                    _ = stats_log_tick.tick() => {
                        let totals = store.lifetime_totals();
                        let resolver = resolver_stats.as_ref().map(|s| s.snapshot());
                        tracing::info!(
                            samples_emitted,
                            samples_saved_total = samples_saved_total.load(Ordering::Relaxed),
                            ws_sample_clients = ws_sample_connections.load(Ordering::Relaxed),
                            bytes_sent_total = totals.bytes_sent,
                            bytes_received_total = totals.bytes_received,
                            ad_bytes_received_total = totals.ad_bytes_received,
                            resolver = ?resolver,
                            capture_state = ?capture.as_ref().map(|c| c.state()),
                            interval_secs = interval_config.get(),
                            "app stats"
                        );
                    }
                }
            }
        }
    })
}
