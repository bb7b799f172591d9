use serde::Deserialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::error::ConfigValidationError;
use crate::resolver::ResolverConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub resolver: ResolverSection,
    #[serde(default)]
    pub blocklist: BlocklistConfig,
    pub speedtest: SpeedtestConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Initial tick interval; can be changed at runtime via `PUT /api/interval`.
    pub interval_secs: u32,
    #[serde(default = "default_measurement_timeout_secs")]
    pub measurement_timeout_secs: u64,
    /// Window over which OS interface counters are diffed each tick (0 disables).
    #[serde(default = "default_os_counter_window_ms")]
    pub os_counter_window_ms: u64,
    /// How often to log app stats (samples, totals, resolver) at INFO level.
    #[serde(default = "default_stats_log_interval_secs")]
    pub stats_log_interval_secs: u64,
}

fn default_measurement_timeout_secs() -> u64 {
    120
}

fn default_os_counter_window_ms() -> u64 {
    1000
}

fn default_stats_log_interval_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Interfaces to capture on; empty = every up, addressed, non-loopback interface.
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub promiscuous: bool,
    /// Upper bound on how long a capture thread takes to notice cancellation.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interfaces: Vec::new(),
            promiscuous: false,
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_read_timeout_ms() -> u64 {
    250
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolverSection {
    #[serde(default = "default_resolver_workers")]
    pub workers: usize,
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for ResolverSection {
    fn default() -> Self {
        Self {
            workers: default_resolver_workers(),
            lookup_timeout_ms: default_lookup_timeout_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_capacity: default_cache_capacity(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl ResolverSection {
    pub fn to_resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            workers: self.workers,
            lookup_timeout: Duration::from_millis(self.lookup_timeout_ms),
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            cache_capacity: self.cache_capacity,
            queue_capacity: self.queue_capacity,
        }
    }
}

fn default_resolver_workers() -> usize {
    2
}

fn default_lookup_timeout_ms() -> u64 {
    2000
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_cache_capacity() -> usize {
    10_000
}

fn default_queue_capacity() -> usize {
    256
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlocklistConfig {
    #[serde(default = "default_blocklist_path")]
    pub path: String,
}

impl Default for BlocklistConfig {
    fn default() -> Self {
        Self {
            path: default_blocklist_path(),
        }
    }
}

fn default_blocklist_path() -> String {
    "easylist.txt".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpeedtestConfig {
    pub download_url: String,
    pub upload_url: String,
    /// `host:port` used for TCP-connect latency checks.
    pub latency_target: String,
    #[serde(default = "default_latency_attempts")]
    pub latency_attempts: u32,
    #[serde(default = "default_max_download_bytes")]
    pub max_download_bytes: u64,
    #[serde(default = "default_upload_bytes")]
    pub upload_bytes: usize,
}

fn default_latency_attempts() -> u32 {
    5
}

fn default_max_download_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_upload_bytes() -> usize {
    10 * 1024 * 1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// JSON-lines history file; one sample appended per tick.
    pub path: String,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Max number of samples kept in the broadcast channel for /ws/samples.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

fn default_channel_capacity() -> usize {
    32
}

fn default_broadcast_capacity() -> usize {
    16
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            self.scheduler.interval_secs >= 1,
            "scheduler.interval_secs must be >= 1, got {}",
            self.scheduler.interval_secs
        );
        anyhow::ensure!(
            self.scheduler.measurement_timeout_secs > 0,
            "scheduler.measurement_timeout_secs must be > 0, got {}",
            self.scheduler.measurement_timeout_secs
        );
        anyhow::ensure!(
            self.scheduler.stats_log_interval_secs > 0,
            "scheduler.stats_log_interval_secs must be > 0, got {}",
            self.scheduler.stats_log_interval_secs
        );
        anyhow::ensure!(
            self.capture.read_timeout_ms > 0,
            "capture.read_timeout_ms must be > 0, got {}",
            self.capture.read_timeout_ms
        );
        anyhow::ensure!(
            self.resolver.workers > 0,
            "resolver.workers must be > 0, got {}",
            self.resolver.workers
        );
        anyhow::ensure!(
            self.resolver.lookup_timeout_ms > 0,
            "resolver.lookup_timeout_ms must be > 0, got {}",
            self.resolver.lookup_timeout_ms
        );
        anyhow::ensure!(
            self.resolver.cache_capacity > 0,
            "resolver.cache_capacity must be > 0, got {}",
            self.resolver.cache_capacity
        );
        anyhow::ensure!(
            self.resolver.queue_capacity > 0,
            "resolver.queue_capacity must be > 0, got {}",
            self.resolver.queue_capacity
        );
        anyhow::ensure!(
            !self.speedtest.download_url.is_empty(),
            "speedtest.download_url must be non-empty"
        );
        anyhow::ensure!(
            !self.speedtest.upload_url.is_empty(),
            "speedtest.upload_url must be non-empty"
        );
        anyhow::ensure!(
            self.speedtest.latency_target.contains(':'),
            "speedtest.latency_target must be host:port, got {:?}",
            self.speedtest.latency_target
        );
        anyhow::ensure!(
            self.speedtest.latency_attempts > 0,
            "speedtest.latency_attempts must be > 0, got {}",
            self.speedtest.latency_attempts
        );
        anyhow::ensure!(!self.output.path.is_empty(), "output.path must be non-empty");
        anyhow::ensure!(
            self.output.channel_capacity > 0,
            "output.channel_capacity must be > 0, got {}",
            self.output.channel_capacity
        );
        anyhow::ensure!(
            self.output.broadcast_capacity > 0,
            "output.broadcast_capacity must be > 0, got {}",
            self.output.broadcast_capacity
        );
        Ok(())
    }
}

/// Scheduler interval that can be changed while the process runs.
///
/// Readers see the latest accepted value; rejected updates leave it untouched.
#[derive(Debug)]
pub struct IntervalConfig {
    secs: AtomicU32,
}

impl IntervalConfig {
    pub fn new(secs: u32) -> Result<Self, ConfigValidationError> {
        if secs < 1 {
            return Err(ConfigValidationError::Interval(secs as i64));
        }
        Ok(Self {
            secs: AtomicU32::new(secs),
        })
    }

    pub fn get(&self) -> u32 {
        self.secs.load(Ordering::Acquire)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.get() as u64)
    }

    /// Apply a new interval. Values below 1 (including negatives from external
    /// surfaces) are rejected and the previous interval stays in force.
    pub fn set(&self, secs: i64) -> Result<u32, ConfigValidationError> {
        let secs = u32::try_from(secs)
            .ok()
            .filter(|s| *s >= 1)
            .ok_or(ConfigValidationError::Interval(secs))?;
        self.secs.store(secs, Ordering::Release);
        Ok(secs)
    }
}
