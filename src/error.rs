// Error taxonomy. Everything on the per-packet path is recovered where it happens;
// these types only cross component boundaries.

use std::net::IpAddr;

/// Blocklist source could not be turned into a matcher.
#[derive(Debug, thiserror::Error)]
pub enum RuleLoadError {
    #[error("cannot read blocklist {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("blocklist {0} contains no usable rule")]
    Empty(String),
}

/// Reverse lookup did not produce a hostname. Always treated as non-ad traffic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    #[error("lookup for {0} in progress")]
    Pending(IpAddr),
    #[error("no hostname for {0}")]
    NotFound(IpAddr),
    #[error("lookup for {0} timed out")]
    Timeout(IpAddr),
    #[error("resolver queue full, {0} not queued")]
    QueueFull(IpAddr),
}

/// Active speed test failed for one cycle.
#[derive(Debug, thiserror::Error)]
pub enum MeasurementError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {0}")]
    Status(reqwest::StatusCode),
    #[error("latency check to {target} failed: {source}")]
    Latency {
        target: String,
        #[source]
        source: std::io::Error,
    },
    #[error("measurement timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("{0}")]
    Invalid(String),
}

/// Capture subsystem unusable (fatal for the affected interface).
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("insufficient privilege to capture on {0}")]
    Permission(String),
    #[error("interface {0} not found")]
    InterfaceNotFound(String),
    #[error("unsupported channel type on {0}")]
    UnsupportedChannel(String),
    #[error("capture device error on {interface}: {source}")]
    Device {
        interface: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no interface available for capture")]
    NoInterfaces,
    #[error("capture engine is {0:?}; start requires an idle engine")]
    NotIdle(crate::capture::CaptureState),
}

/// Rejected runtime configuration update; the previous value stays in force.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("interval_secs must be >= 1, got {0}")]
    Interval(i64),
}

/// Sample history could not be written.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink io: {0}")]
    Io(#[from] std::io::Error),
    #[error("sample encoding: {0}")]
    Encode(#[from] serde_json::Error),
}
