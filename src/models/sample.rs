// One scheduler tick: active measurement + passive traffic

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::traffic::{ClassificationCounters, RawCounterDelta};

/// Result of one active speed test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Speed {
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub latency_ms: f64,
}

/// Immutable record handed to the sink once per tick. Speed fields are `None`
/// (serialized as `null`) when the speed test failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub download_mbps: Option<f64>,
    pub upload_mbps: Option<f64>,
    pub latency_ms: Option<f64>,
    pub ad_traffic_percent: f64,
    pub per_interface: BTreeMap<String, ClassificationCounters>,
    #[serde(default)]
    pub os_counters: BTreeMap<String, RawCounterDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurement_error: Option<String>,
}

impl Sample {
    pub fn speed(&self) -> Option<Speed> {
        Some(Speed {
            download_mbps: self.download_mbps?,
            upload_mbps: self.upload_mbps?,
            latency_ms: self.latency_ms?,
        })
    }
}
