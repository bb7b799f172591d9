// Shared test helpers

#![allow(dead_code)]

use netmon::error::MeasurementError;
use netmon::models::*;
use netmon::speedtest::ActiveMeasurer;
use std::collections::BTreeMap;
use std::future::Future;

pub const TEST_CONFIG: &str = r#"
[server]
port = 8081
host = "0.0.0.0"

[scheduler]
interval_secs = 60
os_counter_window_ms = 0
stats_log_interval_secs = 60

[capture]
enabled = false

[speedtest]
download_url = "http://127.0.0.1:9/download"
upload_url = "http://127.0.0.1:9/upload"
latency_target = "127.0.0.1:9"

[output]
path = "data/samples.jsonl"
broadcast_capacity = 10
"#;

pub fn minimal_sample(timestamp: u64) -> Sample {
    Sample {
        timestamp,
        download_mbps: None,
        upload_mbps: None,
        latency_ms: None,
        ad_traffic_percent: 0.0,
        per_interface: BTreeMap::new(),
        os_counters: BTreeMap::new(),
        measurement_error: None,
    }
}

/// Always reports the same reading.
pub struct FixedMeasurer(pub Speed);

impl ActiveMeasurer for FixedMeasurer {
    fn measure(&self) -> impl Future<Output = Result<Speed, MeasurementError>> + Send {
        let speed = self.0;
        async move { Ok(speed) }
    }
}

/// Always fails, like a speed test run with the uplink down.
pub struct FailingMeasurer;

impl ActiveMeasurer for FailingMeasurer {
    async fn measure(&self) -> Result<Speed, MeasurementError> {
        Err(MeasurementError::Invalid("network unreachable".into()))
    }
}
