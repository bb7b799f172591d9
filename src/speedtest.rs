// Active link measurement: TCP-connect latency, HTTP download and upload throughput.

use std::future::Future;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio::net::TcpStream;
use tracing::instrument;

use crate::config::SpeedtestConfig;
use crate::error::MeasurementError;
use crate::models::Speed;

/// Produces one download/upload/latency reading.
pub trait ActiveMeasurer: Send + Sync + 'static {
    fn measure(&self) -> impl Future<Output = Result<Speed, MeasurementError>> + Send;
}

pub struct HttpSpeedTest {
    client: reqwest::Client,
    config: SpeedtestConfig,
}

impl HttpSpeedTest {
    pub fn new(config: SpeedtestConfig) -> Result<Self, MeasurementError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("netmon/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, config })
    }

    /// Best of `latency_attempts` TCP handshakes, in milliseconds.
    async fn latency_ms(&self) -> Result<f64, MeasurementError> {
        let mut best: Option<Duration> = None;
        for _ in 0..self.config.latency_attempts.max(1) {
            let start = Instant::now();
            let stream = TcpStream::connect(&self.config.latency_target)
                .await
                .map_err(|source| MeasurementError::Latency {
                    target: self.config.latency_target.clone(),
                    source,
                })?;
            let rtt = start.elapsed();
            drop(stream);
            best = Some(best.map_or(rtt, |b| b.min(rtt)));
        }
        Ok(best.unwrap_or_default().as_secs_f64() * 1000.0)
    }

    async fn download_mbps(&self) -> Result<f64, MeasurementError> {
        let start = Instant::now();
        let response = self.client.get(&self.config.download_url).send().await?;
        if !response.status().is_success() {
            return Err(MeasurementError::Status(response.status()));
        }
        let mut received: u64 = 0;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            received += chunk?.len() as u64;
            if received >= self.config.max_download_bytes {
                break;
            }
        }
        mbps(received, start.elapsed())
    }

    async fn upload_mbps(&self) -> Result<f64, MeasurementError> {
        let payload = vec![0u8; self.config.upload_bytes];
        let sent = payload.len() as u64;
        let start = Instant::now();
        let response = self
            .client
            .post(&self.config.upload_url)
            .body(payload)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(MeasurementError::Status(response.status()));
        }
        mbps(sent, start.elapsed())
    }
}

impl ActiveMeasurer for HttpSpeedTest {
    #[instrument(skip(self), fields(operation = "speedtest"))]
    async fn measure(&self) -> Result<Speed, MeasurementError> {
        let latency_ms = self.latency_ms().await?;
        let download_mbps = self.download_mbps().await?;
        let upload_mbps = self.upload_mbps().await?;
        Ok(Speed {
            download_mbps,
            upload_mbps,
            latency_ms,
        })
    }
}

/// Megabits per second for `bytes` transferred in `elapsed`.
pub fn mbps(bytes: u64, elapsed: Duration) -> Result<f64, MeasurementError> {
    if bytes == 0 {
        return Err(MeasurementError::Invalid("no bytes transferred".into()));
    }
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return Err(MeasurementError::Invalid("zero elapsed time".into()));
    }
    Ok(bytes as f64 * 8.0 / secs / 1_000_000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mbps_converts_bytes_to_megabits() {
        let v = mbps(12_500_000, Duration::from_secs(1)).unwrap();
        assert!((v - 100.0).abs() < 1e-9);
        let v = mbps(2_500_000, Duration::from_secs(2)).unwrap();
        assert!((v - 10.0).abs() < 1e-9);
    }

    #[test]
    fn mbps_rejects_degenerate_input() {
        assert!(mbps(0, Duration::from_secs(1)).is_err());
        assert!(mbps(10, Duration::ZERO).is_err());
    }
}
