// Per-interface traffic models

use serde::{Deserialize, Serialize};

/// Which way a captured packet travelled relative to this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Remote -> host; credited to `bytes_received`.
    Inbound,
    /// Host -> remote; credited to `bytes_sent`.
    Outbound,
}

/// Capture-based byte counters for one interface.
///
/// `ad_bytes_received` never exceeds `bytes_received`: both are only ever raised
/// together through [`ClassificationCounters::add`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationCounters {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub ad_bytes_received: u64,
}

impl ClassificationCounters {
    /// Credit `byte_len` bytes. Saturates at `u64::MAX` instead of wrapping.
    pub fn add(&mut self, direction: Direction, byte_len: u64, is_ad: bool) {
        match direction {
            Direction::Outbound => {
                self.bytes_sent = self.bytes_sent.saturating_add(byte_len);
            }
            Direction::Inbound => {
                self.bytes_received = self.bytes_received.saturating_add(byte_len);
                if is_ad {
                    self.ad_bytes_received = self
                        .ad_bytes_received
                        .saturating_add(byte_len)
                        .min(self.bytes_received);
                }
            }
        }
    }

    /// Fold another set of counters into this one.
    pub fn merge(&mut self, other: &ClassificationCounters) {
        self.bytes_sent = self.bytes_sent.saturating_add(other.bytes_sent);
        self.bytes_received = self.bytes_received.saturating_add(other.bytes_received);
        self.ad_bytes_received = self
            .ad_bytes_received
            .saturating_add(other.ad_bytes_received)
            .min(self.bytes_received);
    }

    pub fn is_zero(&self) -> bool {
        self.bytes_sent == 0 && self.bytes_received == 0 && self.ad_bytes_received == 0
    }
}

/// Difference between two OS counter readings for one interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCounterDelta {
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Outcome of classifying one captured packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationEvent {
    pub interface: String,
    pub direction: Direction,
    pub byte_len: u64,
    pub destination_is_ad: bool,
}
