// Network interface models

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// A network adapter as enumerated from the OS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceInfo {
    pub name: String,
    pub mac_address: String,
    pub addrs: Vec<IpAddr>,
    /// Link speed in bits per second, 0 when unknown.
    pub speed: u64,
    pub is_up: bool,
}
