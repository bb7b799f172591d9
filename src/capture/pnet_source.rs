// pnet datalink channels as packet sources.

use std::io;
use std::net::IpAddr;
use std::time::Duration;

use pnet::datalink::{self, Channel, DataLinkReceiver, NetworkInterface};

use super::{CaptureSource, PacketSource};
use crate::classifier::LinkType;
use crate::config::CaptureConfig;
use crate::error::CaptureError;

pub struct PnetSource {
    rx: Box<dyn DataLinkReceiver>,
}

impl PacketSource for PnetSource {
    fn next_frame(&mut self) -> io::Result<Option<&[u8]>> {
        match self.rx.next() {
            Ok(frame) => Ok(Some(frame)),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Interfaces to capture on: the configured names, or every interface that is
/// up, has an address and is not loopback.
fn select_interfaces(
    all: Vec<NetworkInterface>,
    config: &CaptureConfig,
) -> (Vec<NetworkInterface>, Vec<CaptureError>) {
    if config.interfaces.is_empty() {
        let selected = all
            .into_iter()
            .filter(|iface| iface.is_up() && !iface.ips.is_empty() && !iface.is_loopback())
            .collect();
        return (selected, Vec::new());
    }
    let mut selected = Vec::new();
    let mut missing = Vec::new();
    for name in &config.interfaces {
        match all.iter().find(|iface| &iface.name == name) {
            Some(iface) => selected.push(iface.clone()),
            None => missing.push(CaptureError::InterfaceNotFound(name.clone())),
        }
    }
    (selected, missing)
}

/// Framing and hardware address of an interface. Point-to-point and MAC-less
/// devices (tun, WireGuard, PPP) hand over bare IP packets.
fn link_of(iface: &NetworkInterface) -> (LinkType, Option<pnet::util::MacAddr>) {
    let mac = iface.mac.filter(|m| !m.is_zero());
    if iface.is_loopback() {
        return (LinkType::Ethernet, mac);
    }
    if iface.is_point_to_point() || mac.is_none() {
        return (LinkType::RawIp, None);
    }
    (LinkType::Ethernet, mac)
}

fn open_channel(
    iface: &NetworkInterface,
    config: &CaptureConfig,
) -> Result<CaptureSource, CaptureError> {
    let channel_config = datalink::Config {
        read_timeout: Some(Duration::from_millis(config.read_timeout_ms)),
        read_buffer_size: 65536,
        promiscuous: config.promiscuous,
        ..Default::default()
    };
    let (link_type, local_mac) = link_of(iface);
    match datalink::channel(iface, channel_config) {
        Ok(Channel::Ethernet(_tx, rx)) => Ok(CaptureSource {
            interface: iface.name.clone(),
            link_type,
            local_mac,
            local_addrs: iface.ips.iter().map(|n| n.ip()).collect::<Vec<IpAddr>>(),
            source: Box::new(PnetSource { rx }),
        }),
        Ok(_) => Err(CaptureError::UnsupportedChannel(iface.name.clone())),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            Err(CaptureError::Permission(iface.name.clone()))
        }
        Err(source) => Err(CaptureError::Device {
            interface: iface.name.clone(),
            source,
        }),
    }
}

/// Open a capture channel on each selected interface. Interfaces that cannot be
/// opened are logged and skipped; the call fails only when none could be opened.
pub fn open_sources(config: &CaptureConfig) -> Result<Vec<CaptureSource>, CaptureError> {
    let (selected, mut errors) = select_interfaces(datalink::interfaces(), config);
    let mut sources = Vec::with_capacity(selected.len());
    for iface in &selected {
        match open_channel(iface, config) {
            Ok(source) => {
                tracing::debug!(interface = %iface.name, addrs = iface.ips.len(), "capture channel opened");
                sources.push(source);
            }
            Err(e) => errors.push(e),
        }
    }
    for e in &errors {
        tracing::warn!(error = %e, "interface skipped for capture");
    }
    if sources.is_empty() {
        // Privilege problems are the most actionable thing to report.
        let permission = errors
            .iter()
            .position(|e| matches!(e, CaptureError::Permission(_)));
        return Err(match permission {
            Some(i) => errors.swap_remove(i),
            None => errors.into_iter().next().unwrap_or(CaptureError::NoInterfaces),
        });
    }
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(interfaces: &[&str]) -> CaptureConfig {
        CaptureConfig {
            interfaces: interfaces.iter().map(|s| s.to_string()).collect(),
            ..CaptureConfig::default()
        }
    }

    fn iface(name: &str, index: u32) -> NetworkInterface {
        NetworkInterface {
            name: name.into(),
            description: String::new(),
            index,
            mac: None,
            ips: vec![],
            flags: 0,
        }
    }

    #[test]
    fn link_type_follows_interface_kind() {
        let mac = pnet::util::MacAddr(0x02, 0, 0, 0, 0, 0x01);
        let eth = NetworkInterface {
            mac: Some(mac),
            ..iface("eth0", 1)
        };
        assert_eq!(link_of(&eth), (LinkType::Ethernet, Some(mac)));

        let wg = iface("wg0", 2);
        assert_eq!(link_of(&wg), (LinkType::RawIp, None));

        let zero_mac = NetworkInterface {
            mac: Some(pnet::util::MacAddr::zero()),
            ..iface("tun0", 3)
        };
        assert_eq!(link_of(&zero_mac), (LinkType::RawIp, None));

        // IFF_POINTOPOINT
        #[cfg(unix)]
        {
            let ppp = NetworkInterface {
                mac: Some(mac),
                flags: 0x10,
                ..iface("ppp0", 4)
            };
            assert_eq!(link_of(&ppp).0, LinkType::RawIp);
        }
    }

    #[test]
    fn configured_names_are_matched_and_missing_reported() {
        let all = vec![iface("eth0", 1), iface("wlan0", 2)];
        let (selected, missing) = select_interfaces(all, &config(&["wlan0", "eth9"]));
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "wlan0");
        assert!(matches!(&missing[..], [CaptureError::InterfaceNotFound(n)] if n == "eth9"));
    }

    #[test]
    fn default_selection_skips_down_and_unaddressed_interfaces() {
        let all = vec![iface("eth0", 1), iface("lo", 2)];
        let (selected, missing) = select_interfaces(all, &config(&[]));
        assert!(selected.is_empty());
        assert!(missing.is_empty());
    }
}
