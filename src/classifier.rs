// Per-packet classification: direction, remote peer, blocklist verdict.

use std::net::IpAddr;
use std::sync::Arc;

use pnet::packet::Packet;
use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::util::MacAddr;

use crate::blocklist::BlocklistMatcher;
use crate::models::{ClassificationEvent, Direction};
use crate::resolver::HostResolver;

/// Framing of what an interface delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    /// 14-byte Ethernet header, EtherType at offset 12.
    Ethernet,
    /// No link-layer header (tun, WireGuard, PPP); IP version from the first nibble.
    RawIp,
}

/// One frame as read from an interface.
#[derive(Debug, Clone, Copy)]
pub struct CapturedFrame<'a> {
    pub interface: &'a str,
    pub link_type: LinkType,
    /// Hardware address of `interface`. When present, a frame is outbound iff
    /// its Ethernet source is this address.
    pub local_mac: Option<MacAddr>,
    /// Addresses assigned to `interface` when it was opened; decides direction
    /// only for frames without a usable MAC.
    pub local_addrs: &'a [IpAddr],
    pub data: &'a [u8],
}

/// Link and network addresses of one IP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeaders {
    pub src_mac: Option<MacAddr>,
    pub src: IpAddr,
    pub dst: IpAddr,
}

pub struct TrafficClassifier {
    matcher: Arc<BlocklistMatcher>,
    resolver: Arc<dyn HostResolver>,
}

impl TrafficClassifier {
    pub fn new(matcher: Arc<BlocklistMatcher>, resolver: Arc<dyn HostResolver>) -> Self {
        Self { matcher, resolver }
    }

    /// Classify one frame. Non-IP frames yield `None` and are not counted.
    ///
    /// Resolution failures of any kind (pending, timeout, no PTR record) mark the
    /// packet as non-ad; its bytes are still credited.
    pub fn classify(&self, frame: &CapturedFrame<'_>) -> Option<ClassificationEvent> {
        let headers = parse_headers(frame.link_type, frame.data)?;
        let outbound = match (frame.local_mac, headers.src_mac) {
            (Some(local), Some(src)) => src == local,
            _ => frame.local_addrs.contains(&headers.src),
        };
        let (direction, remote) = if outbound {
            (Direction::Outbound, headers.dst)
        } else {
            (Direction::Inbound, headers.src)
        };
        let destination_is_ad = match self.resolver.resolve(remote) {
            Ok(hostname) => self.matcher.classify(&hostname),
            Err(_) => false,
        };
        Some(ClassificationEvent {
            interface: frame.interface.to_string(),
            direction,
            byte_len: frame.data.len() as u64,
            destination_is_ad,
        })
    }
}

/// Addresses of an IPv4/IPv6 packet in the given framing; `None` for anything else.
pub fn parse_headers(link_type: LinkType, data: &[u8]) -> Option<FrameHeaders> {
    match link_type {
        LinkType::Ethernet => {
            let eth = EthernetPacket::new(data)?;
            let (src, dst) = match eth.get_ethertype() {
                EtherTypes::Ipv4 => ipv4_endpoints(eth.payload())?,
                EtherTypes::Ipv6 => ipv6_endpoints(eth.payload())?,
                _ => return None,
            };
            Some(FrameHeaders {
                src_mac: Some(eth.get_source()),
                src,
                dst,
            })
        }
        LinkType::RawIp => {
            let (src, dst) = match data.first()? >> 4 {
                4 => ipv4_endpoints(data)?,
                6 => ipv6_endpoints(data)?,
                _ => return None,
            };
            Some(FrameHeaders {
                src_mac: None,
                src,
                dst,
            })
        }
    }
}

fn ipv4_endpoints(data: &[u8]) -> Option<(IpAddr, IpAddr)> {
    let ip = Ipv4Packet::new(data)?;
    Some((
        IpAddr::V4(ip.get_source()),
        IpAddr::V4(ip.get_destination()),
    ))
}

fn ipv6_endpoints(data: &[u8]) -> Option<(IpAddr, IpAddr)> {
    let ip = Ipv6Packet::new(data)?;
    Some((
        IpAddr::V6(ip.get_source()),
        IpAddr::V6(ip.get_destination()),
    ))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ResolutionError;
    use std::collections::HashMap;
    use std::net::{Ipv4Addr, Ipv6Addr};

    /// Resolver backed by a fixed table; unknown addresses fail.
    pub(crate) struct StaticResolver(pub HashMap<IpAddr, String>);

    impl HostResolver for StaticResolver {
        fn resolve(&self, ip: IpAddr) -> Result<String, ResolutionError> {
            self.0.get(&ip).cloned().ok_or(ResolutionError::NotFound(ip))
        }
    }

    /// Ethernet + IPv4 frame with zeroed MAC addresses.
    pub(crate) fn ipv4_frame(src: Ipv4Addr, dst: Ipv4Addr, total_len: usize) -> Vec<u8> {
        let mut frame = vec![0u8; total_len.max(34)];
        frame[12] = 0x08;
        frame[13] = 0x00;
        frame[14] = 0x45;
        let ip_len = (frame.len() - 14) as u16;
        frame[16..18].copy_from_slice(&ip_len.to_be_bytes());
        frame[22] = 64;
        frame[23] = 6;
        frame[26..30].copy_from_slice(&src.octets());
        frame[30..34].copy_from_slice(&dst.octets());
        frame
    }

    fn with_macs(mut frame: Vec<u8>, src: MacAddr, dst: MacAddr) -> Vec<u8> {
        frame[0..6].copy_from_slice(&dst.octets());
        frame[6..12].copy_from_slice(&src.octets());
        frame
    }

    fn ipv6_frame(src: Ipv6Addr, dst: Ipv6Addr) -> Vec<u8> {
        let mut frame = vec![0u8; 54];
        frame[12] = 0x86;
        frame[13] = 0xdd;
        frame[14] = 0x60;
        frame[22..38].copy_from_slice(&src.octets());
        frame[38..54].copy_from_slice(&dst.octets());
        frame
    }

    const LOCAL: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 10);
    const AD_SERVER: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 5);
    const PLAIN_SERVER: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 8);
    const LOCAL_MAC: MacAddr = MacAddr(0x02, 0, 0, 0, 0, 0x01);
    const GATEWAY_MAC: MacAddr = MacAddr(0x02, 0, 0, 0, 0, 0xfe);
    const LOCALS: [IpAddr; 1] = [IpAddr::V4(LOCAL)];

    fn classifier() -> TrafficClassifier {
        let matcher = BlocklistMatcher::from_rules(["||doubleclick.net^"]);
        let mut names = HashMap::new();
        names.insert(IpAddr::V4(AD_SERVER), "ad.doubleclick.net".to_string());
        names.insert(IpAddr::V4(PLAIN_SERVER), "www.example.com".to_string());
        TrafficClassifier::new(Arc::new(matcher), Arc::new(StaticResolver(names)))
    }

    fn ethernet<'a>(data: &'a [u8], local_mac: Option<MacAddr>) -> CapturedFrame<'a> {
        CapturedFrame {
            interface: "eth0",
            link_type: LinkType::Ethernet,
            local_mac,
            local_addrs: &LOCALS,
            data,
        }
    }

    fn tun(data: &[u8]) -> CapturedFrame<'_> {
        CapturedFrame {
            interface: "tun0",
            link_type: LinkType::RawIp,
            local_mac: None,
            local_addrs: &LOCALS,
            data,
        }
    }

    #[test]
    fn inbound_from_blocked_host_is_ad() {
        let data = ipv4_frame(AD_SERVER, LOCAL, 120);
        let event = classifier().classify(&ethernet(&data, None)).unwrap();
        assert_eq!(event.interface, "eth0");
        assert_eq!(event.direction, Direction::Inbound);
        assert_eq!(event.byte_len, 120);
        assert!(event.destination_is_ad);
    }

    #[test]
    fn outbound_uses_destination_as_remote() {
        let data = ipv4_frame(LOCAL, AD_SERVER, 60);
        let event = classifier().classify(&ethernet(&data, None)).unwrap();
        assert_eq!(event.direction, Direction::Outbound);
        assert!(event.destination_is_ad);
    }

    #[test]
    fn source_mac_decides_direction_after_address_change() {
        // Host was renumbered to .77; the address list still holds .10.
        let renumbered = Ipv4Addr::new(192, 168, 1, 77);
        let sent = with_macs(ipv4_frame(renumbered, AD_SERVER, 1500), LOCAL_MAC, GATEWAY_MAC);
        let event = classifier()
            .classify(&ethernet(&sent, Some(LOCAL_MAC)))
            .unwrap();
        assert_eq!(event.direction, Direction::Outbound);
        assert!(event.destination_is_ad);

        let received = with_macs(ipv4_frame(AD_SERVER, renumbered, 900), GATEWAY_MAC, LOCAL_MAC);
        let event = classifier()
            .classify(&ethernet(&received, Some(LOCAL_MAC)))
            .unwrap();
        assert_eq!(event.direction, Direction::Inbound);
        assert!(event.destination_is_ad);
    }

    #[test]
    fn unlisted_host_is_not_ad() {
        let data = ipv4_frame(PLAIN_SERVER, LOCAL, 80);
        let event = classifier().classify(&ethernet(&data, None)).unwrap();
        assert!(!event.destination_is_ad);
    }

    #[test]
    fn resolution_failure_is_not_ad_but_still_counted() {
        let data = ipv4_frame(Ipv4Addr::new(10, 9, 9, 9), LOCAL, 1500);
        let event = classifier().classify(&ethernet(&data, None)).unwrap();
        assert_eq!(event.byte_len, 1500);
        assert!(!event.destination_is_ad);
    }

    #[test]
    fn non_ip_frames_are_ignored() {
        let mut arp = vec![0u8; 42];
        arp[12] = 0x08;
        arp[13] = 0x06;
        assert!(classifier().classify(&ethernet(&arp, None)).is_none());
        assert!(parse_headers(LinkType::Ethernet, &[0u8; 4]).is_none());
    }

    #[test]
    fn tun_frames_are_parsed_as_raw_ip() {
        let eth = ipv4_frame(AD_SERVER, LOCAL, 120);
        let event = classifier().classify(&tun(&eth[14..])).unwrap();
        assert_eq!(event.interface, "tun0");
        assert_eq!(event.direction, Direction::Inbound);
        assert_eq!(event.byte_len, 106);
        assert!(event.destination_is_ad);

        let eth = ipv4_frame(LOCAL, PLAIN_SERVER, 80);
        let event = classifier().classify(&tun(&eth[14..])).unwrap();
        assert_eq!(event.direction, Direction::Outbound);
    }

    #[test]
    fn raw_ip_version_comes_from_first_nibble() {
        let src = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1);
        let dst = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 2);
        let eth = ipv6_frame(src, dst);
        let headers = parse_headers(LinkType::RawIp, &eth[14..]).unwrap();
        assert_eq!((headers.src, headers.dst), (IpAddr::V6(src), IpAddr::V6(dst)));
        assert!(headers.src_mac.is_none());

        assert!(parse_headers(LinkType::RawIp, &[0x10, 0, 0, 0]).is_none());
        assert!(parse_headers(LinkType::RawIp, &[]).is_none());
    }

    #[test]
    fn ipv6_endpoints_are_parsed() {
        let src = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1);
        let dst = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 2);
        let headers = parse_headers(LinkType::Ethernet, &ipv6_frame(src, dst)).unwrap();
        assert_eq!((headers.src, headers.dst), (IpAddr::V6(src), IpAddr::V6(dst)));
        assert_eq!(headers.src_mac, Some(MacAddr::zero()));
    }
}
