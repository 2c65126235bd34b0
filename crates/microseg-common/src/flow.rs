//! Network flow types and flow key extraction
//!
//! Every multi-byte read is preceded by an explicit bounds check; malformed
//! input yields a [`ParseError`], never a panic.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Ethernet header length
pub const ETH_HLEN: usize = 14;
/// EtherType for IPv4
pub const ETH_P_IP: u16 = 0x0800;
/// Minimum IPv4 header length
pub const IPV4_MIN_HLEN: usize = 20;
/// TCP header length without options
pub const TCP_HLEN: usize = 20;
/// UDP header length
pub const UDP_HLEN: usize = 8;

/// IP protocol number for ICMP
pub const IPPROTO_ICMP: u8 = 1;
/// IP protocol number for TCP
pub const IPPROTO_TCP: u8 = 6;
/// IP protocol number for UDP
pub const IPPROTO_UDP: u8 = 17;

/// 5-tuple flow key
///
/// Addresses are held in host order (`192.168.1.1` is `0xC0A80101`), ports
/// likewise. Equality and hashing cover all five fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FlowKey {
    /// Source IPv4 address
    pub src_ip: u32,
    /// Destination IPv4 address
    pub dst_ip: u32,
    /// Source port (0 for protocols without ports)
    pub src_port: u16,
    /// Destination port (0 for protocols without ports)
    pub dst_port: u16,
    /// IP protocol (TCP=6, UDP=17)
    pub protocol: u8,
}

impl FlowKey {
    /// Create new flow key
    #[inline(always)]
    pub const fn new(src_ip: u32, dst_ip: u32, src_port: u16, dst_port: u16, protocol: u8) -> Self {
        Self {
            src_ip,
            dst_ip,
            src_port,
            dst_port,
            protocol,
        }
    }

    /// Create from IPv4 addresses
    #[inline(always)]
    pub const fn from_v4(
        src: Ipv4Addr,
        dst: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
        protocol: u8,
    ) -> Self {
        Self::new(
            u32::from_be_bytes(src.octets()),
            u32::from_be_bytes(dst.octets()),
            src_port,
            dst_port,
            protocol,
        )
    }

    /// Source address
    #[inline]
    pub fn src_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.src_ip)
    }

    /// Destination address
    #[inline]
    pub fn dst_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.dst_ip)
    }

    /// Reply-direction key
    #[inline(always)]
    pub const fn reverse(&self) -> Self {
        Self::new(self.dst_ip, self.src_ip, self.dst_port, self.src_port, self.protocol)
    }

    /// FNV-1a over the five fields, used for shard selection
    #[inline(always)]
    pub fn fnv_hash(&self) -> u64 {
        const FNV_OFFSET: u64 = 0xcbf29ce484222325;
        const FNV_PRIME: u64 = 0x100000001b3;

        let mut h = FNV_OFFSET;
        let mut mix = |bytes: &[u8]| {
            for &byte in bytes {
                h ^= byte as u64;
                h = h.wrapping_mul(FNV_PRIME);
            }
        };
        mix(&self.src_ip.to_be_bytes());
        mix(&self.dst_ip.to_be_bytes());
        mix(&self.src_port.to_be_bytes());
        mix(&self.dst_port.to_be_bytes());
        mix(&[self.protocol]);

        h
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} proto={}",
            self.src_addr(),
            self.src_port,
            self.dst_addr(),
            self.dst_port,
            self.protocol
        )
    }
}

/// TCP header flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct TcpFlags(u8);

impl TcpFlags {
    /// FIN
    pub const FIN: u8 = 0x01;
    /// SYN
    pub const SYN: u8 = 0x02;
    /// RST
    pub const RST: u8 = 0x04;
    /// PSH
    pub const PSH: u8 = 0x08;
    /// ACK
    pub const ACK: u8 = 0x10;

    /// Wrap raw flag bits
    #[inline(always)]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw flag bits
    #[inline(always)]
    pub const fn bits(&self) -> u8 {
        self.0
    }

    /// Check if flag is set
    #[inline(always)]
    pub const fn has(&self, flag: u8) -> bool {
        self.0 & flag != 0
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SessionState {
    /// First packet seen
    #[default]
    New = 0,
    /// More than one packet seen
    Established = 1,
    /// FIN observed
    Closing = 2,
    /// RST observed
    Closed = 3,
}

/// TCP connection state (recorded, never enforced)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TcpState {
    /// No connection, or reset
    #[default]
    Closed = 0,
    /// SYN seen
    SynSent = 1,
    /// SYN+ACK seen
    SynRecv = 2,
    /// Handshake completed
    Established = 3,
    /// First FIN seen
    FinWait1 = 4,
    /// Our FIN acknowledged
    FinWait2 = 5,
    /// Peer closed its side
    CloseWait = 6,
    /// Both sides closing at once
    Closing = 7,
    /// Waiting for the final ACK
    LastAck = 8,
    /// Closed, lingering
    TimeWait = 9,
}

impl TcpState {
    /// Next state after observing `flags` on this flow's direction
    pub fn advance(self, flags: TcpFlags) -> Self {
        if flags.has(TcpFlags::RST) {
            return Self::Closed;
        }
        if flags.has(TcpFlags::SYN) {
            return if flags.has(TcpFlags::ACK) {
                Self::SynRecv
            } else {
                Self::SynSent
            };
        }
        if flags.has(TcpFlags::FIN) {
            return match self {
                Self::FinWait1 | Self::FinWait2 | Self::Closing => Self::Closing,
                Self::CloseWait => Self::LastAck,
                _ => Self::FinWait1,
            };
        }
        if flags.has(TcpFlags::ACK) {
            return match self {
                Self::SynSent | Self::SynRecv => Self::Established,
                Self::FinWait1 => Self::FinWait2,
                Self::Closing => Self::TimeWait,
                other => other,
            };
        }
        self
    }
}

/// Result of classifying one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedPacket {
    /// Flow identity
    pub key: FlowKey,
    /// Frame length in bytes
    pub len: u32,
    /// TCP flags, if the packet is TCP
    pub tcp_flags: Option<TcpFlags>,
}

impl ParsedPacket {
    /// Parse an Ethernet frame carrying IPv4.
    ///
    /// TCP and UDP headers must be complete; other protocols get zero ports.
    #[inline]
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let eth = header(data, 0, ETH_HLEN)?;
        if u16::from_be_bytes([eth[12], eth[13]]) != ETH_P_IP {
            return Err(ParseError::NotIpv4);
        }

        let ip = header(data, ETH_HLEN, IPV4_MIN_HLEN)?;
        if ip[0] >> 4 != 4 {
            return Err(ParseError::NotIpv4);
        }
        let ihl = ((ip[0] & 0x0f) as usize) * 4;
        if ihl < IPV4_MIN_HLEN {
            return Err(ParseError::NotIpv4);
        }

        let protocol = ip[9];
        let src_ip = u32::from_be_bytes([ip[12], ip[13], ip[14], ip[15]]);
        let dst_ip = u32::from_be_bytes([ip[16], ip[17], ip[18], ip[19]]);
        let l4_offset = ETH_HLEN + ihl;

        let (src_port, dst_port, tcp_flags) = match protocol {
            IPPROTO_TCP => {
                let tcp = header(data, l4_offset, TCP_HLEN)?;
                (
                    u16::from_be_bytes([tcp[0], tcp[1]]),
                    u16::from_be_bytes([tcp[2], tcp[3]]),
                    Some(TcpFlags::from_bits(tcp[13])),
                )
            }
            IPPROTO_UDP => {
                let udp = header(data, l4_offset, UDP_HLEN)?;
                (
                    u16::from_be_bytes([udp[0], udp[1]]),
                    u16::from_be_bytes([udp[2], udp[3]]),
                    None,
                )
            }
            _ => (0, 0, None),
        };

        Ok(Self {
            key: FlowKey::new(src_ip, dst_ip, src_port, dst_port, protocol),
            len: data.len().min(u32::MAX as usize) as u32,
            tcp_flags,
        })
    }
}

/// Extract the flow key of an Ethernet/IPv4 frame
#[inline]
pub fn extract(data: &[u8]) -> Result<FlowKey, ParseError> {
    ParsedPacket::parse(data).map(|p| p.key)
}

#[inline(always)]
fn header(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let end = offset + len;
    data.get(offset..end).ok_or(ParseError::Truncated {
        needed: end,
        available: data.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn frame(protocol: u8, l4: &[u8]) -> Vec<u8> {
        let mut pkt = vec![
            // Ethernet
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // dst mac
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // src mac
            0x08, 0x00, // IPv4
            // IPv4
            0x45, 0x00, 0x00, 0x28, // version, ihl, len
            0x00, 0x00, 0x00, 0x00, // id, flags, frag
            0x40, protocol, 0x00, 0x00, // ttl, protocol, checksum
            0xc0, 0xa8, 0x01, 0x01, // src: 192.168.1.1
            0x0a, 0x00, 0x00, 0x01, // dst: 10.0.0.1
        ];
        pkt.extend_from_slice(l4);
        pkt
    }

    fn tcp_header(flags: u8) -> [u8; 20] {
        [
            0x30, 0x39, // src port: 12345
            0x01, 0xbb, // dst port: 443
            0x00, 0x00, 0x00, 0x00, // seq
            0x00, 0x00, 0x00, 0x00, // ack
            0x50, flags, 0x00, 0x00, // offset, flags, window
            0x00, 0x00, 0x00, 0x00, // checksum, urgent
        ]
    }

    #[test]
    fn test_parse_tcp() {
        let pkt = frame(IPPROTO_TCP, &tcp_header(TcpFlags::SYN));
        let parsed = ParsedPacket::parse(&pkt).expect("parse failed");

        assert_eq!(parsed.key.src_addr(), Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(parsed.key.dst_addr(), Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(parsed.key.src_port, 12345);
        assert_eq!(parsed.key.dst_port, 443);
        assert_eq!(parsed.key.protocol, IPPROTO_TCP);
        assert_eq!(parsed.len, 54);
        assert_eq!(parsed.tcp_flags, Some(TcpFlags::from_bits(TcpFlags::SYN)));
    }

    #[test]
    fn test_parse_udp() {
        let udp = [0x00, 0x35, 0xd4, 0x31, 0x00, 0x08, 0x00, 0x00];
        let key = extract(&frame(IPPROTO_UDP, &udp)).unwrap();

        assert_eq!(key.src_port, 53);
        assert_eq!(key.dst_port, 54321);
        assert_eq!(key.protocol, IPPROTO_UDP);
    }

    #[test]
    fn test_other_protocol_has_zero_ports() {
        let icmp = [0x08, 0x00, 0xf7, 0xff];
        let key = extract(&frame(IPPROTO_ICMP, &icmp)).unwrap();

        assert_eq!(key.src_port, 0);
        assert_eq!(key.dst_port, 0);
        assert_eq!(key.protocol, IPPROTO_ICMP);
        assert_eq!(key.src_ip, 0xC0A80101);
    }

    #[test]
    fn test_ip_options_shift_l4() {
        let mut pkt = frame(IPPROTO_UDP, &[]);
        pkt[ETH_HLEN] = 0x46; // ihl = 6 words
        pkt.extend_from_slice(&[0x01, 0x01, 0x01, 0x01]); // options
        pkt.extend_from_slice(&[0x00, 0x50, 0x1f, 0x90, 0x00, 0x08, 0x00, 0x00]);

        let key = extract(&pkt).unwrap();
        assert_eq!(key.src_port, 80);
        assert_eq!(key.dst_port, 8080);
    }

    #[test]
    fn test_not_ipv4() {
        let mut pkt = frame(IPPROTO_TCP, &tcp_header(0));
        pkt[12] = 0x86;
        pkt[13] = 0xdd;
        assert_eq!(extract(&pkt), Err(ParseError::NotIpv4));

        let mut pkt = frame(IPPROTO_TCP, &tcp_header(0));
        pkt[ETH_HLEN] = 0x65; // version 6 in an IPv4 ethertype
        assert_eq!(extract(&pkt), Err(ParseError::NotIpv4));

        let mut pkt = frame(IPPROTO_TCP, &tcp_header(0));
        pkt[ETH_HLEN] = 0x44; // ihl below minimum
        assert_eq!(extract(&pkt), Err(ParseError::NotIpv4));
    }

    #[test]
    fn test_truncated_at_every_boundary() {
        let full = frame(IPPROTO_TCP, &tcp_header(TcpFlags::ACK));
        assert_eq!(full.len(), 54);

        for len in 0..full.len() {
            match extract(&full[..len]) {
                Err(ParseError::Truncated { needed, available }) => {
                    assert_eq!(available, len);
                    assert!(needed > len);
                    assert!(needed == 14 || needed == 34 || needed == 54);
                }
                other => panic!("len {len}: unexpected {other:?}"),
            }
        }
        assert!(extract(&full).is_ok());
    }

    #[test]
    fn test_udp_truncated() {
        let pkt = frame(IPPROTO_UDP, &[0x00, 0x35, 0x00, 0x35]);
        assert_eq!(
            extract(&pkt),
            Err(ParseError::Truncated {
                needed: 42,
                available: 38
            })
        );
    }

    #[test]
    fn test_flow_key_hash() {
        let key1 = FlowKey::new(0xC0A80101, 0x08080808, 12345, 443, 6);
        let key2 = FlowKey::new(0xC0A80101, 0x08080808, 12345, 443, 6);
        let key3 = FlowKey::new(0xC0A80102, 0x08080808, 12345, 443, 6);

        assert_eq!(key1.fnv_hash(), key2.fnv_hash());
        assert_ne!(key1.fnv_hash(), key3.fnv_hash());
        assert_eq!(key1.reverse().reverse(), key1);
    }

    #[test]
    fn test_flow_key_display() {
        let key = FlowKey::from_v4(
            Ipv4Addr::new(1, 1, 1, 1),
            Ipv4Addr::new(2, 2, 2, 2),
            80,
            443,
            IPPROTO_TCP,
        );
        assert_eq!(key.to_string(), "1.1.1.1:80 -> 2.2.2.2:443 proto=6");
    }

    #[test]
    fn test_tcp_state_handshake() {
        let syn = TcpFlags::from_bits(TcpFlags::SYN);
        let ack = TcpFlags::from_bits(TcpFlags::ACK);
        let fin = TcpFlags::from_bits(TcpFlags::FIN | TcpFlags::ACK);
        let rst = TcpFlags::from_bits(TcpFlags::RST);

        let s = TcpState::Closed.advance(syn);
        assert_eq!(s, TcpState::SynSent);
        let s = s.advance(ack);
        assert_eq!(s, TcpState::Established);
        let s = s.advance(fin);
        assert_eq!(s, TcpState::FinWait1);
        assert_eq!(s.advance(ack), TcpState::FinWait2);
        assert_eq!(TcpState::Established.advance(rst), TcpState::Closed);
    }

    proptest! {
        #[test]
        fn parse_never_panics(data in proptest::collection::vec(any::<u8>(), 0..128)) {
            let _ = ParsedPacket::parse(&data);
        }

        #[test]
        fn parse_reports_header_fields(
            src in any::<u32>(),
            dst in any::<u32>(),
            sport in any::<u16>(),
            dport in any::<u16>(),
        ) {
            let mut pkt = frame(IPPROTO_TCP, &tcp_header(0));
            pkt[26..30].copy_from_slice(&src.to_be_bytes());
            pkt[30..34].copy_from_slice(&dst.to_be_bytes());
            pkt[34..36].copy_from_slice(&sport.to_be_bytes());
            pkt[36..38].copy_from_slice(&dport.to_be_bytes());

            let key = extract(&pkt).unwrap();
            prop_assert_eq!(key, FlowKey::new(src, dst, sport, dport, IPPROTO_TCP));
        }
    }
}
