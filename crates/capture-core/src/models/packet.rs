//! Immutable captured packet plus its pre-decoded network/transport layers.
//!
//! Decoding happens once, at capture time, so every downstream stage (flow
//! demux, reassembly, dispatch) works off plain fields instead of
//! re-parsing raw bytes.

use bytes::Bytes;
use pnet::packet::Packet as PnetPacket;
use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::tcp::{TcpFlags, TcpPacket};
use std::net::SocketAddrV4;

/// Link-layer framing of the raw capture buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Ethernet,
    /// Raw IP (e.g. loopback, some tunnel interfaces): no link header.
    RawIp,
}

/// The subset of TCP header flags the reassembler and dispatcher care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TcpFlagsSet {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
    pub psh: bool,
}

impl TcpFlagsSet {
    fn from_raw(flags: u8) -> Self {
        TcpFlagsSet {
            syn: flags & TcpFlags::SYN != 0,
            ack: flags & TcpFlags::ACK != 0,
            fin: flags & TcpFlags::FIN != 0,
            rst: flags & TcpFlags::RST != 0,
            psh: flags & TcpFlags::PSH != 0,
        }
    }
}

/// Decoded IPv4 + TCP header fields, with the payload carried as a byte
/// range into the packet's raw buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportHeader {
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
    pub seq: u32,
    pub ack_no: u32,
    pub flags: TcpFlagsSet,
    pub payload_offset: usize,
    pub payload_len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("truncated {0} header")]
    Truncated(&'static str),
    #[error("unsupported ethertype")]
    UnsupportedEtherType,
    #[error("unsupported IP protocol (not TCP)")]
    NotTcp,
    #[error("not IPv4")]
    NotIpv4,
}

/// A single captured packet with its timestamp and decoded transport header.
#[derive(Debug, Clone)]
pub struct Packet {
    pub captured_at_ms: i64,
    pub link_type: LinkType,
    pub raw: Bytes,
    pub transport: TransportHeader,
}

impl Packet {
    /// Decode a raw capture buffer. Only Ethernet/IPv4/TCP is supported;
    /// anything else is rejected so the caller can count it separately
    /// from "TCP packets" rather than silently dropping it into the flow
    /// pipeline.
    pub fn decode(
        link_type: LinkType,
        captured_at_ms: i64,
        raw: Bytes,
    ) -> Result<Packet, DecodeError> {
        let ip_slice: &[u8] = match link_type {
            LinkType::Ethernet => {
                let eth = EthernetPacket::new(&raw).ok_or(DecodeError::Truncated("ethernet"))?;
                if eth.get_ethertype() != EtherTypes::Ipv4 {
                    return Err(DecodeError::UnsupportedEtherType);
                }
                &raw[EthernetPacket::minimum_packet_size()..]
            }
            LinkType::RawIp => &raw[..],
        };

        let ipv4 = Ipv4Packet::new(ip_slice).ok_or(DecodeError::Truncated("ipv4"))?;
        if ipv4.get_version() != 4 {
            return Err(DecodeError::NotIpv4);
        }
        if ipv4.get_next_level_protocol() != IpNextHeaderProtocols::Tcp {
            return Err(DecodeError::NotTcp);
        }
        let ihl_bytes = usize::from(ipv4.get_header_length()) * 4;
        let tcp_slice = ipv4
            .payload()
            .get(0..)
            .ok_or(DecodeError::Truncated("ipv4 payload"))?;
        let tcp = TcpPacket::new(tcp_slice).ok_or(DecodeError::Truncated("tcp"))?;

        let data_offset_bytes = usize::from(tcp.get_data_offset()) * 4;
        let tcp_total_len = tcp_slice.len();
        if data_offset_bytes > tcp_total_len {
            return Err(DecodeError::Truncated("tcp options"));
        }

        let link_header_len = raw.len() - ip_slice.len();
        let tcp_header_start = link_header_len + ihl_bytes;
        let payload_offset = tcp_header_start + data_offset_bytes;
        let payload_len = tcp_total_len - data_offset_bytes;

        let transport = TransportHeader {
            src: SocketAddrV4::new(ipv4.get_source(), tcp.get_source()),
            dst: SocketAddrV4::new(ipv4.get_destination(), tcp.get_destination()),
            seq: tcp.get_sequence(),
            ack_no: tcp.get_acknowledgement(),
            flags: TcpFlagsSet::from_raw(tcp.get_flags()),
            payload_offset,
            payload_len,
        };

        Ok(Packet {
            captured_at_ms,
            link_type,
            raw,
            transport,
        })
    }

    pub fn payload(&self) -> &[u8] {
        let start = self.transport.payload_offset;
        let end = start + self.transport.payload_len;
        &self.raw[start..end]
    }

    /// Build a packet directly from decoded fields, for tests and for
    /// synthetic injection (e.g. scenario fixtures in §8 of the spec).
    pub fn synthetic(
        captured_at_ms: i64,
        src: SocketAddrV4,
        dst: SocketAddrV4,
        seq: u32,
        flags: TcpFlagsSet,
        payload: &[u8],
    ) -> Packet {
        let raw = Bytes::copy_from_slice(payload);
        Packet {
            captured_at_ms,
            link_type: LinkType::RawIp,
            raw: raw.clone(),
            transport: TransportHeader {
                src,
                dst,
                seq,
                ack_no: 0,
                flags,
                payload_offset: 0,
                payload_len: raw.len(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_payload_round_trips() {
        let src = "10.0.0.1:40001".parse().unwrap();
        let dst = "10.0.0.2:80".parse().unwrap();
        let pkt = Packet::synthetic(0, src, dst, 1, TcpFlagsSet::default(), b"hello");
        assert_eq!(pkt.payload(), b"hello");
        assert_eq!(pkt.transport.src, src);
        assert_eq!(pkt.transport.dst, dst);
    }
}
