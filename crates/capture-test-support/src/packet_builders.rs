//! Helpers for constructing synthetic packets and flow addresses in tests
//! without hand-writing `SocketAddrV4` parses at every call site.

use capture_core::models::{Packet, TcpFlagsSet};
use std::net::SocketAddrV4;

pub fn addr(s: &str) -> SocketAddrV4 {
    s.parse().unwrap_or_else(|_| panic!("invalid socket address literal: {s}"))
}

/// A plain data segment, no SYN/FIN/RST.
pub fn data_packet(src: &str, dst: &str, seq: u32, payload: &[u8]) -> Packet {
    Packet::synthetic(0, addr(src), addr(dst), seq, TcpFlagsSet::default(), payload)
}

pub fn syn_packet(src: &str, dst: &str, seq: u32) -> Packet {
    let flags = TcpFlagsSet { syn: true, ..TcpFlagsSet::default() };
    Packet::synthetic(0, addr(src), addr(dst), seq, flags, &[])
}

pub fn fin_packet(src: &str, dst: &str, seq: u32) -> Packet {
    let flags = TcpFlagsSet { fin: true, ..TcpFlagsSet::default() };
    Packet::synthetic(0, addr(src), addr(dst), seq, flags, &[])
}

/// A minimal well-formed HTTP/1.1 GET request to `path` on `host`.
pub fn http_get_request(src: &str, dst: &str, seq: u32, host: &str, path: &str) -> Packet {
    let body = format!("GET {path} HTTP/1.1\r\nHost: {host}\r\n\r\n");
    data_packet(src, dst, seq, body.as_bytes())
}

/// A minimal well-formed HTTP/1.1 200 response with `body` as the payload.
pub fn http_200_response(src: &str, dst: &str, seq: u32, body: &str) -> Packet {
    let msg = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );
    data_packet(src, dst, seq, msg.as_bytes())
}
