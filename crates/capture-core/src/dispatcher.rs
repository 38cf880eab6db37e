//! Feeds reassembled bytes through the factory priority list and turns the
//! resulting verdicts into dispatch events plus counter updates.

use crate::models::{CounterKey, Direction, FlowKey, Packet, PacketCounter};
use crate::parser::{self, FactoryKind, ParsedContent, Verdict, FACTORY_PRIORITY};
use crate::reassembly::{FlowTable, HalfStream};
use std::time::{SystemTime, UNIX_EPOCH};

/// One piece of parsed content attributed to a flow direction.
#[derive(Debug)]
pub struct DispatchEvent {
    pub flow_key: FlowKey,
    pub direction: Direction,
    pub content: ParsedContent,
}

pub struct Dispatcher {
    flows: FlowTable,
    counters: std::sync::Arc<PacketCounter>,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl Dispatcher {
    pub fn new(counters: std::sync::Arc<PacketCounter>) -> Self {
        Dispatcher {
            flows: FlowTable::default(),
            counters,
        }
    }

    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    /// Expire flows that have been idle past `idle_timeout_ms`, returning
    /// their keys (spec §4.3 flow-table bound) so the caller can flush any
    /// request-only exchanges still pending on them.
    pub fn sweep_idle_flows(&mut self, idle_timeout_ms: i64) -> Vec<FlowKey> {
        let now = now_ms();
        let stale = self.flows.idle_keys(now, idle_timeout_ms);
        for key in &stale {
            self.flows.remove(key);
        }
        if !stale.is_empty() {
            tracing::debug!(evicted = stale.len(), "swept idle flows");
        }
        stale
    }

    /// Feed one captured packet through flow demux, reassembly, and the
    /// parser priority list, returning every complete message produced.
    pub fn on_packet(&mut self, interface: &str, pkt: &Packet) -> Vec<DispatchEvent> {
        let src = pkt.transport.src;
        let dst = pkt.transport.dst;
        let key = FlowKey::new(src, dst);
        let direction = key.direction_of(src, dst);
        let now = now_ms();
        let flow = self.flows.get_or_create(key.clone(), now);
        flow.last_seen_ms = now;

        let counter_key = CounterKey {
            interface: interface.to_string(),
            src_port: src.port(),
            dst_port: dst.port(),
            host: String::new(),
        };
        self.counters.incr_tcp_packet(&counter_key);

        let half = flow.half_mut(direction);
        if pkt.transport.flags.fin || pkt.transport.flags.rst {
            half.mark_fin();
        }
        half.on_segment(pkt.transport.seq, pkt.payload());

        let is_end = half.fin_seen();
        let contents = run_parse_loop(half, &self.counters, &counter_key, is_end);
        contents
            .into_iter()
            .map(|content| DispatchEvent {
                flow_key: key.clone(),
                direction,
                content,
            })
            .collect()
    }
}

fn run_parse_loop(
    half: &mut HalfStream,
    counters: &PacketCounter,
    counter_key: &CounterKey,
    is_end: bool,
) -> Vec<ParsedContent> {
    let mut out = Vec::new();
    loop {
        if half.buffered().is_empty() {
            break;
        }
        let buf = half.buffered().to_vec();
        let mut accepted: Option<(ParsedContent, usize)> = None;
        let mut need_more = false;
        let mut reject_consumed = 0usize;

        for kind in FACTORY_PRIORITY {
            match parser::probe(kind, &buf, is_end) {
                Verdict::Accept { content, consumed } => {
                    accepted = Some((content, consumed.max(1)));
                    break;
                }
                Verdict::NeedMoreData { .. } => need_more = true,
                Verdict::Reject { consumed } => {
                    reject_consumed = reject_consumed.max(consumed.max(1));
                }
            }
        }

        if let Some((content, consumed)) = accepted {
            record_accept(counters, counter_key, &content);
            half.consume(consumed);
            out.push(content);
            continue;
        }

        if need_more && !is_end {
            break;
        }

        // Every factory rejected (or rejected-at-end): drop the bytes and
        // resync on whatever follows.
        let drop = reject_consumed.max(1).min(buf.len());
        tracing::trace!(port = counter_key.dst_port, drop, "dropping unparsed bytes");
        counters.incr_unparsed(counter_key, drop as u64);
        half.consume(drop);
    }
    out
}

/// The host dimension isn't known until a request is actually parsed, so
/// the base key (stamped at packet-decode time with an empty host) is
/// widened here rather than threaded back through `on_packet`.
fn record_accept(counters: &PacketCounter, key: &CounterKey, content: &ParsedContent) {
    match content {
        ParsedContent::HttpRequest(req) => {
            counters.incr_http_request(&with_host(key, req.host.as_deref()));
        }
        ParsedContent::HttpResponse(_) => counters.incr_http_response(key),
        ParsedContent::Http2Preface => counters.incr_http2_preface(key),
        ParsedContent::TlsHello(kind, hello) => {
            let host = matches!(kind, crate::parser::TlsHelloKind::Client)
                .then(|| hello.sni.as_deref())
                .flatten();
            counters.incr_tls_hello(&with_host(key, host));
        }
        ParsedContent::DroppedBytes(n) => counters.incr_unparsed(key, *n as u64),
    }
}

fn with_host(key: &CounterKey, host: Option<&str>) -> CounterKey {
    match host {
        Some(h) if !h.is_empty() => CounterKey { host: h.to_string(), ..key.clone() },
        _ => key.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TcpFlagsSet;
    use std::sync::Arc;

    fn pkt(src: &str, dst: &str, seq: u32, flags: TcpFlagsSet, payload: &[u8]) -> Packet {
        Packet::synthetic(0, src.parse().unwrap(), dst.parse().unwrap(), seq, flags, payload)
    }

    #[test]
    fn a_complete_request_split_across_two_packets_is_recognized() {
        let counters = Arc::new(PacketCounter::default());
        let mut d = Dispatcher::new(counters.clone());
        let first = b"GET /status HTTP/1.1\r\nHost: ".to_vec();
        let second = b"svc.example\r\n\r\n".to_vec();

        let events = d.on_packet(
            "eth0",
            &pkt("10.0.0.1:40001", "10.0.0.2:80", 0, TcpFlagsSet::default(), &first),
        );
        assert!(events.is_empty());

        let events = d.on_packet(
            "eth0",
            &pkt(
                "10.0.0.1:40001",
                "10.0.0.2:80",
                first.len() as u32,
                TcpFlagsSet::default(),
                &second,
            ),
        );
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].content, ParsedContent::HttpRequest(_)));
    }

    #[test]
    fn junk_bytes_are_counted_unparsed_and_do_not_stall_the_flow() {
        let counters = Arc::new(PacketCounter::default());
        let mut d = Dispatcher::new(counters.clone());
        let junk = b"not a protocol at all, just noise".to_vec();
        let events = d.on_packet(
            "eth0",
            &pkt("10.0.0.1:40001", "10.0.0.2:80", 0, TcpFlagsSet::default(), &junk),
        );
        assert!(events.is_empty());
        let rows = counters.per_port();
        let row = rows.iter().find(|r| r.port == 80).unwrap();
        assert!(row.unparsed > 0);
    }

    #[test]
    fn idle_flows_are_swept_after_the_timeout() {
        let counters = Arc::new(PacketCounter::default());
        let mut d = Dispatcher::new(counters);
        d.on_packet(
            "eth0",
            &pkt("10.0.0.1:40001", "10.0.0.2:80", 0, TcpFlagsSet::default(), b"x"),
        );
        assert_eq!(d.flow_count(), 1);
        assert_eq!(d.sweep_idle_flows(0).len(), 1);
        assert_eq!(d.flow_count(), 0);
    }
}
