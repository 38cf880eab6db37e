//! TCP segment reassembly: per-direction ordering with a bounded
//! out-of-order window, and the flow table that owns a pair of
//! [`HalfStream`]s per [`FlowKey`].
//!
//! The flow table is a flat arena keyed by `FlowKey`; a `HalfStream` only
//! ever holds sequence numbers and bytes, never a pointer back to its
//! owning flow, so the two halves can be borrowed independently.

use crate::models::{Direction, FlowKey};
use std::collections::{BTreeMap, HashMap};

/// Out-of-order segments held per half-stream before the gap is declared
/// lost and skipped. Keeps a single slow/missing segment from growing a
/// half-stream's footprint without bound.
const MAX_OUT_OF_ORDER_BYTES: usize = 1 << 20;

/// One TCP direction's reassembly state.
#[derive(Debug, Default)]
pub struct HalfStream {
    base_seq: Option<u32>,
    buf: Vec<u8>,
    out_of_order: BTreeMap<u32, Vec<u8>>,
    out_of_order_bytes: usize,
    fin_seen: bool,
    gap_bytes_skipped: u64,
    duplicate_bytes: u64,
}

impl HalfStream {
    /// Feed one segment's sequence number and payload. Returns the number
    /// of newly-contiguous bytes appended to [`HalfStream::buffered`].
    pub fn on_segment(&mut self, seq: u32, data: &[u8]) -> usize {
        if data.is_empty() {
            return 0;
        }
        let base = *self.base_seq.get_or_insert(seq);
        let before = self.buf.len();

        let rel = seq.wrapping_sub(base) as i64;
        if rel < 0 {
            // Fully or partially before `base`: keep only the unseen tail, if any.
            let overlap = (-rel) as usize;
            if overlap >= data.len() {
                self.duplicate_bytes += data.len() as u64;
                return 0;
            }
            self.duplicate_bytes += overlap as u64;
            self.append_contiguous(&data[overlap..]);
        } else if rel as usize == self.buf.len() {
            self.append_contiguous(data);
        } else if (rel as usize) < self.buf.len() {
            // Overlaps the tail of what we already hold.
            let overlap = self.buf.len() - rel as usize;
            if overlap >= data.len() {
                self.duplicate_bytes += data.len() as u64;
                return 0;
            }
            self.duplicate_bytes += overlap as u64;
            self.append_contiguous(&data[overlap..]);
        } else {
            self.stash_out_of_order(seq, data);
        }
        self.drain_ready();
        self.enforce_gap_cap();
        self.buf.len() - before
    }

    fn append_contiguous(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    fn stash_out_of_order(&mut self, seq: u32, data: &[u8]) {
        self.out_of_order_bytes += data.len();
        self.out_of_order
            .entry(seq)
            .and_modify(|existing| {
                if data.len() > existing.len() {
                    *existing = data.to_vec();
                }
            })
            .or_insert_with(|| data.to_vec());
    }

    /// Pull any stashed out-of-order segments that have become contiguous.
    fn drain_ready(&mut self) {
        loop {
            let Some(base) = self.base_seq else { return };
            let next = base.wrapping_add(self.buf.len() as u32);
            let Some(seg) = self.out_of_order.remove(&next) else {
                return;
            };
            self.out_of_order_bytes -= seg.len();
            self.buf.extend_from_slice(&seg);
        }
    }

    /// If the out-of-order window has grown past its cap, the missing gap
    /// is declared lost: jump over it to the earliest stashed segment so
    /// reassembly can keep moving.
    fn enforce_gap_cap(&mut self) {
        if self.out_of_order_bytes <= MAX_OUT_OF_ORDER_BYTES {
            return;
        }
        let Some(base) = self.base_seq else { return };
        let next = base.wrapping_add(self.buf.len() as u32);
        if let Some((&lowest_seq, _)) = self.out_of_order.iter().next() {
            let gap = lowest_seq.wrapping_sub(next);
            self.gap_bytes_skipped += u64::from(gap);
            self.base_seq = Some(lowest_seq.wrapping_sub(self.buf.len() as u32));
            self.drain_ready();
        }
    }

    /// Bytes ready for parsing, in stream order.
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    /// Remove `n` bytes from the front after a parser has consumed them.
    pub fn consume(&mut self, n: usize) {
        self.buf.drain(..n.min(self.buf.len()));
    }

    pub fn mark_fin(&mut self) {
        self.fin_seen = true;
    }

    pub fn fin_seen(&self) -> bool {
        self.fin_seen
    }

    pub fn gap_bytes_skipped(&self) -> u64 {
        self.gap_bytes_skipped
    }

    pub fn duplicate_bytes(&self) -> u64 {
        self.duplicate_bytes
    }
}

/// A TCP flow's pair of half-streams, keyed by unordered [`FlowKey`].
pub struct Flow {
    pub key: FlowKey,
    pub a_to_b: HalfStream,
    pub b_to_a: HalfStream,
    pub last_seen_ms: i64,
}

impl Flow {
    fn new(key: FlowKey, now_ms: i64) -> Self {
        Flow {
            key,
            a_to_b: HalfStream::default(),
            b_to_a: HalfStream::default(),
            last_seen_ms: now_ms,
        }
    }

    pub fn half_mut(&mut self, dir: Direction) -> &mut HalfStream {
        match dir {
            Direction::AToB => &mut self.a_to_b,
            Direction::BToA => &mut self.b_to_a,
        }
    }

    pub fn both_closed(&self) -> bool {
        self.a_to_b.fin_seen() && self.b_to_a.fin_seen()
    }
}

/// Flat arena of live flows, keyed by unordered `FlowKey`.
#[derive(Default)]
pub struct FlowTable {
    flows: HashMap<FlowKey, Flow>,
}

impl FlowTable {
    pub fn get_or_create(&mut self, key: FlowKey, now_ms: i64) -> &mut Flow {
        self.flows
            .entry(key)
            .or_insert_with_key(|k| Flow::new(*k, now_ms))
    }

    pub fn touch(&mut self, key: &FlowKey, now_ms: i64) {
        if let Some(flow) = self.flows.get_mut(key) {
            flow.last_seen_ms = now_ms;
        }
    }

    pub fn remove(&mut self, key: &FlowKey) -> Option<Flow> {
        self.flows.remove(key)
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Flows untouched for longer than `idle_timeout_ms`, for the idle-flow
    /// eviction sweep (spec §4.3).
    pub fn idle_keys(&self, now_ms: i64, idle_timeout_ms: i64) -> Vec<FlowKey> {
        self.flows
            .iter()
            .filter(|(_, f)| now_ms - f.last_seen_ms >= idle_timeout_ms)
            .map(|(k, _)| k.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_order_segments_concatenate() {
        let mut h = HalfStream::default();
        h.on_segment(0, b"hello ");
        h.on_segment(6, b"world");
        assert_eq!(h.buffered(), b"hello world");
    }

    #[test]
    fn out_of_order_segment_is_held_then_drained_in_order() {
        let mut h = HalfStream::default();
        h.on_segment(0, b"hello ");
        h.on_segment(11, b"!"); // arrives before the gap is filled
        assert_eq!(h.buffered(), b"hello ");
        h.on_segment(6, b"world");
        assert_eq!(h.buffered(), b"hello world!");
    }

    #[test]
    fn duplicate_segment_is_dropped() {
        let mut h = HalfStream::default();
        h.on_segment(0, b"hello ");
        h.on_segment(0, b"hello ");
        assert_eq!(h.buffered(), b"hello ");
        assert_eq!(h.duplicate_bytes(), 6);
    }

    #[test]
    fn partially_overlapping_retransmit_only_appends_the_new_tail() {
        let mut h = HalfStream::default();
        h.on_segment(0, b"hello");
        h.on_segment(3, b"lo world");
        assert_eq!(h.buffered(), b"hello world");
    }

    #[test]
    fn consume_advances_front_without_disturbing_later_bytes() {
        let mut h = HalfStream::default();
        h.on_segment(0, b"hello world");
        h.consume(6);
        assert_eq!(h.buffered(), b"world");
    }

    #[test]
    fn flow_table_is_keyed_regardless_of_endpoint_order() {
        let mut table = FlowTable::default();
        let a: std::net::SocketAddrV4 = "10.0.0.1:40001".parse().unwrap();
        let b: std::net::SocketAddrV4 = "10.0.0.2:80".parse().unwrap();
        let k1 = FlowKey::new(a, b);
        let k2 = FlowKey::new(b, a);
        table.get_or_create(k1, 0).a_to_b.on_segment(0, b"x");
        assert_eq!(table.len(), 1);
        table.get_or_create(k2, 0);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn idle_keys_reports_flows_past_the_timeout() {
        let mut table = FlowTable::default();
        let a: std::net::SocketAddrV4 = "10.0.0.1:40001".parse().unwrap();
        let b: std::net::SocketAddrV4 = "10.0.0.2:80".parse().unwrap();
        table.get_or_create(FlowKey::new(a, b), 1_000);
        assert!(table.idle_keys(1_000 + 60_000, 60_000).len() == 1);
        assert!(table.idle_keys(1_000 + 1_000, 60_000).is_empty());
    }
}
