//! Multi-dimensional packet/message tallies.
//!
//! Shared across every capture interface task, so all mutation goes through
//! a lock-free `fetch_add` on pre-existing rows; row creation is the only
//! operation that needs the map's write lock.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// Dimension a row is keyed on: one interface/src-port/dst-port/host tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub interface: String,
    pub src_port: u16,
    pub dst_port: u16,
    pub host: String,
}

#[derive(Debug, Default)]
struct Row {
    tcp_packets: AtomicU64,
    http_requests: AtomicU64,
    http_responses: AtomicU64,
    tls_hello: AtomicU64,
    http2_prefaces: AtomicU64,
    unparsed: AtomicU64,
}

/// A read-only snapshot of one [`Row`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowSnapshot {
    pub tcp_packets: u64,
    pub http_requests: u64,
    pub http_responses: u64,
    pub tls_hello: u64,
    pub http2_prefaces: u64,
    pub unparsed: u64,
}

impl RowSnapshot {
    fn volume(&self) -> u64 {
        self.http_requests + self.http_responses + self.tls_hello
    }
}

/// One row of the §6 "packets per port" report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortCounterRow {
    pub port: u16,
    pub tcp: u64,
    pub http_req: u64,
    pub http_resp: u64,
    pub tls_hello: u64,
    pub unparsed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopNEntry {
    pub key: String,
    pub volume: u64,
}

/// Per-dimension row cap; beyond this, new keys are rejected and the
/// overflow flag is set (spec §3: "overflow past a per-dimension cap is
/// reported as a boolean flag plus the cap").
const DEFAULT_ROW_CAP: usize = 10_000;

pub struct PacketCounter {
    rows: RwLock<HashMap<CounterKey, Row>>,
    cap: usize,
    overflowed: std::sync::atomic::AtomicBool,
}

impl Default for PacketCounter {
    fn default() -> Self {
        Self::new(DEFAULT_ROW_CAP)
    }
}

impl PacketCounter {
    pub fn new(cap: usize) -> Self {
        PacketCounter {
            rows: RwLock::new(HashMap::new()),
            cap,
            overflowed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed.load(Ordering::Relaxed)
    }

    fn with_row<F: FnOnce(&Row)>(&self, key: &CounterKey, f: F) {
        {
            let rows = self.rows.read().unwrap();
            if let Some(row) = rows.get(key) {
                f(row);
                return;
            }
        }
        let mut rows = self.rows.write().unwrap();
        if rows.len() >= self.cap && !rows.contains_key(key) {
            self.overflowed.store(true, Ordering::Relaxed);
            return;
        }
        let row = rows.entry(key.clone()).or_default();
        f(row);
    }

    pub fn incr_tcp_packet(&self, key: &CounterKey) {
        self.with_row(key, |r| {
            r.tcp_packets.fetch_add(1, Ordering::Relaxed);
        });
    }

    pub fn incr_http_request(&self, key: &CounterKey) {
        self.with_row(key, |r| {
            r.http_requests.fetch_add(1, Ordering::Relaxed);
        });
    }

    pub fn incr_http_response(&self, key: &CounterKey) {
        self.with_row(key, |r| {
            r.http_responses.fetch_add(1, Ordering::Relaxed);
        });
    }

    pub fn incr_tls_hello(&self, key: &CounterKey) {
        self.with_row(key, |r| {
            r.tls_hello.fetch_add(1, Ordering::Relaxed);
        });
    }

    pub fn incr_http2_preface(&self, key: &CounterKey) {
        self.with_row(key, |r| {
            r.http2_prefaces.fetch_add(1, Ordering::Relaxed);
        });
    }

    pub fn incr_unparsed(&self, key: &CounterKey, bytes: u64) {
        self.with_row(key, |r| {
            r.unparsed.fetch_add(bytes, Ordering::Relaxed);
        });
    }

    fn snapshot(&self) -> Vec<(CounterKey, RowSnapshot)> {
        self.rows
            .read()
            .unwrap()
            .iter()
            .map(|(k, v)| {
                (
                    k.clone(),
                    RowSnapshot {
                        tcp_packets: v.tcp_packets.load(Ordering::Relaxed),
                        http_requests: v.http_requests.load(Ordering::Relaxed),
                        http_responses: v.http_responses.load(Ordering::Relaxed),
                        tls_hello: v.tls_hello.load(Ordering::Relaxed),
                        http2_prefaces: v.http2_prefaces.load(Ordering::Relaxed),
                        unparsed: v.unparsed.load(Ordering::Relaxed),
                    },
                )
            })
            .collect()
    }

    /// Per-port aggregate view across all interfaces, used both by the
    /// §6 counters dump and by the telemetry reporter's top-port ranking.
    pub fn per_port(&self) -> Vec<PortCounterRow> {
        let mut by_port: HashMap<u16, PortCounterRow> = HashMap::new();
        for (key, snap) in self.snapshot() {
            for port in [key.src_port, key.dst_port] {
                let row = by_port.entry(port).or_insert(PortCounterRow {
                    port,
                    tcp: 0,
                    http_req: 0,
                    http_resp: 0,
                    tls_hello: 0,
                    unparsed: 0,
                });
                row.tcp += snap.tcp_packets;
                row.http_req += snap.http_requests;
                row.http_resp += snap.http_responses;
                row.tls_hello += snap.tls_hello;
                row.unparsed += snap.unparsed;
            }
        }
        let mut rows: Vec<_> = by_port.into_values().collect();
        rows.sort_by_key(|r| r.port);
        rows
    }

    /// Top ports by TCP packet volume, descending, stopping once cumulative
    /// volume would exceed the observed total (spec §4.9 "ephemeral-port
    /// double counting cap"), subject to a minimum of two rows and a 3%
    /// cutoff threshold.
    pub fn top_ports(&self, k: usize) -> Vec<TopNEntry> {
        let mut rows = self.per_port();
        rows.sort_by(|a, b| b.tcp.cmp(&a.tcp));
        let total: u64 = rows.iter().map(|r| r.tcp).sum();
        top_n_cumulative(
            rows.into_iter()
                .map(|r| TopNEntry {
                    key: r.port.to_string(),
                    volume: r.tcp,
                }),
            total,
            k,
        )
    }

    /// Top hosts by HTTP+TLS volume, descending, cut at 80% cumulative
    /// coverage (spec §4.9), subject to the same minimum-two / 3% rule.
    pub fn top_hosts(&self, k: usize) -> Vec<TopNEntry> {
        let mut by_host: HashMap<String, u64> = HashMap::new();
        for (key, snap) in self.snapshot() {
            *by_host.entry(key.host.clone()).or_insert(0) += snap.volume();
        }
        let mut rows: Vec<TopNEntry> = by_host
            .into_iter()
            .map(|(key, volume)| TopNEntry { key, volume })
            .collect();
        rows.sort_by(|a, b| b.volume.cmp(&a.volume));
        let total: u64 = rows.iter().map(|r| r.volume).sum();
        top_n_coverage(rows, total, k, 0.80)
    }

    /// Sum of a per-interface TCP total, for the counter-consistency
    /// property test (spec §8 item 7).
    pub fn interface_tcp_total(&self, interface: &str) -> u64 {
        self.snapshot()
            .into_iter()
            .filter(|(k, _)| k.interface == interface)
            .map(|(_, s)| s.tcp_packets)
            .sum()
    }
}

/// Ports variant: stop once cumulative volume would exceed `total`
/// (avoiding ephemeral-port double counting), min two rows, 3% cutoff.
fn top_n_cumulative(rows: impl Iterator<Item = TopNEntry>, total: u64, k: usize) -> Vec<TopNEntry> {
    let threshold = (total as f64 * 0.03) as u64;
    let mut out = Vec::new();
    let mut cumulative = 0u64;
    for row in rows {
        if out.len() >= k {
            break;
        }
        if out.len() >= 2 && row.volume < threshold {
            break;
        }
        if out.len() >= 2 && cumulative > total {
            break;
        }
        cumulative += row.volume;
        out.push(row);
    }
    out
}

/// Hosts variant: cut once cumulative coverage crosses `coverage_ratio` of
/// `total`, min two rows, 3% cutoff.
fn top_n_coverage(rows: Vec<TopNEntry>, total: u64, k: usize, coverage_ratio: f64) -> Vec<TopNEntry> {
    let threshold = (total as f64 * 0.03) as u64;
    let coverage_target = (total as f64 * coverage_ratio) as u64;
    let mut out = Vec::new();
    let mut cumulative = 0u64;
    for row in rows {
        if out.len() >= k {
            break;
        }
        if out.len() >= 2 && (row.volume < threshold || cumulative >= coverage_target) {
            break;
        }
        cumulative += row.volume;
        out.push(row);
    }
    out
}
