//! The ordered transformer pipeline a witness passes through between the
//! pairer and the redactor: count → exclude own backend traffic → host/path
//! allow/exclude → rate limit → sample → count → annotate.

mod rate_limiter;
mod sampler;

pub use rate_limiter::RateLimiter;
pub use sampler::Sampler;

use capture_protocol::Witness;
use regex::Regex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

pub struct HostPathFilter {
    include_hosts: Vec<Regex>,
    exclude_hosts: Vec<Regex>,
    include_paths: Vec<Regex>,
    exclude_paths: Vec<Regex>,
}

impl HostPathFilter {
    pub fn new(include_hosts: &[String], exclude_hosts: &[String], include_paths: &[String], exclude_paths: &[String]) -> Self {
        let compile = |patterns: &[String]| {
            patterns
                .iter()
                .filter(|p| {
                    if p.trim().is_empty() {
                        warn!(pattern = %p, "ignoring blank host/path filter pattern");
                        false
                    } else {
                        true
                    }
                })
                .filter_map(|p| Regex::new(p).ok())
                .collect()
        };
        HostPathFilter {
            include_hosts: compile(include_hosts),
            exclude_hosts: compile(exclude_hosts),
            include_paths: compile(include_paths),
            exclude_paths: compile(exclude_paths),
        }
    }

    fn passes(&self, host: &str, path: &str) -> bool {
        if self.exclude_hosts.iter().any(|re| re.is_match(host)) {
            return false;
        }
        if self.exclude_paths.iter().any(|re| re.is_match(path)) {
            return false;
        }
        if !self.include_hosts.is_empty() && !self.include_hosts.iter().any(|re| re.is_match(host)) {
            return false;
        }
        if !self.include_paths.is_empty() && !self.include_paths.iter().any(|re| re.is_match(path)) {
            return false;
        }
        true
    }
}

/// The collector's own traffic to the backend must never be re-captured
/// and re-submitted — that would feed the uploader its own HTTP calls.
pub struct SelfTrafficFilter {
    backend_host: String,
}

impl SelfTrafficFilter {
    pub fn new(base_url: &str) -> Self {
        let backend_host = base_url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .split('/')
            .next()
            .unwrap_or("")
            .split(':')
            .next()
            .unwrap_or("")
            .to_string();
        SelfTrafficFilter { backend_host }
    }

    fn passes(&self, host: &str) -> bool {
        !self.backend_host.is_empty() && !host.eq_ignore_ascii_case(&self.backend_host)
    }
}

#[derive(Default)]
pub struct ChainCounters {
    pub pre_filter_count: AtomicU64,
    pub post_filter_count: AtomicU64,
}

pub struct CollectorChain {
    self_traffic: SelfTrafficFilter,
    host_path: HostPathFilter,
    rate_limiter: RateLimiter,
    sampler: Sampler,
    counters: ChainCounters,
}

impl CollectorChain {
    pub fn new(
        backend_base_url: &str,
        include_hosts: &[String],
        exclude_hosts: &[String],
        include_paths: &[String],
        exclude_paths: &[String],
        rate_limit_per_sec: f64,
        sample_rate: f64,
    ) -> Self {
        CollectorChain {
            self_traffic: SelfTrafficFilter::new(backend_base_url),
            host_path: HostPathFilter::new(include_hosts, exclude_hosts, include_paths, exclude_paths),
            rate_limiter: RateLimiter::new(rate_limit_per_sec),
            sampler: Sampler::new(sample_rate),
            counters: ChainCounters::default(),
        }
    }

    /// Run one witness through the chain. `now_ms` drives both the rate
    /// limiter's token refill and the sampler's deterministic-from-id draw.
    pub fn process(&mut self, mut witness: Witness, now_ms: i64) -> Option<Witness> {
        self.counters.pre_filter_count.fetch_add(1, Ordering::Relaxed);

        if !self.self_traffic.passes(&witness.method.host) {
            return None;
        }
        if !self.host_path.passes(&witness.method.host, &witness.method.path_template) {
            return None;
        }
        if !self.rate_limiter.try_acquire(now_ms) {
            return None;
        }
        if !self.sampler.should_keep(witness.id) {
            return None;
        }

        self.counters.post_filter_count.fetch_add(1, Ordering::Relaxed);
        annotate(&mut witness, now_ms);
        Some(witness)
    }

    pub fn pre_filter_count(&self) -> u64 {
        self.counters.pre_filter_count.load(Ordering::Relaxed)
    }

    pub fn post_filter_count(&self) -> u64 {
        self.counters.post_filter_count.load(Ordering::Relaxed)
    }
}

/// Stamp anything the upstream stages didn't already know, e.g. a
/// best-effort response timestamp when none was observed (request-only
/// witnesses flushed at flow close).
fn annotate(witness: &mut Witness, now_ms: i64) {
    if witness.is_request_only() && witness.meta.response_observed_at_ms.is_none() {
        witness.meta.response_observed_at_ms = Some(now_ms);
    }
}
