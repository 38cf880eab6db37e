//! Startup and periodic telemetry: what the backend needs to understand
//! fleet health without the raw witness stream itself.

use capture_core::models::PacketCounter;
use capture_protocol::{BackendClient, PeriodicTelemetry, StartupTelemetry};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

fn architecture() -> String {
    std::env::consts::ARCH.to_string()
}

/// Sent once, right after the agent starts serving traffic.
pub async fn post_startup(
    backend: &dyn BackendClient,
    service_id: &str,
    declared_observation_seconds: Option<u64>,
    environment_hints: BTreeMap<String, String>,
) {
    let record = StartupTelemetry {
        start_time_ms: Utc::now().timestamp_millis(),
        declared_observation_seconds,
        agent_version: AGENT_VERSION.to_string(),
        architecture: architecture(),
        environment_hints,
    };
    if let Err(e) = backend.post_startup_telemetry(service_id, record).await {
        warn!(%e, "failed to post startup telemetry");
    }
}

/// Heuristic flags surfaced alongside the periodic report: cheap signals an
/// operator can act on without reading the full counters dump.
fn heuristic_flags(counters: &PacketCounter) -> Vec<String> {
    let mut flags = Vec::new();
    if counters.overflowed() {
        flags.push("counter_rows_overflowed".to_string());
    }
    flags
}

/// One periodic telemetry beat: cumulative observation time plus the
/// top-N port/host rankings from the shared counter table.
pub async fn post_periodic(
    backend: &dyn BackendClient,
    service_id: &str,
    counters: &PacketCounter,
    cumulative_observation_seconds: u64,
    top_n: usize,
) {
    let record = PeriodicTelemetry {
        cumulative_observation_seconds,
        top_ports: counters
            .top_ports(top_n)
            .into_iter()
            .map(|e| capture_protocol::TopNEntry { key: e.key, volume: e.volume })
            .collect(),
        top_hosts: counters
            .top_hosts(top_n)
            .into_iter()
            .map(|e| capture_protocol::TopNEntry { key: e.key, volume: e.volume })
            .collect(),
        heuristic_flags: heuristic_flags(counters),
    };
    if let Err(e) = backend.post_periodic_telemetry(service_id, record).await {
        warn!(%e, "failed to post periodic telemetry");
    }
}

/// Run the periodic beat on a fixed interval until `shutdown` fires.
pub async fn run_periodic_loop(
    backend: Arc<dyn BackendClient>,
    service_id: String,
    counters: Arc<PacketCounter>,
    interval_ms: u64,
    top_n: usize,
    shutdown: tokio_util::sync::CancellationToken,
) {
    let start = std::time::Instant::now();
    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                post_periodic(
                    backend.as_ref(),
                    &service_id,
                    counters.as_ref(),
                    start.elapsed().as_secs(),
                    top_n,
                )
                .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capture_protocol::{
        BackendError, CreateTraceRequest, FatalErrorReport, RedactionRuleSet, TraceHandle, Witness,
    };
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBackend {
        startup_calls: Mutex<Vec<StartupTelemetry>>,
        periodic_calls: Mutex<Vec<PeriodicTelemetry>>,
    }

    #[async_trait::async_trait]
    impl BackendClient for RecordingBackend {
        async fn create_trace(&self, _req: CreateTraceRequest) -> Result<TraceHandle, BackendError> {
            unimplemented!()
        }
        async fn lookup_trace_by_name(&self, _service_id: &str, _name: &str) -> Result<TraceHandle, BackendError> {
            unimplemented!()
        }
        async fn upload_witness_batch(&self, _service_id: &str, _trace_id: &str, _batch: Vec<Witness>) -> Result<(), BackendError> {
            unimplemented!()
        }
        async fn get_redaction_rules(&self, _service_id: &str) -> Result<RedactionRuleSet, BackendError> {
            unimplemented!()
        }
        async fn post_startup_telemetry(&self, _service_id: &str, record: StartupTelemetry) -> Result<(), BackendError> {
            self.startup_calls.lock().unwrap().push(record);
            Ok(())
        }
        async fn post_periodic_telemetry(&self, _service_id: &str, record: PeriodicTelemetry) -> Result<(), BackendError> {
            self.periodic_calls.lock().unwrap().push(record);
            Ok(())
        }
        async fn post_fatal_error(&self, _service_id: &str, _record: FatalErrorReport) -> Result<(), BackendError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn startup_telemetry_carries_version_and_architecture() {
        let backend = RecordingBackend::default();
        post_startup(&backend, "svc", Some(3600), BTreeMap::new()).await;
        let calls = backend.startup_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].agent_version, AGENT_VERSION);
        assert_eq!(calls[0].declared_observation_seconds, Some(3600));
    }

    #[tokio::test]
    async fn periodic_telemetry_flags_counter_overflow() {
        let backend = RecordingBackend::default();
        let counters = PacketCounter::new(0);
        counters.incr_tcp_packet(&capture_core::models::CounterKey {
            interface: "eth0".into(),
            src_port: 1,
            dst_port: 80,
            host: String::new(),
        });
        post_periodic(&backend, "svc", &counters, 10, 5).await;
        let calls = backend.periodic_calls.lock().unwrap();
        assert!(calls[0].heuristic_flags.contains(&"counter_rows_overflowed".to_string()));
    }
}
