//! In-memory [`BackendClient`] for exercising the uploader, telemetry, and
//! redaction-refresh loops without a network round trip.

use async_trait::async_trait;
use capture_protocol::{
    BackendClient, BackendError, CreateTraceRequest, FatalErrorReport, HttpStatus,
    PeriodicTelemetry, RedactionRuleSet, StartupTelemetry, TraceHandle, Witness,
};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

#[derive(Default)]
struct State {
    traces: Vec<TraceHandle>,
    trace_names: Vec<String>,
    witnesses: Vec<(String, Witness)>,
    startup: Vec<StartupTelemetry>,
    periodic: Vec<PeriodicTelemetry>,
    fatal: Vec<FatalErrorReport>,
}

/// Records every call it receives; `fail_next_uploads` lets a test force a
/// handful of transient failures to exercise the uploader's retry path.
pub struct FakeBackendClient {
    state: Mutex<State>,
    redaction_rules: Mutex<RedactionRuleSet>,
    fail_next_uploads: AtomicU64,
    next_trace_seq: AtomicU64,
}

impl FakeBackendClient {
    pub fn new() -> Self {
        FakeBackendClient {
            state: Mutex::new(State::default()),
            redaction_rules: Mutex::new(RedactionRuleSet::default()),
            fail_next_uploads: AtomicU64::new(0),
            next_trace_seq: AtomicU64::new(1),
        }
    }

    pub fn with_redaction_rules(rules: RedactionRuleSet) -> Self {
        let client = FakeBackendClient::new();
        *client.redaction_rules.blocking_lock() = rules;
        client
    }

    /// The next `n` calls to `upload_witness_batch` return a transport error.
    pub fn fail_next_uploads(&self, n: u64) {
        self.fail_next_uploads.store(n, Ordering::SeqCst);
    }

    pub async fn set_redaction_rules(&self, rules: RedactionRuleSet) {
        *self.redaction_rules.lock().await = rules;
    }

    pub async fn uploaded_witnesses(&self) -> Vec<Witness> {
        self.state.lock().await.witnesses.iter().map(|(_, w)| w.clone()).collect()
    }

    pub async fn startup_records(&self) -> Vec<StartupTelemetry> {
        self.state.lock().await.startup.clone()
    }

    pub async fn periodic_records(&self) -> Vec<PeriodicTelemetry> {
        self.state.lock().await.periodic.clone()
    }

    pub async fn fatal_records(&self) -> Vec<FatalErrorReport> {
        self.state.lock().await.fatal.clone()
    }

    pub async fn trace_count(&self) -> usize {
        self.state.lock().await.traces.len()
    }
}

impl Default for FakeBackendClient {
    fn default() -> Self {
        FakeBackendClient::new()
    }
}

#[async_trait]
impl BackendClient for FakeBackendClient {
    async fn create_trace(&self, req: CreateTraceRequest) -> Result<TraceHandle, BackendError> {
        let mut state = self.state.lock().await;
        if state.trace_names.contains(&req.name) {
            return Err(BackendError::Http {
                status: HttpStatus(409),
                message: format!("trace '{}' already exists", req.name),
            });
        }
        let seq = self.next_trace_seq.fetch_add(1, Ordering::SeqCst);
        let handle = TraceHandle {
            trace_id: format!("trace-{seq}"),
            max_witness_bytes: 1_048_576,
            repro_mode: false,
        };
        state.trace_names.push(req.name);
        state.traces.push(handle.clone());
        Ok(handle)
    }

    async fn lookup_trace_by_name(
        &self,
        _service_id: &str,
        name: &str,
    ) -> Result<TraceHandle, BackendError> {
        let state = self.state.lock().await;
        state
            .trace_names
            .iter()
            .position(|n| n == name)
            .map(|i| state.traces[i].clone())
            .ok_or_else(|| BackendError::Http { status: HttpStatus(404), message: "no such trace".to_string() })
    }

    async fn upload_witness_batch(
        &self,
        _service_id: &str,
        trace_id: &str,
        batch: Vec<Witness>,
    ) -> Result<(), BackendError> {
        let remaining = self.fail_next_uploads.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next_uploads.store(remaining - 1, Ordering::SeqCst);
            return Err(BackendError::Transport("simulated transient failure".to_string()));
        }
        let mut state = self.state.lock().await;
        for witness in batch {
            state.witnesses.push((trace_id.to_string(), witness));
        }
        Ok(())
    }

    async fn get_redaction_rules(&self, _service_id: &str) -> Result<RedactionRuleSet, BackendError> {
        Ok(self.redaction_rules.lock().await.clone())
    }

    async fn post_startup_telemetry(
        &self,
        _service_id: &str,
        record: StartupTelemetry,
    ) -> Result<(), BackendError> {
        self.state.lock().await.startup.push(record);
        Ok(())
    }

    async fn post_periodic_telemetry(
        &self,
        _service_id: &str,
        record: PeriodicTelemetry,
    ) -> Result<(), BackendError> {
        self.state.lock().await.periodic.push(record);
        Ok(())
    }

    async fn post_fatal_error(
        &self,
        _service_id: &str,
        record: FatalErrorReport,
    ) -> Result<(), BackendError> {
        self.state.lock().await.fatal.push(record);
        Ok(())
    }
}
