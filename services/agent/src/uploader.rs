//! Batches witnesses for upload, retries failed batches with bounded
//! exponential backoff, and rotates the active trace once it exceeds its
//! configured lifetime.
//!
//! Grounded on the forwarder uplink's reconnect-on-failure loop, minus the
//! WebSocket handshake: here a "reconnect" is just picking a fresh trace.

use crate::config::{RotationConfig, UploaderConfig};
use capture_protocol::{BackendClient, BackendError, CreateTraceRequest, Tags, TraceHandle, Witness};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

struct ActiveTrace {
    handle: TraceHandle,
    created_at_ms: i64,
}

/// Owns the pending-witness buffer and the currently active trace; `tick`
/// drives both the periodic flush and the lifetime-based rotation.
pub struct Uploader {
    backend: Arc<dyn BackendClient>,
    service_id: String,
    config: UploaderConfig,
    rotation: RotationConfig,
    buffer: Mutex<Vec<Witness>>,
    trace: Mutex<ActiveTrace>,
    last_flush_ms: std::sync::atomic::AtomicI64,
}

impl Uploader {
    /// Create (or resolve, on a name conflict) the initial trace and
    /// return a ready-to-use uploader.
    pub async fn new(
        backend: Arc<dyn BackendClient>,
        service_id: String,
        trace_name: String,
        tags: Tags,
        config: UploaderConfig,
        rotation: RotationConfig,
    ) -> Result<Self, BackendError> {
        let handle = open_trace(backend.as_ref(), &service_id, &trace_name, &tags).await?;
        Ok(Uploader {
            backend,
            service_id,
            config,
            rotation,
            buffer: Mutex::new(Vec::new()),
            trace: Mutex::new(ActiveTrace { handle, created_at_ms: now_ms() }),
            last_flush_ms: std::sync::atomic::AtomicI64::new(now_ms()),
        })
    }

    /// Queue a witness; flushes immediately once the batch cap is reached.
    pub async fn enqueue(&self, witness: Witness) {
        let should_flush = {
            let mut buf = self.buffer.lock().await;
            buf.push(witness);
            buf.len() >= self.config.batch_max_witnesses
        };
        if should_flush {
            self.flush().await;
        }
    }

    /// Periodic driver: flush if the flush interval elapsed, then rotate
    /// the trace if its lifetime elapsed. Call this from a fixed-interval
    /// loop in the agent's main task set.
    pub async fn tick(&self) {
        let last = self.last_flush_ms.load(std::sync::atomic::Ordering::Relaxed);
        if now_ms() - last >= self.config.batch_flush_ms as i64 {
            self.flush().await;
        }
        self.maybe_rotate().await;
    }

    /// Drain the buffer and upload it with bounded exponential backoff.
    /// A batch that still fails after `max_retries` is dropped; the
    /// witnesses within it are lost, which is the agent's accepted
    /// best-effort delivery tradeoff.
    pub async fn flush(&self) {
        let batch = {
            let mut buf = self.buffer.lock().await;
            if buf.is_empty() {
                return;
            }
            std::mem::take(&mut *buf)
        };
        self.last_flush_ms.store(now_ms(), std::sync::atomic::Ordering::Relaxed);

        let (trace_id, service_id) = {
            let trace = self.trace.lock().await;
            (trace.handle.trace_id.clone(), self.service_id.clone())
        };

        let batch_len = batch.len();
        let mut attempt = 0u32;
        let mut delay_ms = self.config.backoff_base_ms;
        loop {
            match self.backend.upload_witness_batch(&service_id, &trace_id, batch.clone()).await {
                Ok(()) => {
                    debug!(batch_len, attempt, "witness batch uploaded");
                    return;
                }
                Err(e) if attempt < self.config.max_retries && is_retryable(&e) => {
                    warn!(attempt, %e, delay_ms, "witness batch upload failed, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                    attempt += 1;
                    delay_ms = (delay_ms * 2).min(self.config.backoff_cap_ms);
                }
                Err(e) => {
                    warn!(attempt, batch_len, %e, "dropping witness batch after exhausting retries");
                    return;
                }
            }
        }
    }

    async fn maybe_rotate(&self) {
        let Some(max_lifetime) = self.rotation.max_trace_lifetime_ms else { return };
        let due = {
            let trace = self.trace.lock().await;
            now_ms() - trace.created_at_ms >= max_lifetime as i64
        };
        if !due {
            return;
        }
        self.flush().await;
        let trace_name = format!("trace-{}", now_ms());
        match open_trace(self.backend.as_ref(), &self.service_id, &trace_name, &Tags::new()).await {
            Ok(handle) => {
                info!(trace_id = %handle.trace_id, "rotated to a new trace");
                *self.trace.lock().await = ActiveTrace { handle, created_at_ms: now_ms() };
            }
            Err(e) => warn!(%e, "trace rotation failed, keeping current trace"),
        }
    }
}

async fn open_trace(
    backend: &dyn BackendClient,
    service_id: &str,
    name: &str,
    tags: &Tags,
) -> Result<TraceHandle, BackendError> {
    let req = CreateTraceRequest { service_id: service_id.to_string(), name: name.to_string(), tags: tags.clone() };
    match backend.create_trace(req).await {
        Ok(handle) => Ok(handle),
        Err(BackendError::Http { status, .. }) if status.is_name_conflict() => {
            backend.lookup_trace_by_name(service_id, name).await
        }
        Err(e) => Err(e),
    }
}

fn is_retryable(err: &BackendError) -> bool {
    match err {
        BackendError::Http { status, .. } => status.is_retryable(),
        BackendError::Transport(_) => true,
        BackendError::Serialization(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capture_protocol::{FatalErrorReport, HttpStatus, PeriodicTelemetry, RedactionRuleSet, StartupTelemetry};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    struct FlakyBackend {
        fail_times: AtomicU32,
        batches_seen: StdMutex<Vec<usize>>,
    }

    #[async_trait::async_trait]
    impl BackendClient for FlakyBackend {
        async fn create_trace(&self, req: CreateTraceRequest) -> Result<TraceHandle, BackendError> {
            Ok(TraceHandle { trace_id: format!("t-{}", req.name), max_witness_bytes: 1 << 20, repro_mode: false })
        }
        async fn lookup_trace_by_name(&self, _service_id: &str, name: &str) -> Result<TraceHandle, BackendError> {
            Ok(TraceHandle { trace_id: format!("t-{name}"), max_witness_bytes: 1 << 20, repro_mode: false })
        }
        async fn upload_witness_batch(&self, _service_id: &str, _trace_id: &str, batch: Vec<Witness>) -> Result<(), BackendError> {
            if self.fail_times.load(Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                return Err(BackendError::Http { status: HttpStatus(503), message: "busy".into() });
            }
            self.batches_seen.lock().unwrap().push(batch.len());
            Ok(())
        }
        async fn get_redaction_rules(&self, _service_id: &str) -> Result<RedactionRuleSet, BackendError> {
            Ok(RedactionRuleSet::default())
        }
        async fn post_startup_telemetry(&self, _service_id: &str, _record: StartupTelemetry) -> Result<(), BackendError> {
            Ok(())
        }
        async fn post_periodic_telemetry(&self, _service_id: &str, _record: PeriodicTelemetry) -> Result<(), BackendError> {
            Ok(())
        }
        async fn post_fatal_error(&self, _service_id: &str, _record: FatalErrorReport) -> Result<(), BackendError> {
            Ok(())
        }
    }

    fn witness() -> Witness {
        Witness {
            id: uuid::Uuid::new_v4(),
            method: capture_protocol::MethodDescriptor { verb: "GET".into(), host: "a.example".into(), path_template: "/x".into() },
            args: Default::default(),
            responses: Default::default(),
            meta: capture_protocol::WitnessMeta {
                captured_interface: "eth0".into(),
                stream_id: "s".into(),
                request_observed_at_ms: Some(0),
                response_observed_at_ms: Some(1),
                request_bytes: 1,
                response_bytes: 1,
                obfuscation_state: capture_protocol::ObfuscationState::None,
            },
        }
    }

    fn cfg() -> UploaderConfig {
        UploaderConfig { batch_max_witnesses: 2, batch_flush_ms: 1_000, max_retries: 3, backoff_base_ms: 1, backoff_cap_ms: 10 }
    }

    #[tokio::test]
    async fn flush_retries_through_transient_failures() {
        let backend = Arc::new(FlakyBackend { fail_times: AtomicU32::new(2), batches_seen: StdMutex::new(Vec::new()) });
        let uploader = Uploader::new(
            backend.clone(),
            "svc".to_string(),
            "trace-1".to_string(),
            Tags::new(),
            cfg(),
            RotationConfig { max_trace_lifetime_ms: None },
        )
        .await
        .unwrap();
        uploader.enqueue(witness()).await;
        uploader.flush().await;
        assert_eq!(*backend.batches_seen.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn batch_cap_triggers_flush_without_waiting_for_tick() {
        let backend = Arc::new(FlakyBackend { fail_times: AtomicU32::new(0), batches_seen: StdMutex::new(Vec::new()) });
        let uploader = Uploader::new(
            backend.clone(),
            "svc".to_string(),
            "trace-1".to_string(),
            Tags::new(),
            cfg(),
            RotationConfig { max_trace_lifetime_ms: None },
        )
        .await
        .unwrap();
        uploader.enqueue(witness()).await;
        uploader.enqueue(witness()).await;
        assert_eq!(*backend.batches_seen.lock().unwrap(), vec![2]);
    }
}
