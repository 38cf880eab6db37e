//! Shared test fixtures for the capture agent workspace: synthetic packet
//! builders, a sample-witness builder, and an in-memory [`BackendClient`]
//! fake used across `capture-core` and `services/agent` integration tests.

pub mod fake_backend;
pub mod packet_builders;
pub mod witness_builders;

pub use fake_backend::FakeBackendClient;
pub use witness_builders::{sample_witness, WitnessBuilder};

#[cfg(test)]
mod tests {
    use super::*;
    use capture_protocol::BackendClient;

    #[tokio::test]
    async fn fake_backend_creates_and_looks_up_traces_by_name() {
        let backend = FakeBackendClient::new();
        let handle = backend
            .create_trace(capture_protocol::CreateTraceRequest {
                service_id: "svc".to_string(),
                name: "trace-1".to_string(),
                tags: Default::default(),
            })
            .await
            .unwrap();

        let looked_up = backend.lookup_trace_by_name("svc", "trace-1").await.unwrap();
        assert_eq!(looked_up.trace_id, handle.trace_id);

        let conflict = backend
            .create_trace(capture_protocol::CreateTraceRequest {
                service_id: "svc".to_string(),
                name: "trace-1".to_string(),
                tags: Default::default(),
            })
            .await;
        assert!(matches!(conflict, Err(capture_protocol::BackendError::Http { status, .. }) if status.is_name_conflict()));
    }

    #[tokio::test]
    async fn fake_backend_simulates_transient_upload_failures() {
        let backend = FakeBackendClient::new();
        backend.fail_next_uploads(2);
        let witness = sample_witness("svc.example", "/ping");

        assert!(backend.upload_witness_batch("svc", "trace-1", vec![witness.clone()]).await.is_err());
        assert!(backend.upload_witness_batch("svc", "trace-1", vec![witness.clone()]).await.is_err());
        assert!(backend.upload_witness_batch("svc", "trace-1", vec![witness]).await.is_ok());
        assert_eq!(backend.uploaded_witnesses().await.len(), 1);
    }

    #[test]
    fn packet_builders_produce_parseable_http_request_bytes() {
        let pkt = packet_builders::http_get_request("10.0.0.1:40000", "10.0.0.2:80", 0, "svc.example", "/status");
        assert!(std::str::from_utf8(pkt.payload()).unwrap().starts_with("GET /status HTTP/1.1"));
    }
}
