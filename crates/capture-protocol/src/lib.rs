// capture-protocol: wire types exchanged between the capture agent and the
// backend ingestion service.
//
// Witnesses, redaction rules, and trace lifecycle messages are plain data
// here; the concrete REST transport (paths, status codes, retries) lives in
// the `agent` service's uploader, not in this crate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Data node (recursive witness payload)
// ---------------------------------------------------------------------------

/// Where in an HTTP message a [`Data`] node was captured from.
///
/// Preserved through redaction and serialization; the redactor and the
/// obfuscation-state tracking on [`Witness`] both key off this discriminant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LocationMeta {
    Body { content_type: Option<String> },
    Header { key: String },
    Query { key: String },
    Cookie { key: String },
    Auth,
    Multipart { content_type: String },
    PathSegment { index: usize },
}

/// A primitive scalar captured from a request or response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Primitive {
    String(String),
    I64(i64),
    F64(f64),
    Bool(bool),
    /// Length-only representation; raw bytes are never shipped to the backend.
    Bytes { len: usize },
}

/// Recursive sum type backing every witness field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Data {
    Primitive {
        value: Primitive,
        #[serde(skip_serializing_if = "Option::is_none")]
        location: Option<LocationMeta>,
    },
    List {
        items: Vec<Data>,
        #[serde(skip_serializing_if = "Option::is_none")]
        location: Option<LocationMeta>,
    },
    Struct {
        fields: BTreeMap<String, Data>,
        #[serde(skip_serializing_if = "Option::is_none")]
        location: Option<LocationMeta>,
    },
}

impl Data {
    pub fn string(s: impl Into<String>, location: Option<LocationMeta>) -> Self {
        Data::Primitive {
            value: Primitive::String(s.into()),
            location,
        }
    }

    pub fn location(&self) -> Option<&LocationMeta> {
        match self {
            Data::Primitive { location, .. }
            | Data::List { location, .. }
            | Data::Struct { location, .. } => location.as_ref(),
        }
    }
}

// ---------------------------------------------------------------------------
// Witness
// ---------------------------------------------------------------------------

/// Obfuscation applied to a witness's values before upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObfuscationState {
    None,
    Zeroed,
    Redacted,
}

/// Method-level descriptor: verb, host, and a (possibly templated) path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub verb: String,
    pub host: String,
    pub path_template: String,
}

/// Timestamps, sizes, and capture provenance for a witness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WitnessMeta {
    pub captured_interface: String,
    pub stream_id: String,
    pub request_observed_at_ms: Option<i64>,
    pub response_observed_at_ms: Option<i64>,
    pub request_bytes: u64,
    pub response_bytes: u64,
    pub obfuscation_state: ObfuscationState,
}

/// The top-level artifact emitted by the pairer and transformed by the
/// collector chain before upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Witness {
    pub id: uuid::Uuid,
    pub method: MethodDescriptor,
    pub args: BTreeMap<String, Data>,
    /// Keyed by status code as a string (e.g. "200"); empty for
    /// request-only witnesses.
    pub responses: BTreeMap<String, Data>,
    pub meta: WitnessMeta,
}

impl Witness {
    pub fn is_request_only(&self) -> bool {
        self.responses.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Redaction rules (backend-refreshed dynamic layer)
// ---------------------------------------------------------------------------

/// The user-supplied dynamic redaction layer, as served by the backend.
///
/// Baked-in rules are not part of the wire format; they ship with the agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionRuleSet {
    /// Exact field names (compared case-insensitively).
    pub field_names: Vec<String>,
    /// Regex source strings tested against raw (case-preserving) field names.
    pub field_name_regexps: Vec<String>,
    /// Regex source strings tested against primitive string values.
    pub value_regexps: Vec<String>,
}

// ---------------------------------------------------------------------------
// Trace lifecycle
// ---------------------------------------------------------------------------

/// Tags attached to a created trace. Reserved keys: `source`, `host`,
/// `capture_flags`.
pub type Tags = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTraceRequest {
    pub service_id: String,
    pub name: String,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceHandle {
    pub trace_id: String,
    pub max_witness_bytes: u64,
    pub repro_mode: bool,
}

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartupTelemetry {
    pub start_time_ms: i64,
    pub declared_observation_seconds: Option<u64>,
    pub agent_version: String,
    pub architecture: String,
    pub environment_hints: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopNEntry {
    pub key: String,
    pub volume: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PeriodicTelemetry {
    pub cumulative_observation_seconds: u64,
    pub top_ports: Vec<TopNEntry>,
    pub top_hosts: Vec<TopNEntry>,
    pub heuristic_flags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FatalErrorReport {
    pub message: String,
    pub interface_causes: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Backend client interface
// ---------------------------------------------------------------------------

/// HTTP status carried by a [`BackendError`], mirroring the REST client's
/// responses. 409 on create-trace means "name exists"; callers should fall
/// back to [`BackendClient::lookup_trace_by_name`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpStatus(pub u16);

impl HttpStatus {
    pub fn is_retryable(self) -> bool {
        self.0 >= 500 || self.0 == 429
    }

    pub fn is_name_conflict(self) -> bool {
        self.0 == 409
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    Http { status: HttpStatus, message: String },
    Transport(String),
    Serialization(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::Http { status, message } => {
                write!(f, "backend returned HTTP {}: {}", status.0, message)
            }
            BackendError::Transport(s) => write!(f, "transport error: {s}"),
            BackendError::Serialization(s) => write!(f, "serialization error: {s}"),
        }
    }
}

impl std::error::Error for BackendError {}

/// The core's view of the backend REST client.
///
/// Concrete request/response bodies beyond what this crate defines are
/// opaque to the capture core by design (see spec §6); an implementation
/// wraps whatever HTTP client and auth scheme the surrounding product uses.
#[async_trait::async_trait]
pub trait BackendClient: Send + Sync {
    async fn create_trace(&self, req: CreateTraceRequest) -> Result<TraceHandle, BackendError>;

    async fn lookup_trace_by_name(
        &self,
        service_id: &str,
        name: &str,
    ) -> Result<TraceHandle, BackendError>;

    async fn upload_witness_batch(
        &self,
        service_id: &str,
        trace_id: &str,
        batch: Vec<Witness>,
    ) -> Result<(), BackendError>;

    async fn get_redaction_rules(&self, service_id: &str) -> Result<RedactionRuleSet, BackendError>;

    async fn post_startup_telemetry(
        &self,
        service_id: &str,
        record: StartupTelemetry,
    ) -> Result<(), BackendError>;

    async fn post_periodic_telemetry(
        &self,
        service_id: &str,
        record: PeriodicTelemetry,
    ) -> Result<(), BackendError>;

    async fn post_fatal_error(
        &self,
        service_id: &str,
        record: FatalErrorReport,
    ) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_retry_classification() {
        assert!(HttpStatus(503).is_retryable());
        assert!(HttpStatus(429).is_retryable());
        assert!(!HttpStatus(404).is_retryable());
        assert!(HttpStatus(409).is_name_conflict());
        assert!(!HttpStatus(200).is_name_conflict());
    }

    #[test]
    fn witness_round_trips_location_meta_and_primitive_kinds() {
        let mut args = BTreeMap::new();
        args.insert(
            "cookie:session".to_string(),
            Data::Primitive {
                value: Primitive::String("abc123".into()),
                location: Some(LocationMeta::Cookie {
                    key: "session".into(),
                }),
            },
        );
        args.insert(
            "header:x-retries".to_string(),
            Data::Primitive {
                value: Primitive::I64(3),
                location: Some(LocationMeta::Header {
                    key: "x-retries".into(),
                }),
            },
        );

        let w = Witness {
            id: uuid::Uuid::new_v4(),
            method: MethodDescriptor {
                verb: "GET".into(),
                host: "a.example".into(),
                path_template: "/v1/users".into(),
            },
            args,
            responses: BTreeMap::new(),
            meta: WitnessMeta {
                captured_interface: "eth0".into(),
                stream_id: "flow-1:a".into(),
                request_observed_at_ms: Some(1),
                response_observed_at_ms: None,
                request_bytes: 42,
                response_bytes: 0,
                obfuscation_state: ObfuscationState::None,
            },
        };

        let json = serde_json::to_string(&w).unwrap();
        let back: Witness = serde_json::from_str(&json).unwrap();
        assert_eq!(w, back);
        assert_eq!(
            back.args["cookie:session"].location(),
            Some(&LocationMeta::Cookie {
                key: "session".into()
            })
        );
        assert!(back.is_request_only());
    }
}
