//! Agent configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides.
//! Default config path: `/etc/capture-agent/agent.toml`.
//!
//! # Required fields
//! - `schema_version = 1`
//! - `server.base_url`
//! - `auth.token_file`
//! - `capture.interfaces` (at least one)
//!
//! # Token file format
//! Raw bearer token string on a single line; trimmed on read.

use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub schema_version: u32,
    pub display_name: Option<String>,
    pub token: String,
    pub server: ServerConfig,
    pub capture: CaptureConfig,
    pub collector: CollectorConfig,
    pub redaction: RedactionConfig,
    pub uploader: UploaderConfig,
    pub rotation: RotationConfig,
    pub diagnostics: DiagnosticsConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub interfaces: Vec<String>,
    pub bpf: String,
    pub buffer_pool_bytes: usize,
    pub buffer_pool_audit: bool,
    pub flow_idle_timeout_ms: i64,
}

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub include_hosts: Vec<String>,
    pub exclude_hosts: Vec<String>,
    pub include_paths: Vec<String>,
    pub exclude_paths: Vec<String>,
    pub rate_limit_per_sec: f64,
    pub sample_rate: f64,
}

#[derive(Debug, Clone)]
pub struct RedactionConfig {
    pub refresh_interval_ms: u64,
    pub zero_all_primitives: bool,
}

#[derive(Debug, Clone)]
pub struct UploaderConfig {
    pub batch_max_witnesses: usize,
    pub batch_flush_ms: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

#[derive(Debug, Clone)]
pub struct RotationConfig {
    pub max_trace_lifetime_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct DiagnosticsConfig {
    pub bind: String,
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub interval_ms: u64,
    pub top_n: usize,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    display_name: Option<String>,
    server: Option<RawServerConfig>,
    auth: Option<RawAuthConfig>,
    capture: Option<RawCaptureConfig>,
    collector: Option<RawCollectorConfig>,
    redaction: Option<RawRedactionConfig>,
    uploader: Option<RawUploaderConfig>,
    rotation: Option<RawRotationConfig>,
    diagnostics: Option<RawDiagnosticsConfig>,
    telemetry: Option<RawTelemetryConfig>,
}

#[derive(Debug, Deserialize)]
struct RawServerConfig {
    base_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAuthConfig {
    token_file: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawCaptureConfig {
    interfaces: Option<Vec<String>>,
    bpf: Option<String>,
    buffer_pool_bytes: Option<usize>,
    buffer_pool_audit: Option<bool>,
    flow_idle_timeout_ms: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawCollectorConfig {
    include_hosts: Option<Vec<String>>,
    exclude_hosts: Option<Vec<String>>,
    include_paths: Option<Vec<String>>,
    exclude_paths: Option<Vec<String>>,
    rate_limit_per_sec: Option<f64>,
    sample_rate: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawRedactionConfig {
    refresh_interval_ms: Option<u64>,
    zero_all_primitives: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct RawUploaderConfig {
    batch_max_witnesses: Option<usize>,
    batch_flush_ms: Option<u64>,
    max_retries: Option<u32>,
    backoff_base_ms: Option<u64>,
    backoff_cap_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawRotationConfig {
    max_trace_lifetime_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDiagnosticsConfig {
    bind: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawTelemetryConfig {
    interval_ms: Option<u64>,
    top_n: Option<usize>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

pub fn load_config_from_path(path: &Path) -> Result<AgentConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {e}", path.display())))?;
    load_config_from_str(&toml_str)
}

pub fn load_config() -> Result<AgentConfig, ConfigError> {
    load_config_from_path(Path::new("/etc/capture-agent/agent.toml"))
}

pub fn load_config_from_str(toml_str: &str) -> Result<AgentConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let schema_version = raw
        .schema_version
        .ok_or_else(|| ConfigError::MissingField("schema_version".to_owned()))?;
    if schema_version != 1 {
        return Err(ConfigError::InvalidValue(format!(
            "schema_version must be 1, got {schema_version}"
        )));
    }

    let raw_server = raw.server.ok_or_else(|| ConfigError::MissingField("server".to_owned()))?;
    let base_url = raw_server
        .base_url
        .ok_or_else(|| ConfigError::MissingField("server.base_url".to_owned()))?;

    let raw_auth = raw.auth.ok_or_else(|| ConfigError::MissingField("auth".to_owned()))?;
    let token_file = raw_auth
        .token_file
        .ok_or_else(|| ConfigError::MissingField("auth.token_file".to_owned()))?;
    let token = read_token_file(&token_file)?;

    let raw_capture = raw
        .capture
        .ok_or_else(|| ConfigError::MissingField("capture".to_owned()))?;
    let interfaces = raw_capture
        .interfaces
        .ok_or_else(|| ConfigError::MissingField("capture.interfaces".to_owned()))?;
    if interfaces.is_empty() {
        return Err(ConfigError::InvalidValue(
            "capture.interfaces must list at least one interface".to_owned(),
        ));
    }
    let capture = CaptureConfig {
        interfaces,
        bpf: raw_capture.bpf.unwrap_or_else(|| "tcp".to_owned()),
        buffer_pool_bytes: raw_capture.buffer_pool_bytes.unwrap_or(64 << 20),
        buffer_pool_audit: raw_capture.buffer_pool_audit.unwrap_or(false),
        flow_idle_timeout_ms: raw_capture.flow_idle_timeout_ms.unwrap_or(120_000),
    };

    let raw_collector = raw.collector.unwrap_or_default();
    let collector = CollectorConfig {
        include_hosts: raw_collector.include_hosts.unwrap_or_default(),
        exclude_hosts: raw_collector.exclude_hosts.unwrap_or_default(),
        include_paths: raw_collector.include_paths.unwrap_or_default(),
        exclude_paths: raw_collector.exclude_paths.unwrap_or_default(),
        rate_limit_per_sec: raw_collector.rate_limit_per_sec.unwrap_or(1000.0),
        sample_rate: raw_collector.sample_rate.unwrap_or(1.0),
    };
    if !(0.0..=1.0).contains(&collector.sample_rate) {
        return Err(ConfigError::InvalidValue(
            "collector.sample_rate must be within [0.0, 1.0]".to_owned(),
        ));
    }

    let raw_redaction = raw.redaction.unwrap_or_default();
    let redaction = RedactionConfig {
        refresh_interval_ms: raw_redaction.refresh_interval_ms.unwrap_or(60_000),
        zero_all_primitives: raw_redaction.zero_all_primitives.unwrap_or(false),
    };

    let raw_uploader = raw.uploader.unwrap_or_default();
    let uploader = UploaderConfig {
        batch_max_witnesses: raw_uploader.batch_max_witnesses.unwrap_or(200),
        batch_flush_ms: raw_uploader.batch_flush_ms.unwrap_or(1_000),
        max_retries: raw_uploader.max_retries.unwrap_or(5),
        backoff_base_ms: raw_uploader.backoff_base_ms.unwrap_or(250),
        backoff_cap_ms: raw_uploader.backoff_cap_ms.unwrap_or(30_000),
    };

    let rotation = RotationConfig {
        max_trace_lifetime_ms: raw.rotation.and_then(|r| r.max_trace_lifetime_ms),
    };

    let raw_diagnostics = raw.diagnostics.unwrap_or_default();
    let diagnostics = DiagnosticsConfig {
        bind: raw_diagnostics.bind.unwrap_or_else(|| "127.0.0.1:9090".to_owned()),
    };

    let raw_telemetry = raw.telemetry.unwrap_or_default();
    let telemetry = TelemetryConfig {
        interval_ms: raw_telemetry.interval_ms.unwrap_or(60_000),
        top_n: raw_telemetry.top_n.unwrap_or(10),
    };

    Ok(AgentConfig {
        schema_version,
        display_name: raw.display_name,
        token,
        server: ServerConfig { base_url },
        capture,
        collector,
        redaction,
        uploader,
        rotation,
        diagnostics,
        telemetry,
    })
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("missing required field: {0}")]
    MissingField(String),
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

fn read_token_file(path: &str) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading token file '{path}': {e}")))?;
    Ok(content.trim().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_token_file(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "{contents}").unwrap();
        f
    }

    #[test]
    fn loads_a_minimal_valid_config() {
        let token_file = write_token_file("s3cr3t\n");
        let toml = format!(
            r#"
            schema_version = 1
            [server]
            base_url = "https://collector.example"
            [auth]
            token_file = "{}"
            [capture]
            interfaces = ["eth0"]
            "#,
            token_file.path().display()
        );
        let cfg = load_config_from_str(&toml).unwrap();
        assert_eq!(cfg.token, "s3cr3t");
        assert_eq!(cfg.capture.interfaces, vec!["eth0".to_string()]);
        assert_eq!(cfg.collector.sample_rate, 1.0);
    }

    #[test]
    fn rejects_unsupported_schema_version() {
        let token_file = write_token_file("x");
        let toml = format!(
            r#"
            schema_version = 2
            [server]
            base_url = "https://collector.example"
            [auth]
            token_file = "{}"
            [capture]
            interfaces = ["eth0"]
            "#,
            token_file.path().display()
        );
        assert!(matches!(
            load_config_from_str(&toml),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn rejects_empty_interface_list() {
        let token_file = write_token_file("x");
        let toml = format!(
            r#"
            schema_version = 1
            [server]
            base_url = "https://collector.example"
            [auth]
            token_file = "{}"
            [capture]
            interfaces = []
            "#,
            token_file.path().display()
        );
        assert!(matches!(
            load_config_from_str(&toml),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_sample_rate() {
        let token_file = write_token_file("x");
        let toml = format!(
            r#"
            schema_version = 1
            [server]
            base_url = "https://collector.example"
            [auth]
            token_file = "{}"
            [capture]
            interfaces = ["eth0"]
            [collector]
            sample_rate = 1.5
            "#,
            token_file.path().display()
        );
        assert!(matches!(
            load_config_from_str(&toml),
            Err(ConfigError::InvalidValue(_))
        ));
    }
}
