//! REST implementation of [`capture_protocol::BackendClient`].
//!
//! Wire paths and bodies are this service's own concretion of the opaque
//! client the core depends on (spec §6 leaves the transport unspecified);
//! every call attaches the configured bearer token the way the forwarder's
//! uplink attached `Authorization: Bearer <token>` on connect.

use capture_protocol::{
    BackendClient, BackendError, CreateTraceRequest, FatalErrorReport, HttpStatus,
    PeriodicTelemetry, RedactionRuleSet, StartupTelemetry, TraceHandle, Witness,
};
use serde::Serialize;

pub struct RestBackendClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl RestBackendClient {
    pub fn new(base_url: String, token: String) -> Self {
        RestBackendClient {
            http: reqwest::Client::new(),
            base_url,
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn post_json<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<reqwest::Response, BackendError> {
        self.http
            .post(self.url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, BackendError> {
        self.http
            .get(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))
    }

    async fn decode<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T, BackendError> {
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BackendError::Http {
                status: HttpStatus(status.as_u16()),
                message,
            });
        }
        resp.json().await.map_err(|e| BackendError::Serialization(e.to_string()))
    }

    async fn expect_no_content(resp: reqwest::Response) -> Result<(), BackendError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let message = resp.text().await.unwrap_or_default();
        Err(BackendError::Http {
            status: HttpStatus(status.as_u16()),
            message,
        })
    }
}

#[derive(Serialize)]
struct WitnessBatchBody<'a> {
    service_id: &'a str,
    witnesses: Vec<Witness>,
}

#[async_trait::async_trait]
impl BackendClient for RestBackendClient {
    async fn create_trace(&self, req: CreateTraceRequest) -> Result<TraceHandle, BackendError> {
        let resp = self.post_json("/v1/traces", &req).await?;
        Self::decode(resp).await
    }

    async fn lookup_trace_by_name(
        &self,
        service_id: &str,
        name: &str,
    ) -> Result<TraceHandle, BackendError> {
        let path = format!(
            "/v1/traces/by-name?service_id={}&name={}",
            urlencode(service_id),
            urlencode(name)
        );
        let resp = self.get(&path).await?;
        Self::decode(resp).await
    }

    async fn upload_witness_batch(
        &self,
        service_id: &str,
        trace_id: &str,
        batch: Vec<Witness>,
    ) -> Result<(), BackendError> {
        let path = format!("/v1/traces/{trace_id}/witnesses");
        let body = WitnessBatchBody { service_id, witnesses: batch };
        let resp = self.post_json(&path, &body).await?;
        Self::expect_no_content(resp).await
    }

    async fn get_redaction_rules(&self, service_id: &str) -> Result<RedactionRuleSet, BackendError> {
        let path = format!("/v1/redaction-rules?service_id={}", urlencode(service_id));
        let resp = self.get(&path).await?;
        Self::decode(resp).await
    }

    async fn post_startup_telemetry(
        &self,
        service_id: &str,
        record: StartupTelemetry,
    ) -> Result<(), BackendError> {
        let path = format!("/v1/telemetry/startup?service_id={}", urlencode(service_id));
        let resp = self.post_json(&path, &record).await?;
        Self::expect_no_content(resp).await
    }

    async fn post_periodic_telemetry(
        &self,
        service_id: &str,
        record: PeriodicTelemetry,
    ) -> Result<(), BackendError> {
        let path = format!("/v1/telemetry/periodic?service_id={}", urlencode(service_id));
        let resp = self.post_json(&path, &record).await?;
        Self::expect_no_content(resp).await
    }

    async fn post_fatal_error(
        &self,
        service_id: &str,
        record: FatalErrorReport,
    ) -> Result<(), BackendError> {
        let path = format!("/v1/telemetry/fatal?service_id={}", urlencode(service_id));
        let resp = self.post_json(&path, &record).await?;
        Self::expect_no_content(resp).await
    }
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlencode_escapes_reserved_characters() {
        assert_eq!(urlencode("a b"), "a%20b");
        assert_eq!(urlencode("svc-1_v2.x~ok"), "svc-1_v2.x~ok");
    }
}
