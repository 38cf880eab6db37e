//! Local diagnostics HTTP server.
//!
//! - `GET /healthz` — always 200 (process is running)
//! - `GET /readyz`  — 200 once local subsystems (config, interfaces,
//!   capture tasks) are up; backend connectivity is explicitly excluded
//! - `GET /counters` — the two-table packets/hosts report rendered from
//!   the shared [`PacketCounter`]
//!
//! No authentication; this binds to loopback by default and is meant for
//! operator/monitoring access on the host the agent runs on.

use crate::config::DiagnosticsConfig;
use capture_core::models::PacketCounter;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Flips to ready once every local startup step (config parsed, interfaces
/// resolved, capture tasks spawned) has completed.
#[derive(Default)]
pub struct Readiness(AtomicBool);

impl Readiness {
    pub fn mark_ready(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    fn is_ready(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub struct DiagnosticsServer {
    local_addr: SocketAddr,
}

impl DiagnosticsServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn start(
        cfg: DiagnosticsConfig,
        readiness: Arc<Readiness>,
        counters: Arc<PacketCounter>,
    ) -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind(&cfg.bind).await?;
        let local_addr = listener.local_addr()?;
        tokio::spawn(run_server(listener, readiness, counters));
        Ok(DiagnosticsServer { local_addr })
    }
}

async fn run_server(listener: TcpListener, readiness: Arc<Readiness>, counters: Arc<PacketCounter>) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let readiness = readiness.clone();
                let counters = counters.clone();
                tokio::spawn(handle_connection(stream, readiness, counters));
            }
            Err(_) => break,
        }
    }
}

async fn handle_connection(mut stream: TcpStream, readiness: Arc<Readiness>, counters: Arc<PacketCounter>) {
    let mut buf = vec![0u8; 4096];
    let n = match stream.read(&mut buf).await {
        Ok(n) if n > 0 => n,
        _ => return,
    };
    let request = match std::str::from_utf8(&buf[..n]) {
        Ok(s) => s,
        Err(_) => return send_response(&mut stream, 400, "text/plain", "Bad Request").await,
    };
    let first_line = request.lines().next().unwrap_or("");
    let mut parts = first_line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("/");

    match (method, path) {
        ("GET", "/healthz") => send_response(&mut stream, 200, "text/plain", "ok").await,
        ("GET", "/readyz") => {
            if readiness.is_ready() {
                send_response(&mut stream, 200, "text/plain", "ready").await
            } else {
                send_response(&mut stream, 503, "text/plain", "not ready").await
            }
        }
        ("GET", "/counters") => {
            send_response(&mut stream, 200, "text/plain; charset=utf-8", &render_counters(&counters)).await
        }
        _ => send_response(&mut stream, 404, "text/plain", "Not Found").await,
    }
}

/// Two tables: per-port packet/message volumes, then per-port unparsed
/// byte counts, plus the overflow flag and cap when the row table filled.
fn render_counters(counters: &PacketCounter) -> String {
    let rows = counters.per_port();
    let mut out = String::new();
    out.push_str("port\ttcp\thttp_req\thttp_resp\ttls_hello\n");
    for row in &rows {
        out.push_str(&format!("{}\t{}\t{}\t{}\t{}\n", row.port, row.tcp, row.http_req, row.http_resp, row.tls_hello));
    }
    out.push_str("\nport\tunparsed_bytes\n");
    for row in &rows {
        out.push_str(&format!("{}\t{}\n", row.port, row.unparsed));
    }
    if counters.overflowed() {
        out.push_str(&format!("\noverflow: true (cap={})\n", counters.cap()));
    }
    out
}

async fn send_response(stream: &mut TcpStream, status: u16, content_type: &str, body: &str) {
    let status_text = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        503 => "Service Unavailable",
        _ => "Unknown",
    };
    let response = format!(
        "HTTP/1.1 {status} {status_text}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nConnection: close\r\n\r\n{body}",
        len = body.len(),
    );
    let _ = stream.write_all(response.as_bytes()).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use capture_core::models::CounterKey;
    use tokio::io::AsyncWriteExt as _;

    #[tokio::test]
    async fn healthz_is_always_ok_even_before_readiness() {
        let readiness = Arc::new(Readiness::default());
        let counters = Arc::new(PacketCounter::default());
        let server = DiagnosticsServer::start(
            DiagnosticsConfig { bind: "127.0.0.1:0".to_string() },
            readiness,
            counters,
        )
        .await
        .unwrap();

        let mut conn = TcpStream::connect(server.local_addr()).await.unwrap();
        conn.write_all(b"GET /healthz HTTP/1.1\r\n\r\n").await.unwrap();
        let mut resp = Vec::new();
        conn.read_to_end(&mut resp).await.unwrap();
        assert!(resp.starts_with(b"HTTP/1.1 200"));
    }

    #[tokio::test]
    async fn readyz_reflects_local_readiness_flag() {
        let readiness = Arc::new(Readiness::default());
        let counters = Arc::new(PacketCounter::default());
        let server = DiagnosticsServer::start(
            DiagnosticsConfig { bind: "127.0.0.1:0".to_string() },
            readiness.clone(),
            counters,
        )
        .await
        .unwrap();

        let mut conn = TcpStream::connect(server.local_addr()).await.unwrap();
        conn.write_all(b"GET /readyz HTTP/1.1\r\n\r\n").await.unwrap();
        let mut resp = Vec::new();
        conn.read_to_end(&mut resp).await.unwrap();
        assert!(resp.starts_with(b"HTTP/1.1 503"));

        readiness.mark_ready();
        let mut conn = TcpStream::connect(server.local_addr()).await.unwrap();
        conn.write_all(b"GET /readyz HTTP/1.1\r\n\r\n").await.unwrap();
        let mut resp = Vec::new();
        conn.read_to_end(&mut resp).await.unwrap();
        assert!(resp.starts_with(b"HTTP/1.1 200"));
    }

    #[tokio::test]
    async fn counters_endpoint_renders_per_port_rows() {
        let readiness = Arc::new(Readiness::default());
        let counters = Arc::new(PacketCounter::default());
        counters.incr_tcp_packet(&CounterKey { interface: "eth0".into(), src_port: 1, dst_port: 80, host: String::new() });
        let server = DiagnosticsServer::start(
            DiagnosticsConfig { bind: "127.0.0.1:0".to_string() },
            readiness,
            counters,
        )
        .await
        .unwrap();

        let mut conn = TcpStream::connect(server.local_addr()).await.unwrap();
        conn.write_all(b"GET /counters HTTP/1.1\r\n\r\n").await.unwrap();
        let mut resp = Vec::new();
        conn.read_to_end(&mut resp).await.unwrap();
        let text = String::from_utf8(resp).unwrap();
        assert!(text.contains("80\t1"));
    }
}
