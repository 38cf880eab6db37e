// capture-agent: passive HTTP/TLS traffic observer. Captures on configured
// interfaces, reassembles and parses traffic, pairs requests with
// responses, redacts and rate-limits the result, and uploads witnesses to
// the backend.

use agent::backend_client::RestBackendClient;
use agent::collector::CollectorChain;
use agent::config::AgentConfig;
use agent::diagnostics::{DiagnosticsServer, Readiness};
use agent::packet_source::{self, CapturedPacket};
use agent::redactor::Redactor;
use agent::telemetry;
use agent::uploader::Uploader;
use agent::witness_builder::{self, ObservedTimes};
use capture_core::models::PacketCounter;
use capture_core::{BufferPool, Dispatcher, Pairer};
use capture_protocol::{BackendClient, RedactionRuleSet, Tags};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "capture agent starting");

    let cfg = match agent::config::load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("FATAL: failed to load config: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(cfg).await {
        error!(%e, "fatal error, shutting down");
        std::process::exit(1);
    }
}

async fn run(cfg: AgentConfig) -> Result<(), String> {
    let service_id = cfg.display_name.clone().unwrap_or_else(|| "capture-agent".to_string());
    let shutdown = CancellationToken::new();
    let readiness = Arc::new(Readiness::default());
    let counters = Arc::new(PacketCounter::default());
    let buffer_pool = Arc::new(BufferPool::new(cfg.capture.buffer_pool_bytes, cfg.capture.buffer_pool_audit));

    let interfaces = agent::interfaces::resolve(&cfg.capture.interfaces).map_err(|e| e.to_string())?;
    info!(count = interfaces.len(), "resolved capture interfaces");

    let backend: Arc<dyn BackendClient> =
        Arc::new(RestBackendClient::new(cfg.server.base_url.clone(), cfg.token.clone()));

    let initial_rules = backend.get_redaction_rules(&service_id).await.unwrap_or_else(|e| {
        warn!(%e, "failed to fetch initial redaction rules, starting with an empty set");
        RedactionRuleSet::default()
    });
    let redactor = Arc::new(Redactor::new(initial_rules, cfg.redaction.zero_all_primitives));

    let mut tags = Tags::new();
    tags.insert("source".to_string(), "capture-agent".to_string());
    let uploader = Arc::new(
        Uploader::new(
            backend.clone(),
            service_id.clone(),
            format!("{service_id}-{}", now_ms()),
            tags,
            cfg.uploader.clone(),
            cfg.rotation.clone(),
        )
        .await
        .map_err(|e| e.to_string())?,
    );

    telemetry::post_startup(backend.as_ref(), &service_id, None, Default::default()).await;

    let collector = Arc::new(Mutex::new(CollectorChain::new(
        &cfg.server.base_url,
        &cfg.collector.include_hosts,
        &cfg.collector.exclude_hosts,
        &cfg.collector.include_paths,
        &cfg.collector.exclude_paths,
        cfg.collector.rate_limit_per_sec,
        cfg.collector.sample_rate,
    )));

    let dispatcher = Arc::new(Mutex::new(Dispatcher::new(counters.clone())));
    let pairer = Arc::new(Mutex::new(Pairer::default()));

    let diagnostics = DiagnosticsServer::start(
        agent::config::DiagnosticsConfig { bind: cfg.diagnostics.bind.clone() },
        readiness.clone(),
        counters.clone(),
    )
    .await
    .map_err(|e| e.to_string())?;
    info!(addr = %diagnostics.local_addr(), "diagnostics server listening");

    let (tx, mut rx) = mpsc::channel::<CapturedPacket>(1024);
    let mut capture_handles = Vec::new();
    for iface in interfaces {
        let handle = packet_source::spawn_capture_task(iface, tx.clone(), buffer_pool.clone(), shutdown.clone())
            .map_err(|e| e.to_string())?;
        capture_handles.push(handle);
    }
    drop(tx);

    spawn_redaction_refresh(backend.clone(), service_id.clone(), redactor.clone(), cfg.redaction.refresh_interval_ms, shutdown.clone());
    spawn_idle_sweeper(
        dispatcher.clone(),
        pairer.clone(),
        collector.clone(),
        redactor.clone(),
        uploader.clone(),
        cfg.capture.flow_idle_timeout_ms,
        shutdown.clone(),
    );
    spawn_uploader_tick(uploader.clone(), cfg.uploader.batch_flush_ms, shutdown.clone());
    tokio::spawn(telemetry::run_periodic_loop(
        backend.clone(),
        service_id.clone(),
        counters.clone(),
        cfg.telemetry.interval_ms,
        cfg.telemetry.top_n,
        shutdown.clone(),
    ));

    readiness.mark_ready();
    info!("capture agent ready");

    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        shutdown_signal.cancel();
    });

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            maybe_pkt = rx.recv() => {
                let Some(captured) = maybe_pkt else { break };
                handle_captured_packet(
                    captured,
                    &dispatcher,
                    &pairer,
                    &collector,
                    &redactor,
                    &uploader,
                )
                .await;
            }
        }
    }

    for handle in capture_handles {
        let _ = handle.await;
    }
    uploader.flush().await;
    info!("capture agent stopped");
    Ok(())
}

async fn handle_captured_packet(
    captured: CapturedPacket,
    dispatcher: &Arc<Mutex<Dispatcher>>,
    pairer: &Arc<Mutex<Pairer>>,
    collector: &Arc<Mutex<CollectorChain>>,
    redactor: &Arc<Redactor>,
    uploader: &Arc<Uploader>,
) {
    let events = dispatcher.lock().await.on_packet(&captured.interface, &captured.packet);
    for event in events {
        if let Some(exchange) = pairer.lock().await.on_event(event) {
            emit_witness(exchange, &captured.interface, collector, redactor, uploader).await;
        }
    }
}

async fn emit_witness(
    exchange: capture_core::PairedExchange,
    interface: &str,
    collector: &Arc<Mutex<CollectorChain>>,
    redactor: &Arc<Redactor>,
    uploader: &Arc<Uploader>,
) {
    let stream_id = format!("{}-{}", exchange.flow_key.a, exchange.flow_key.b);
    let request_bytes = exchange.request.as_ref().map(|r| r.body.len() as u64).unwrap_or(0);
    let response_bytes = exchange.response.as_ref().map(|r| r.body.len() as u64).unwrap_or(0);
    let now = now_ms();
    let times = ObservedTimes {
        request_at_ms: exchange.request.as_ref().map(|_| now),
        response_at_ms: exchange.response.as_ref().map(|_| now),
    };
    let witness = witness_builder::build_witness(exchange, interface, stream_id, times, request_bytes, response_bytes);

    let Some(mut witness) = collector.lock().await.process(witness, now) else {
        return;
    };
    redactor.redact(&mut witness);
    uploader.enqueue(witness).await;
}

fn spawn_redaction_refresh(
    backend: Arc<dyn BackendClient>,
    service_id: String,
    redactor: Arc<Redactor>,
    interval_ms: u64,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    match backend.get_redaction_rules(&service_id).await {
                        Ok(rules) => redactor.update_rules(rules),
                        Err(e) => warn!(%e, "redaction rule refresh failed, keeping current rules"),
                    }
                }
            }
        }
    });
}

fn spawn_idle_sweeper(
    dispatcher: Arc<Mutex<Dispatcher>>,
    pairer: Arc<Mutex<Pairer>>,
    collector: Arc<Mutex<CollectorChain>>,
    redactor: Arc<Redactor>,
    uploader: Arc<Uploader>,
    idle_timeout_ms: i64,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(idle_timeout_ms.max(1000) as u64));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    let stale = dispatcher.lock().await.sweep_idle_flows(idle_timeout_ms);
                    for key in stale {
                        let exchanges = pairer.lock().await.flush_flow(&key);
                        for exchange in exchanges {
                            emit_witness(exchange, "idle-sweep", &collector, &redactor, &uploader).await;
                        }
                    }
                }
            }
        }
    });
}

fn spawn_uploader_tick(uploader: Arc<Uploader>, flush_ms: u64, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(flush_ms.max(100)));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => uploader.tick().await,
            }
        }
    });
}
