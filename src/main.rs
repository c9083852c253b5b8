//! AutoReply Proxy - Main entry point
//!
//! This binary loads configuration from the environment, builds the router
//! and serves it until the process is stopped.

use anyhow::{Context, Result};
use autoreply_proxy::{
    api::{build_http_client, build_router, AppState},
    core::{init_metrics, init_tracing, AppConfig},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// How often expired rate-limit windows are dropped.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

fn main() -> Result<()> {
    // Load .env file if present (before reading any environment variables)
    dotenvy::dotenv().ok();

    // Worker threads from the environment, the cgroup quota or the host
    let worker_threads = std::env::var("TOKIO_WORKER_THREADS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or_else(default_worker_threads);

    println!("Tokio runtime: using {} worker threads", worker_threads);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    init_tracing();
    init_metrics();

    let config = AppConfig::from_env()?;
    if config.openai_api_key.is_none() {
        tracing::warn!("OPENAI_API_KEY is not set; relay requests will fail until it is configured");
    }
    if config.proxy_secret.is_none() {
        tracing::info!("PROXY_SECRET is not set; requests are accepted without a shared secret");
    }

    let http_client =
        build_http_client(config.request_timeout()).context("Failed to build HTTP client")?;

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid bind address {}:{}",
                config.server.host, config.server.port
            )
        })?;

    tracing::info!(
        default_model = %config.default_model,
        transcription_model = %config.transcription_model,
        api_base = %config.api_base,
        generate_rate_limit = config.rate_limit.generate_per_minute,
        transcribe_rate_limit = config.rate_limit.transcribe_per_minute,
        max_attempts = config.retry.max_attempts,
        "Configuration loaded"
    );

    let state = Arc::new(AppState::new(config, http_client));
    spawn_purge_task(state.clone());

    let app = build_router(state);

    tracing::info!("Starting AutoReply proxy on {}", addr);
    tracing::info!("Relay API: /generate, /transcribe");
    tracing::info!("Swagger UI: /swagger-ui");
    tracing::info!("Metrics endpoint: /metrics");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Periodically drop rate-limit windows that have expired.
fn spawn_purge_task(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            state.purge_expired();
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Worker count from the container CPU quota, or the host's parallelism.
fn default_worker_threads() -> usize {
    detect_cpu_limit()
        .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
        .unwrap_or(1)
}

/// Read the CPU quota of the enclosing cgroup, v2 first, then v1.
fn detect_cpu_limit() -> Option<usize> {
    if let Ok(max) = std::fs::read_to_string("/sys/fs/cgroup/cpu.max") {
        let mut fields = max.split_whitespace();
        if let (Some(quota), Some(period)) = (fields.next(), fields.next()) {
            return quota_to_cores(quota, period);
        }
    }

    let quota = std::fs::read_to_string("/sys/fs/cgroup/cpu/cpu.cfs_quota_us").ok()?;
    let period = std::fs::read_to_string("/sys/fs/cgroup/cpu/cpu.cfs_period_us").ok()?;
    quota_to_cores(&quota, &period)
}

/// Convert a cgroup quota/period pair to whole cores, rounding up.
///
/// Unlimited quotas (`max` in v2, `-1` in v1) yield `None`.
fn quota_to_cores(quota: &str, period: &str) -> Option<usize> {
    let quota = quota.trim().parse::<i64>().ok()?;
    let period = period.trim().parse::<i64>().ok()?;
    if quota <= 0 || period <= 0 {
        return None;
    }
    Some(((quota as f64 / period as f64).ceil() as usize).max(1))
}
