//! Gemini API Key Proxy
//!
//! Single-binary Rust service that:
//! 1. Loads a pool of Gemini API keys from the environment
//! 2. Listens for incoming requests
//! 3. Injects a pool-selected `x-goog-api-key` header per request
//! 4. Proxies to generativelanguage.googleapis.com, failing over to the
//!    next key when a quota-class error comes back

mod config;
mod metrics;
mod proxy;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keypool::KeyPool;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::config::Config;
use crate::proxy::ProxyState;

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    proxy: ProxyState,
    pool: Arc<KeyPool>,
    started_at: std::time::Instant,
    prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
///
/// Applies a concurrency limit layer based on `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(proxy_handler)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting gemini-key-proxy");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.proxy.listen_addr,
        upstream_url = %config.proxy.upstream_url,
        cooldown_secs = config.pool.cooldown_secs,
        "configuration loaded"
    );

    // One pool per process, built once and shared by reference. Malformed
    // key configuration degrades to an empty or single-key pool — the
    // service still starts and reports the state via /health.
    let pool = Arc::new(KeyPool::from_config(
        config.key_list.as_ref().map(|s| s.expose().as_str()),
        config.single_key.as_ref().map(|s| s.expose().as_str()),
        Duration::from_secs(config.pool.cooldown_secs),
    ));
    if pool.status().total == 0 {
        warn!("no API keys configured — every request will be rejected with 503");
    }

    let proxy_state = ProxyState {
        client: reqwest::Client::new(),
        upstream_url: config.proxy.upstream_url.clone(),
        timeout: Duration::from_secs(config.proxy.timeout_secs),
        pool: pool.clone(),
    };

    let app_state = AppState {
        proxy: proxy_state,
        pool,
        started_at: std::time::Instant::now(),
        prometheus: prometheus_handle,
    };

    let app = build_router(app_state, config.proxy.max_connections);

    let listener = TcpListener::bind(config.proxy.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.proxy.listen_addr))?;

    info!(addr = %config.proxy.listen_addr, "accepting requests");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: 200 with "healthy"/"degraded" while at least one key is
/// selectable, 503 "unhealthy" when the pool is empty or fully quarantined.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let pool_status = state.pool.status();
    let uptime = state.started_at.elapsed().as_secs();

    let (status_code, overall) = if pool_status.total == 0 || pool_status.available == 0 {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    } else if pool_status.available < pool_status.total {
        (StatusCode::OK, "degraded")
    } else {
        (StatusCode::OK, "healthy")
    };

    let body = serde_json::json!({
        "status": overall,
        "keys_total": pool_status.total,
        "keys_available": pool_status.available,
        "keys_quarantined": pool_status.failed.len(),
        "uptime_seconds": uptime,
    });

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Diagnostics endpoint: the pool snapshot with masked key material.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(state.pool.status())
}

/// Prometheus metrics endpoint — returns metrics in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Catch-all handler that proxies all non-admin requests to upstream.
async fn proxy_handler(
    State(state): State<AppState>,
    request: axum::http::Request<axum::body::Body>,
) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    let method = request.method().to_string();
    let started = std::time::Instant::now();

    let response = proxy::proxy_request(&state.proxy, request, request_id).await;

    metrics::record_request(
        response.status().as_u16(),
        &method,
        started.elapsed().as_secs_f64(),
    );
    response
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
