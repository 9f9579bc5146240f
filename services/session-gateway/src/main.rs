//! Session Gateway
//!
//! Single-binary Rust service that:
//! 1. Holds one authenticated session against a remote API
//! 2. Renews the session's credentials before they expire
//! 3. Forwards incoming requests with the session's bearer credential
//! 4. Fails fast while the remote is down (circuit breaker)

mod config;
mod error;
mod metrics;
mod proxy;
mod session_api;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use client::RequestPipeline;
use common::{EventBus, SystemClock};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, GatewayConfig};

/// How long in-flight requests may take to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    pipeline: Arc<RequestPipeline>,
    prometheus: PrometheusHandle,
    max_body_bytes: usize,
}

/// Build the axum router with all routes and shared state.
///
/// Applies a concurrency limit layer based on `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route(
            "/session",
            get(session_api::status)
                .post(session_api::sign_in)
                .delete(session_api::sign_out),
        )
        .fallback(proxy_handler)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
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

    info!("starting session-gateway");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

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
        listen_addr = %config.gateway.listen_addr,
        base_url = %config.client.base_url,
        storage = ?config.client.storage,
        "configuration loaded"
    );

    let pipeline = Arc::new(
        RequestPipeline::from_config(&config.client, Arc::new(SystemClock), EventBus::default())
            .await
            .context("failed to build request pipeline")?,
    );

    match establish_session(&pipeline, &config.gateway).await {
        Ok(_) => {}
        Err(e) if e.is_transient() => {
            warn!(error = %e, "startup sign-in failed, serving without a session");
        }
        Err(e) => return Err(e).context("startup sign-in failed"),
    }

    let renewal = session::spawn_renewal_task(
        pipeline.manager().clone(),
        config.client.renewal_check_interval(),
    );

    let app_state = AppState {
        pipeline,
        prometheus: prometheus_handle,
        max_body_bytes: config.gateway.max_body_bytes,
    };
    let app = build_router(app_state, config.gateway.max_connections);

    let listen_addr = config.gateway.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // Graceful shutdown with drain timeout enforcement:
    // 1. shutdown_signal() fires on SIGTERM/SIGINT
    // 2. axum stops accepting new connections and drains in-flight requests
    // 3. DRAIN_TIMEOUT bounds the drain so a slow client cannot block exit
    //
    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    renewal.abort();

    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Sign in with the configured account unless a usable session was restored
/// from storage. Returns whether a sign-in happened.
async fn establish_session(pipeline: &RequestPipeline, gateway: &GatewayConfig) -> error::Result<bool> {
    let Some((username, password)) = gateway.startup_credentials() else {
        info!("no startup credentials configured, waiting for POST /session");
        return Ok(false);
    };
    if pipeline.manager().session_status().await.authenticated {
        info!("restored stored session, skipping startup sign-in");
        return Ok(false);
    }

    let status = pipeline.sign_in(username, password).await?;
    info!(
        subject = status.subject.as_deref().unwrap_or("-"),
        "startup sign-in succeeded"
    );
    Ok(true)
}

/// Health endpoint: circuit state plus session summary.
/// Returns 200 unless the circuit is open, then 503.
async fn health_handler(State(state): State<AppState>) -> Response {
    let health = state.pipeline.health().await;
    let status = if health.is_available() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    proxy::json_response(status, &health)
}

/// Prometheus metrics endpoint in text exposition format.
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

/// Catch-all handler that forwards everything else to the remote API.
async fn proxy_handler(
    State(state): State<AppState>,
    request: axum::http::Request<axum::body::Body>,
) -> Response {
    proxy::forward(&state.pipeline, request, state.max_body_bytes, new_request_id()).await
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
///
/// A signal source that cannot be installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
