//! OAuth Auth Proxy
//!
//! Single-binary Rust service that:
//! 1. Sends unauthenticated browsers through an OAuth2 authorization-code handshake
//! 2. Issues a signed session cookie once the identity validator approves
//! 3. Verifies that cookie on every request
//! 4. Proxies authenticated requests to the upstream selected by path prefix

mod config;
mod error;
mod gate;
mod metrics;
mod pages;
mod proxy;
mod routes;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use identity::{AllowListValidator, CommandValidator, IdentityValidator};
use oauth_client::OAuthClient;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metrics_exporter_prometheus::PrometheusHandle;

use crate::config::{Config, ValidatorConfig};
use crate::gate::AuthGate;
use crate::metrics::ServiceMetrics;
use crate::proxy::UpstreamForwarder;
use crate::routes::RouteTable;

/// How long in-flight requests may drain after a shutdown signal
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    gate: Arc<AuthGate>,
    metrics: ServiceMetrics,
    prometheus: PrometheusHandle,
    upstreams: Arc<Vec<String>>,
}

/// Build the axum router with all routes and shared state.
///
/// Health and metrics live under `/oauth2/` and bypass the gate; everything
/// else goes through it. A concurrency limit layer caps in-flight requests at
/// `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/oauth2/health", get(health_handler))
        .route("/oauth2/metrics", get(metrics_handler))
        .fallback(gate_handler)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Instantiate the configured identity policy.
///
/// The allow-list file is read here, once; a missing or unreadable file
/// aborts startup.
fn build_validator(config: &ValidatorConfig) -> Result<Arc<dyn IdentityValidator>> {
    match config {
        ValidatorConfig::AllowList {
            email_domain,
            authenticated_emails_file,
        } => {
            let validator = AllowListValidator::load(
                email_domain.as_deref(),
                authenticated_emails_file.as_deref(),
            )
            .context("failed to load allow-list validator")?;
            Ok(Arc::new(validator))
        }
        ValidatorConfig::Command {
            command,
            args,
            timeout_secs,
        } => Ok(Arc::new(CommandValidator::new(
            command.clone(),
            args.clone(),
            Duration::from_secs(*timeout_secs),
        ))),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // CLI: simple --config / --version flag parsing
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--version") {
        println!("oauth-auth-proxy {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting oauth-auth-proxy");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let routes = RouteTable::from_upstreams(&config.proxy.upstreams)
        .context("invalid upstream configuration")?;
    for route in routes.routes() {
        info!(prefix = route.prefix(), upstream = route.target(), "mapping path to upstream");
    }

    let validator = build_validator(&config.validator)?;
    let http = reqwest::Client::new();
    let oauth = OAuthClient::new(
        http.clone(),
        config.oauth_config()?,
        Duration::from_secs(config.oauth.timeout_secs),
    );
    let forwarder = UpstreamForwarder::new(
        http,
        Arc::new(routes),
        Duration::from_secs(config.proxy.timeout_secs),
    );

    let gate = AuthGate::new(
        oauth,
        config.cookie_codec()?,
        validator,
        Arc::new(forwarder),
    )
    .with_cookie_domain(config.cookie.domain.clone())
    .with_sign_in_message(config.sign_in_message());

    info!(
        listen_addr = %config.proxy.listen_addr,
        upstreams = config.proxy.upstreams.len(),
        validator = gate.validator_id(),
        cookie = %config.cookie.name,
        redirect_url = %config.oauth.redirect_url,
        "configuration loaded"
    );

    let metrics = ServiceMetrics::new();
    let app_state = AppState {
        gate: Arc::new(gate),
        metrics,
        prometheus: prometheus_handle,
        upstreams: Arc::new(config.proxy.upstreams.clone()),
    };

    let app = build_router(app_state, config.proxy.max_connections);

    let listen_addr = config.proxy.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;

    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts: notify the server to drain, then race the drain against
    // the timeout.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .await
    });

    shutdown_signal().await;

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

/// Health endpoint: JSON with status, uptime, requests seen and upstreams.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "healthy",
        "uptime_seconds": state.metrics.started_at.elapsed().as_secs(),
        "requests_total": state.metrics.requests_total.load(Ordering::Relaxed),
        "upstreams": *state.upstreams,
        "validator": state.gate.validator_id(),
    });

    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint — returns metrics in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Catch-all handler: every other request goes through the auth gate.
async fn gate_handler(
    State(state): State<AppState>,
    request: axum::http::Request<axum::body::Body>,
) -> Response {
    state.metrics.requests_total.fetch_add(1, Ordering::Relaxed);
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    state.gate.handle(request, request_id).await
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
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
            Ok(mut signal) => {
                signal.recv().await;
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
