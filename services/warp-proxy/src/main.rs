//! Warp compat proxy
//!
//! Exposes an OpenAI-compatible `/v1/chat/completions` endpoint backed by
//! the Warp vendor backend. Owns the credential lifecycle (Secrets Store,
//! Account Registry, Refresh Coordinator) and the streaming response
//! adaptor; everything else — the OpenAI schema, the vendor's wire
//! encoding, the HTTP framework's routing internals — is treated as an
//! external collaborator this binary merely wires together.

mod admin;
mod chat;
mod config;
mod error;
mod metrics;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use chat::RequestCounters;
use config::Config;
use warp_auth::SecretsStore;
use warp_pool::{AccountRegistry, RefreshCoordinator};

#[derive(Clone)]
struct HealthState {
    coordinator: Arc<RefreshCoordinator>,
    registry: Option<Arc<AccountRegistry>>,
    counters: Arc<RequestCounters>,
    started_at: std::time::Instant,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());
    let config_path = Config::resolve_path(cli_config_path);
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    init_logging(&config.logging)?;

    info!(path = %config_path.display(), "starting warp-proxy");

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.server.timeout_secs))
        .build()
        .context("failed to build HTTP client")?;

    let secrets = Arc::new(
        SecretsStore::load(config.credentials.secrets_path.clone())
            .await
            .context("failed to load secrets store")?,
    );

    let registry = match &config.credentials.accounts_path {
        Some(path) => Some(Arc::new(
            AccountRegistry::load(path.clone())
                .await
                .context("failed to load account registry")?,
        )),
        None => None,
    };

    let coordinator = Arc::new(RefreshCoordinator::new(
        secrets,
        registry.clone(),
        http.clone(),
        config.credentials.quota_refresh_threshold,
    ));

    warm_up(&coordinator, &config.credentials.warmup).await;

    let metrics_handle = metrics::install_recorder();
    let counters = Arc::new(RequestCounters::default());

    let chat_state = chat::ChatState {
        coordinator: coordinator.clone(),
        upstream: Arc::new(chat::HttpUpstream::new(
            http.clone(),
            config.server.upstream_base_url.clone(),
        )),
        max_retries: config.server.max_retries,
        counters: counters.clone(),
    };

    let health_state = HealthState {
        coordinator: coordinator.clone(),
        registry: registry.clone(),
        counters,
        started_at: std::time::Instant::now(),
    };

    let metrics_router = Router::new().route(
        "/metrics",
        get(move || {
            let handle = metrics_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_router = Router::new()
        .route("/health", get(health_handler))
        .with_state(health_state);
    let chat_router = Router::new()
        .route("/v1/chat/completions", post(chat::chat_completions))
        .with_state(chat_state);

    let app = Router::new().merge(metrics_router).merge(health_router).merge(chat_router);

    let admin_state = admin::AdminState::new(registry);
    let admin_app = admin::build_admin_router(admin_state);

    let listener = TcpListener::bind(config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.server.listen_addr))?;
    let admin_listener = TcpListener::bind(config.server.admin_listen_addr)
        .await
        .with_context(|| {
            format!(
                "failed to bind admin listener to {}",
                config.server.admin_listen_addr
            )
        })?;

    info!(addr = %config.server.listen_addr, "listening");
    info!(addr = %config.server.admin_listen_addr, "admin listening");

    let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    let serve_admin = axum::serve(admin_listener, admin_app).with_graceful_shutdown(shutdown_signal());

    tokio::select! {
        result = serve => result.context("proxy server error")?,
        result = serve_admin => result.context("admin server error")?,
    }

    info!("shutdown complete");
    Ok(())
}

/// Retry an initial `ensure_valid_access` up to `init_retries` times before
/// the server starts accepting traffic, then a second, shorter round of
/// `warmup_retries` — mirroring the two-phase `WARP_COMPAT_*` knobs the
/// upstream bridge exposed. A failure here is logged, not fatal: the first
/// real request will simply pay the refresh cost itself.
async fn warm_up(coordinator: &RefreshCoordinator, warmup: &config::WarmupConfig) {
    for attempt in 1..=warmup.init_retries {
        match coordinator.ensure_valid_access(false).await {
            Ok(_) => {
                info!(attempt, "initial credential warm-up succeeded");
                return;
            }
            Err(e) if attempt == warmup.init_retries => {
                warn!(error = %e, attempts = attempt, "initial warm-up did not succeed");
            }
            Err(e) => {
                warn!(error = %e, attempt, "warm-up attempt failed, retrying");
                tokio::time::sleep(Duration::from_millis(warmup.init_delay_ms)).await;
            }
        }
    }

    for attempt in 1..=warmup.warmup_retries {
        if coordinator.ensure_valid_access(false).await.is_ok() {
            info!(attempt, "follow-up warm-up succeeded");
            return;
        }
        tokio::time::sleep(Duration::from_millis(warmup.warmup_delay_ms)).await;
    }
    warn!("credential warm-up exhausted all retries; first request will refresh inline");
}

/// `GET /health` — process uptime, request/error counters, and (when an
/// accounts file is configured) the Account Registry's status breakdown.
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    use std::sync::atomic::Ordering;

    let uptime = state.started_at.elapsed().as_secs();
    let healthy = state.coordinator.ensure_valid_access(false).await.is_ok();

    let mut body = serde_json::json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "uptime_seconds": uptime,
        "requests_served": state.counters.requests_total.load(Ordering::Relaxed),
        "errors_total": state.counters.errors_total.load(Ordering::Relaxed),
    });

    if let Some(registry) = &state.registry {
        let (available, quota_exhausted, refresh_failed, invalid_token) = registry.status_counts().await;
        body["accounts"] = serde_json::json!({
            "total": available + quota_exhausted + refresh_failed + invalid_token,
            "available": available,
            "quota_exhausted": quota_exhausted,
            "refresh_failed": refresh_failed,
            "invalid_token": invalid_token,
        });
    }

    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

fn init_logging(logging: &config::LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(logging.level.clone()));

    let registry = tracing_subscriber::registry().with(filter);

    if logging.enable_rotation {
        let directory = logging
            .directory
            .clone()
            .unwrap_or_else(|| std::path::PathBuf::from("logs"));
        std::fs::create_dir_all(&directory).context("failed to create log directory")?;
        let rotation = if logging.enable_backup {
            tracing_appender::rolling::daily(&directory, "warp-proxy.log")
        } else {
            tracing_appender::rolling::never(&directory, "warp-proxy.log")
        };
        let (non_blocking, guard) = tracing_appender::non_blocking(rotation);
        // Leaked deliberately: the guard must outlive the subscriber, which
        // is installed for the process's entire lifetime.
        Box::leak(Box::new(guard));

        match logging.format {
            config::LogFormat::Json => registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(non_blocking))
                .init(),
            config::LogFormat::Pretty => registry
                .with(tracing_subscriber::fmt::layer().pretty().with_writer(non_blocking))
                .init(),
        }
    } else {
        match logging.format {
            config::LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
            config::LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer().pretty()).init(),
        }
    }

    Ok(())
}

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
