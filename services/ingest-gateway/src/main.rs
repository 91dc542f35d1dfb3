//! Drive ingest gateway
//!
//! Single-binary Rust service that:
//! 1. Loads delegated credentials and client secrets at startup
//! 2. Serves the authorization handshake (/authorize, /oauth2callback)
//! 3. Accepts JSON payloads on /upload-json, stages them locally, and
//!    uploads them to the remote object store

mod config;
mod metrics;
mod routes;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use drive_auth::{ApplicationSecrets, CredentialManager, CredentialStore, HandshakeHandler};
use ingest::{DriveClient, IngestPipeline, StagingArea};

use crate::config::Config;
use crate::routes::{AppState, build_router};

/// Maximum time to wait for in-flight requests after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

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

    info!("starting drive-ingest-gateway");

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
        listen_addr = %config.server.listen_addr,
        credentials_path = %config.auth.credentials_path.display(),
        staging_dir = %config.drive.staging_dir.display(),
        folder_id = %config.drive.folder_id,
        "configuration loaded"
    );

    // Client secrets are required for both handshake and refresh; a
    // missing or malformed secrets file is fatal at startup, never a
    // per-request surprise.
    let secrets = ApplicationSecrets::load(&config.auth.client_secrets_path)
        .with_context(|| {
            format!(
                "failed to load client secrets from {}",
                config.auth.client_secrets_path.display()
            )
        })?;
    let secrets = Arc::new(secrets);

    let staging = StagingArea::new(config.drive.staging_dir.clone());
    staging
        .ensure()
        .await
        .with_context(|| format!("failed to create staging dir {}", staging.dir().display()))?;

    // A missing credential file is the unauthenticated state, not an error
    let store = CredentialStore::open(config.auth.credentials_path.clone())
        .await
        .with_context(|| {
            format!(
                "failed to open credential store at {}",
                config.auth.credentials_path.display()
            )
        })?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.server.request_timeout_secs))
        .build()
        .context("failed to build HTTP client")?;

    let manager = Arc::new(CredentialManager::new(
        Arc::new(store),
        secrets.clone(),
        http.clone(),
    ));

    match manager.status().await {
        status if status.is_usable() => info!("existing credential loaded"),
        status => info!(?status, "no usable credential; authorization flow available at /authorize"),
    }

    let handshake = Arc::new(HandshakeHandler::new(
        secrets,
        http.clone(),
        config.auth.scopes.clone(),
    ));

    let pipeline = Arc::new(IngestPipeline::new(
        staging,
        DriveClient::new(config.drive.upload_url.clone(), config.drive.folder_id.clone()),
        manager.clone(),
    ));

    let app_state = AppState {
        manager,
        handshake,
        pipeline,
        external_base_url: config.server.external_base_url.clone(),
        force_https: config.server.force_https,
        prometheus: prometheus_handle,
    };

    let app = build_router(app_state, config.server.max_connections);

    let listener = TcpListener::bind(config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.server.listen_addr))?;

    info!(addr = %config.server.listen_addr, "accepting requests");

    // Graceful shutdown with drain timeout enforcement:
    // 1. shutdown_signal() fires on SIGTERM/SIGINT
    // 2. axum stops accepting new connections and drains in-flight requests
    // 3. DRAIN_TIMEOUT bounds the drain so a slow client cannot block exit
    //
    // The drain timer starts when the signal fires, not when the server
    // starts, hence the oneshot notification plus timeout race.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
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
