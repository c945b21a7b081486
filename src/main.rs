//! Cached Value demo server
//!
//! Serves a slow remote quote through a single-flight cached value with a
//! periodic and event driven refresh policy.

use std::net::SocketAddr;

use anyhow::Context;
use futures::StreamExt;
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cached_value::api::{create_router, AppState};
use cached_value::Config;

/// Main entry point for the demo server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Create the cached quote and bind it to the simulated remote
/// 4. Start the HTTP server on the configured port
/// 5. Handle graceful shutdown on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cached_value=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Cached Value demo server");

    let config = Config::from_env();
    info!(
        "Configuration loaded: port={}, refresh_interval={}s, refresh_on_login={}, throttle={}ms, latency={}ms",
        config.server_port,
        config.refresh_interval,
        config.refresh_on_login,
        config.fetch_throttle_ms,
        config.fetch_latency_ms
    );

    let state = AppState::from_config(&config).context("failed to bind the quote fetcher")?;
    info!("Cached quote initialized");

    // State transitions are only logged at debug level
    let mut states = state.quote.states();
    let state_log = tokio::spawn(async move {
        while let Some(state) = states.next().await {
            debug!(%state, "Cached quote state changed");
        }
    });

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    state_log.abort();
    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
