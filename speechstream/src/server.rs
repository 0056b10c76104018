//! Server lifecycle
//!
//! Starts the janitor and the HTTP listener, then tears both down in order
//! when a shutdown signal arrives.

use anyhow::Context;
use speechstream_api::{create_router, AppState};
use speechstream_hls::spawn_janitor;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct SpeechServer {
    state: AppState,
}

impl SpeechServer {
    pub const fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Serve until SIGINT/SIGTERM, then stop the janitor and drop every session.
    pub async fn run(self) -> anyhow::Result<()> {
        let config = Arc::clone(&self.state.config);
        let registry = Arc::clone(&self.state.registry);

        let cancel = CancellationToken::new();
        let janitor = spawn_janitor(Arc::clone(&registry), config.janitor_config(), cancel.clone());

        let http_addr = config.http_address();
        let listener = tokio::net::TcpListener::bind(&http_addr)
            .await
            .with_context(|| format!("failed to bind HTTP listener on {http_addr}"))?;
        info!("HTTP server listening on {}", http_addr);

        let router = create_router(self.state);
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await;
        if let Err(e) = &served {
            error!("HTTP server error: {}", e);
        }

        cancel.cancel();
        if let Err(e) = janitor.await {
            warn!("Janitor task ended abnormally: {}", e);
        }

        let removed = registry.clear().await;
        info!(sessions = removed, "Shutdown complete");

        served.context("HTTP server failed")
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C, shutting down"); }
        () = terminate => { info!("Received SIGTERM, shutting down"); }
    }
}
