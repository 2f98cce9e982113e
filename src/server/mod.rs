//! HTTP API for uploading papers, browsing the question bank and running
//! quizzes.
//!
//! Every handler works against the same [`AppState`]: the pipeline handles
//! created at start-up plus the pipeline configuration. Long extractions
//! run inside the request; a client that needs to fire and forget should
//! upload first (`POST /api/papers`) and trigger extraction separately.

mod error;
mod handlers;
mod routes;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use crate::config::PipelineConfig;
use crate::extract::PipelineDeps;

/// Shared state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    pub deps: PipelineDeps,
    pub config: Arc<PipelineConfig>,
}

impl AppState {
    pub fn new(deps: PipelineDeps, config: PipelineConfig) -> Self {
        Self {
            deps,
            config: Arc::new(config),
        }
    }
}

/// Start the server and run until Ctrl-C or SIGTERM.
pub async fn serve(state: AppState, addr: SocketAddr) -> std::io::Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Starting server at http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Ctrl-C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler unavailable: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
