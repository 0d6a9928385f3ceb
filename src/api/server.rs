//! HTTP server

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{self, AppState};
use crate::Orchestrator;

/// Build the API router; exposed for in-process testing
pub fn router(orchestrator: Arc<Orchestrator>, shutdown: CancellationToken) -> Router {
    let state = AppState {
        orchestrator,
        shutdown,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(handlers::health))

        // Deployments
        .route("/deploy", post(handlers::deploy))
        .route("/deploy-all-tests", post(handlers::deploy_all))
        .route("/deployments/active", get(handlers::active_deployments))

        // Inventory
        .route("/list", get(handlers::list))
        .route("/status/:id", get(handlers::status))
        .route("/logs/:id", get(handlers::logs))
        .route("/delete/:id", delete(handlers::delete))

        // Catalog
        .route("/frameworks", get(handlers::frameworks))

        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// HTTP API Server
pub struct Server {
    router: Router,
    addr: SocketAddr,
    shutdown: CancellationToken,
}

impl Server {
    pub fn new(orchestrator: Orchestrator, addr: SocketAddr) -> Self {
        let shutdown = CancellationToken::new();
        Self {
            router: router(Arc::new(orchestrator), shutdown.clone()),
            addr,
            shutdown,
        }
    }

    /// Serve until Ctrl-C; in-flight deployments are cancelled and rolled back
    pub async fn run(self) -> Result<(), std::io::Error> {
        tracing::info!("Starting API server on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        let shutdown = self.shutdown.clone();
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for shutdown signal");
                    std::future::pending::<()>().await;
                }
                tracing::info!("Shutting down, cancelling in-flight deployments");
                shutdown.cancel();
            })
            .await
    }
}
