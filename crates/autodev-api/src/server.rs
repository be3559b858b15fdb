//! API server implementation.
//!
//! Wires the engine, the lock manager, and the routes into an axum router
//! and serves it.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use autodev_core::{Error, KvStore, LockManager, Result};
use autodev_engine::{ClusterBackend, SessionEngine};

use crate::config::Config;
use crate::routes::sessions::MessageResponse;

/// Shared application state for all request handlers.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// The session lifecycle engine.
    pub engine: SessionEngine,
    /// Distributed lock manager for session and ingress locks.
    pub locks: LockManager,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("engine", &"<SessionEngine>")
            .field("locks", &"<LockManager>")
            .finish()
    }
}

/// Health check.
#[utoipa::path(
    get,
    path = "/healthcheck",
    tag = "health",
    responses((status = 200, description = "Server is running", body = MessageResponse))
)]
pub(crate) async fn healthcheck() -> impl IntoResponse {
    Json(MessageResponse {
        message: "server is running".to_string(),
    })
}

/// HTTP server for the session API.
pub struct Server {
    config: Config,
    kv: Arc<dyn KvStore>,
    cluster: Arc<dyn ClusterBackend>,
}

impl Server {
    /// Creates a server over the given KV and cluster backends.
    #[must_use]
    pub fn new(config: Config, kv: Arc<dyn KvStore>, cluster: Arc<dyn ClusterBackend>) -> Self {
        Self {
            config,
            kv,
            cluster,
        }
    }

    /// Builds the router with all routes and middleware.
    ///
    /// Also used directly by integration tests against in-memory backends.
    #[must_use]
    pub fn router(&self) -> Router {
        crate::metrics::init_metrics();

        let state = Arc::new(AppState {
            engine: SessionEngine::new(
                Arc::clone(&self.kv),
                Arc::clone(&self.cluster),
                self.config.engine_config(),
            ),
            locks: LockManager::new(Arc::clone(&self.kv)),
            config: self.config.clone(),
        });

        Router::new()
            .route("/healthcheck", get(healthcheck))
            .route("/metrics", get(crate::metrics::serve_metrics))
            .route("/openapi.json", get(crate::openapi::serve_openapi))
            .merge(crate::routes::routes())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(crate::metrics::metrics_middleware))
            .with_state(state)
    }

    /// Starts the server and blocks until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot bind to the configured port.
    pub async fn serve(self) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        let router = self.router();

        tracing::info!(port = self.config.http_port, "starting autodev API server");

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::transport_with_source(format!("failed to bind to {addr}"), e))?;

        axum::serve(listener, router)
            .await
            .map_err(|e| Error::transport_with_source("server error", e))
    }
}
