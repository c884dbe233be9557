//! Axum application state and router assembly.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::ledger::UsageLedger;
use crate::prediction::PredictionEngine;
use crate::router::RequestRouter;
use cruise_types::ProxyError;

const MAX_BODY_BYTES: usize = 100 * 1024 * 1024;

/// Shared state handed to every handler. The composition root builds one
/// of these; tests build their own with throwaway ledgers.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<UsageLedger>,
    pub prediction: Arc<PredictionEngine>,
    pub router: Arc<RequestRouter>,
    pub upstream: reqwest::Client,
    pub static_dir: Option<PathBuf>,
}

impl AppState {
    pub fn new(
        ledger: Arc<UsageLedger>,
        prediction: Arc<PredictionEngine>,
        router: Arc<RequestRouter>,
        static_dir: Option<PathBuf>,
    ) -> Self {
        Self { ledger, prediction, router, upstream: reqwest::Client::new(), static_dir }
    }
}

/// Build the proxy router.
///
/// Unmatched paths fall through to the `/v1/*` pass-through forwarder.
pub fn build_proxy_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::handle_index))
        .route("/health", get(handlers::handle_health))
        .route("/stats", get(handlers::handle_stats))
        .route("/v1/messages", post(handlers::handle_messages))
        .fallback(handlers::handle_passthrough)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

/// Owns the listener lifecycle for the proxy surface.
pub struct ProxyServer {
    host: String,
    port: u16,
    state: AppState,
}

impl ProxyServer {
    pub fn new(host: String, port: u16, state: AppState) -> Self {
        Self { host, port, state }
    }

    /// Bind and serve until a shutdown signal arrives, so the caller can
    /// close the ledger session on the way out.
    pub async fn run(self) -> Result<(), ProxyError> {
        let addr = format!("{}:{}", self.host, self.port);
        let app = build_proxy_router(self.state);

        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            ProxyError::Config { message: format!("Failed to bind {addr}: {e}") }
        })?;
        tracing::info!("Proxy listening on http://{}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Shutdown signal received");
            })
            .await
            .map_err(|e| ProxyError::Config { message: format!("Server error: {e}") })
    }
}
