//! # HTTP servers
//!
//! HTTP endpoints of the controller:
//!
//! - `/metrics` on the metrics bind address - Prometheus metrics in text format
//! - `/healthz` and `/readyz` on the health probe bind address - Kubernetes probes
//!
//! Readiness flips off once a shutdown signal is received, so rolling
//! updates drain in-flight reconciliations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, TextEncoder};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::metrics;

/// Shared readiness state of the controller.
pub struct ServerState {
    pub is_ready: AtomicBool,
}

impl ServerState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            is_ready: AtomicBool::new(true),
        })
    }

    pub fn mark_not_ready(&self) {
        self.is_ready.store(false, Ordering::Relaxed);
    }

    pub fn is_ready(&self) -> bool {
        self.is_ready.load(Ordering::Relaxed)
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self {
            is_ready: AtomicBool::new(true),
        }
    }
}

/// Serves Prometheus metrics on the given address.
pub async fn start_metrics_server(addr: &str) -> Result<(), anyhow::Error> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http());
    let listener = TcpListener::bind(addr).await?;

    info!("metrics server listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Serves liveness and readiness probes on the given address.
pub async fn start_health_server(addr: &str, state: Arc<ServerState>) -> Result<(), anyhow::Error> {
    let app = Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);
    let listener = TcpListener::bind(addr).await?;

    info!("health probe server listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metrics::gather(), &mut buffer) {
        error!("failed to encode metrics: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {e}"),
        )
            .into_response();
    }

    (StatusCode::OK, buffer).into_response()
}

async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readyz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting down")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_state_toggles_readiness() {
        let state = ServerState::new();
        assert!(state.is_ready());

        state.mark_not_ready();
        assert!(!state.is_ready());
    }
}
