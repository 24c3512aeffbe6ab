//! Admin API for the informer

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use informer_core::RawObject;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::InformerStats;

/// Admin API state
#[derive(Clone)]
pub struct AdminState {
    pub stats: Arc<dyn Fn() -> InformerStats + Send + Sync>,
    pub objects: Arc<dyn Fn() -> Vec<Arc<RawObject>> + Send + Sync>,
    pub ready: Arc<dyn Fn() -> bool + Send + Sync>,
}

/// Health response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn live() -> &'static str {
    "OK"
}

async fn ready(State(state): State<AdminState>) -> (StatusCode, &'static str) {
    if (state.ready)() {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT SYNCED")
    }
}

async fn stats(State(state): State<AdminState>) -> Json<InformerStats> {
    Json((state.stats)())
}

async fn objects(State(state): State<AdminState>) -> Json<Vec<Arc<RawObject>>> {
    Json((state.objects)())
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/live", get(live))
        .route("/health/ready", get(ready))
        .route("/stats", get(stats))
        .route("/objects", get(objects))
        .with_state(state)
}

/// Run admin server until `shutdown` fires
pub async fn run_admin_server(listen: String, state: AdminState, shutdown: CancellationToken) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(&listen).await?;
    info!(listen, "Admin API started");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
