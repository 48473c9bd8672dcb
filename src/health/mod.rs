//! Health check endpoints

use crate::metrics::PoolMetrics;
use crate::shard::ShardManager;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub shard_count: u32,
}

/// Readiness check response
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub shards_total: usize,
    pub shards_ready: usize,
    pub entities_total: u64,
    pub rescaling: bool,
}

/// Application state for health endpoints
#[derive(Clone)]
pub struct AppState {
    pub manager: ShardManager,
    pub metrics: Option<PoolMetrics>,
}

/// Create the health check router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Health endpoint - always returns 200 if process is running
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        shard_count: state.manager.shard_count(),
    })
}

/// Readiness endpoint - returns 200 if at least one shard is ready
async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.manager.full_status().await;
    let shards_ready = status.healthy_shards();

    let response = ReadyResponse {
        ready: shards_ready > 0,
        shards_total: status.shard_count(),
        shards_ready,
        entities_total: status.total_entities,
        rescaling: state.manager.is_rescaling(),
    };

    if response.ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Status endpoint - full per-shard snapshot
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.manager.full_status().await)
}

/// Metrics endpoint - returns Prometheus format metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    // Refresh the status gauges
    state.manager.full_status().await;

    let body = state
        .metrics
        .as_ref()
        .map(PoolMetrics::render)
        .unwrap_or_default();

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
}
