/// Health endpoints
///
/// - `GET /health` — liveness plus store connectivity
/// - `GET /ready` — readiness (store reachable)
/// - `GET /health/workers` — worker manager health and statistics

use crate::app::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use runforge_worker::manager::ManagerStats;
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status: "healthy" or "degraded"
    pub status: String,

    /// Application version
    pub version: String,

    /// Store status: "connected" or "disconnected"
    pub database: String,
}

/// Worker health response
#[derive(Debug, Serialize)]
pub struct WorkerHealthResponse {
    pub status: String,
    #[serde(flatten)]
    pub stats: ManagerStats,
}

/// Liveness probe with store connectivity
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match state.store.ping().await {
        Ok(()) => "connected",
        Err(_) => "disconnected",
    };

    Json(HealthResponse {
        status: if database == "connected" {
            "healthy".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: database.to_string(),
    })
}

/// Readiness probe: 503 until the store answers
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "ready" })),
        ),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "not ready" })),
        ),
    }
}

/// Worker manager health: 503 when the pool degraded
pub async fn workers_health(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.manager.stats();
    let healthy = stats.is_running && stats.is_healthy;

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(WorkerHealthResponse {
            status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
            stats,
        }),
    )
}
