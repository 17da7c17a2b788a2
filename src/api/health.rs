//! `GET /health` (spec §6): queue health folds into an overall status tag.

use axum::extract::State;
use axum::response::Json;
use serde::Serialize;

use crate::queue::QueueStatus;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub queue_stats: QueueStatus,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let queue_stats = state.queue.status();
    let status = match queue_stats.health.as_str() {
        "healthy" => "healthy",
        "degraded" => "degraded",
        _ => "unhealthy",
    }
    .to_string();
    Json(HealthResponse { status, queue_stats })
}
