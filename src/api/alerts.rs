//! Alert HTTP surface (spec §6): paginated list, acknowledge, cleanup.
//! Grounded on
//! `original_source/trading-engine/risk-manager/src/api/endpoints/alerts.py`.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use uuid::Uuid;

use crate::models::alert::Alert;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListAlertsQuery {
    pub acknowledged: Option<bool>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

pub async fn list_alerts(State(state): State<AppState>, Path(user_id): Path<String>, Query(q): Query<ListAlertsQuery>) -> Json<Vec<Alert>> {
    let page_size = q.page_size.unwrap_or(50);
    let page = q.page.unwrap_or(0);
    Json(state.alerts.list(&user_id, q.acknowledged, page_size, page * page_size))
}

pub async fn acknowledge_alert(State(state): State<AppState>, Path((user_id, alert_id)): Path<(String, Uuid)>) -> Response {
    match state.alerts.acknowledge(&user_id, alert_id) {
        Some(alert) => Json(alert).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct CleanupQuery {
    pub days: Option<i64>,
}

pub async fn cleanup_alerts(State(state): State<AppState>, Path(user_id): Path<String>, Query(q): Query<CleanupQuery>) -> Json<serde_json::Value> {
    let removed = state.alerts.cleanup(&user_id, q.days.unwrap_or(30));
    Json(serde_json::json!({"removed": removed}))
}
