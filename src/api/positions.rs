//! Position HTTP surface (spec §6): list/fetch plus venue sync.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use crate::models::position::Position;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct PositionListQuery {
    pub strategy: Option<String>,
    pub venue: Option<String>,
    pub symbol: Option<String>,
}

pub async fn list_positions(State(state): State<AppState>, Query(q): Query<PositionListQuery>) -> Json<Vec<Position>> {
    Json(state.positions.query(q.strategy.as_deref(), q.venue.as_deref(), q.symbol.as_deref()))
}

pub async fn get_position(State(state): State<AppState>, Path((strategy, venue, symbol)): Path<(String, String, String)>) -> Response {
    match state.positions.get(&strategy, &venue, &symbol) {
        Some(p) => Json(p).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct SyncPositionsRequest {
    pub strategy: Option<String>,
}

pub async fn sync_positions(State(state): State<AppState>, Path(venue): Path<String>, body: Option<Json<SyncPositionsRequest>>) -> Response {
    let Some(adapter) = state.orders.venue_for(&venue) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let strategy = body.and_then(|Json(b)| b.strategy).unwrap_or_else(|| "default".to_string());
    match state.positions.sync(&venue, &adapter, &strategy).await {
        Ok(count) => Json(serde_json::json!({"synced": count})).into_response(),
        Err(e) => e.into_response(),
    }
}
