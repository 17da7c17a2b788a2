//! Order gateway HTTP surface (spec §6): create/cancel/fetch/list/statistics
//! plus TWAP/iceberg progress and queue status. Grounded on teacher's
//! `api/routes.rs` handler shape (`Query`/`State` extraction, typed JSON
//! responses) generalized from signal-serving to order-serving.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::order::{Order, OrderStatus};
use crate::queue::QueueStatus;
use crate::services::order_service::{CreateOrderRequest, OrderFilters, OrderStatistics};
use crate::AppState;

pub async fn create_order(State(state): State<AppState>, Json(req): Json<CreateOrderRequest>) -> Response {
    let notional = super::estimate_notional(&state.market_cache, &req.venue, &req.symbol, req.quantity, req.price);
    let gate = state.risk_gate.check(&req.strategy, &req.venue, &req.symbol, notional);
    if !gate.pass {
        let emergency_stop = gate.checks.last().map(|c| c.name == "emergency_stop").unwrap_or(false);
        if emergency_stop {
            return (StatusCode::CONFLICT, Json(serde_json::json!({"error": "trading suspended due to emergency stop"}))).into_response();
        }
        return AppError::rejection(gate.reason.unwrap_or_else(|| "risk check failed".to_string())).into_response();
    }
    match state.orders.create(req) {
        Ok(order) => (StatusCode::CREATED, Json(order)).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct CancelOrderRequest {
    pub reason: Option<String>,
}

pub async fn cancel_order(State(state): State<AppState>, Path(id): Path<Uuid>, body: Option<Json<CancelOrderRequest>>) -> Response {
    if state.orders.get(id).is_none() {
        return StatusCode::NOT_FOUND.into_response();
    }
    let reason = body.and_then(|Json(b)| b.reason);
    match state.orders.cancel(id, reason).await {
        Ok(order) => Json(order).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn get_order(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match state.orders.get(id) {
        Some(order) => Json(order).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct OrderListQuery {
    pub strategy: Option<String>,
    pub venue: Option<String>,
    pub symbol: Option<String>,
    pub status: Option<OrderStatus>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

pub async fn list_orders(State(state): State<AppState>, Query(q): Query<OrderListQuery>) -> Json<Vec<Order>> {
    let filters = OrderFilters {
        strategy: q.strategy,
        venue: q.venue,
        symbol: q.symbol,
        status: q.status,
        limit: q.limit.unwrap_or(0),
        offset: q.offset.unwrap_or(0),
    };
    Json(state.orders.query(&filters))
}

#[derive(Debug, Deserialize)]
pub struct StatisticsQuery {
    pub strategy: Option<String>,
}

pub async fn statistics(State(state): State<AppState>, Query(q): Query<StatisticsQuery>) -> Json<OrderStatistics> {
    Json(state.orders.statistics(q.strategy.as_deref()))
}

pub async fn twap_progress(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match state.orders.twap_plans.read().get(&id) {
        Some(plan) => Json(plan.progress()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn iceberg_progress(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match state.orders.iceberg_plans.read().get(&id) {
        Some(plan) => Json(plan.progress()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn queue_status(State(state): State<AppState>) -> Json<QueueStatus> {
    Json(state.queue.status())
}
