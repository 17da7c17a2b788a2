//! Risk HTTP surface (spec §6): synchronous pre-trade validation and the
//! emergency-stop RPC. Grounded on
//! `original_source/trading-engine/risk-manager/src/api/endpoints/risk.py`'s
//! validate/emergency-stop pair, translated onto the in-process gate
//! (`risk::rules::RiskGate`) instead of a remote call.
//!
//! **Resolved ambiguity** (spec §9): emergency-stop fans out over
//! `OrderService::cancel` (already idempotent on terminal orders) and
//! `OrderService::flatten_now` (bypasses the queue so there is no race with
//! a worker), and a repeat call with `force: false` while already armed is a
//! pure no-op — both the flag and the empty closed/cancelled lists are
//! reproduced on every retry.

use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::kv::keys;
use crate::models::order::OrderSide;
use crate::models::position::{Position, PositionSide};
use crate::risk::rules::RuleLevel;
use crate::services::order_service::OrderFilters;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ValidateOrderRequest {
    pub strategy: String,
    pub venue: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub price: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct ValidateOrderResponse {
    pub valid: bool,
    pub rejected_reason: Option<String>,
    pub risk_level: RuleLevel,
    pub warnings: Vec<String>,
}

pub async fn validate_order(State(state): State<AppState>, Json(req): Json<ValidateOrderRequest>) -> Json<ValidateOrderResponse> {
    let notional = super::estimate_notional(&state.market_cache, &req.venue, &req.symbol, req.quantity, req.price);
    let result = state.risk_gate.check(&req.strategy, &req.venue, &req.symbol, notional);
    let warnings = result
        .checks
        .iter()
        .filter(|c| c.passed && c.level >= RuleLevel::Medium)
        .map(|c| format!("{} at {:.0}% of its cap", c.name, (c.observed / c.limit.max(f64::EPSILON)) * 100.0))
        .collect();
    Json(ValidateOrderResponse {
        valid: result.pass,
        rejected_reason: result.reason,
        risk_level: result.level,
        warnings,
    })
}

#[derive(Debug, Deserialize)]
pub struct EmergencyStopRequest {
    pub user_id: String,
    pub reason: Option<String>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct EmergencyStopResponse {
    pub success: bool,
    pub closed_positions: Vec<String>,
    pub cancelled_orders: Vec<Uuid>,
}

pub async fn emergency_stop(State(state): State<AppState>, Json(req): Json<EmergencyStopRequest>) -> Response {
    let flag_key = keys::emergency_stop(&req.user_id);
    let already_armed = state.kv.exists(&flag_key);
    if already_armed && !req.force {
        return Json(EmergencyStopResponse {
            success: true,
            closed_positions: Vec::new(),
            cancelled_orders: Vec::new(),
        })
        .into_response();
    }

    let reason = req.reason.clone().unwrap_or_else(|| "manual emergency stop".to_string());
    let _ = state.kv.set_json(
        &flag_key,
        &serde_json::json!({"timestamp": chrono::Utc::now(), "reason": reason}),
        Some(state.config.risk.emergency_stop_ttl),
    );

    let open_orders = state.orders.query(&OrderFilters {
        strategy: Some(req.user_id.clone()),
        ..Default::default()
    });
    let mut cancelled_orders = Vec::new();
    for order in open_orders.into_iter().filter(|o| !o.status.is_terminal()) {
        if state.orders.cancel(order.id, Some("emergency stop".to_string())).await.is_ok() {
            cancelled_orders.push(order.id);
        }
    }

    let open_positions = state.positions.query(Some(&req.user_id), None, None);
    let mut closed_positions = Vec::new();
    for pos in open_positions {
        let flatten_side = match pos.side {
            PositionSide::Long => OrderSide::Sell,
            PositionSide::Short => OrderSide::Buy,
        };
        match state
            .orders
            .flatten_now(pos.strategy.clone(), pos.venue.clone(), pos.symbol.clone(), flatten_side, pos.quantity)
            .await
        {
            Ok(_) => closed_positions.push(Position::key(&pos.strategy, &pos.venue, &pos.symbol)),
            Err(e) => {
                tracing::error!(user_id = %req.user_id, venue = %pos.venue, symbol = %pos.symbol, error = %e, "emergency stop failed to flatten position");
            }
        }
    }

    Json(EmergencyStopResponse { success: true, closed_positions, cancelled_orders }).into_response()
}
