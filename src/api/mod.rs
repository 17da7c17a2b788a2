//! Order gateway HTTP surface (spec §6). Grounded on teacher's
//! `api/routes.rs` module layout: one file per resource, a single
//! `Router::new().route(...)` assembly point.

pub mod alerts;
pub mod health;
pub mod orders;
pub mod positions;
pub mod risk;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::market_data::MarketDataCache;
use crate::AppState;

/// Best-effort notional estimate for the pre-trade gate: the quoted price if
/// the intent carries one (limit/iceberg), else the freshest cached ticker.
/// A cache miss (no ticker seen yet) estimates zero rather than blocking the
/// gate — the per-order/instrument/total caps all degrade to "anything
/// passes" until a price is observed, which only the first order for a new
/// instrument on a cold cache exercises.
pub(crate) fn estimate_notional(cache: &MarketDataCache, venue: &str, symbol: &str, quantity: f64, price: Option<f64>) -> f64 {
    let reference = price.or_else(|| cache.get_ticker(venue, symbol).map(|t| t.last)).unwrap_or(0.0);
    quantity * reference
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/orders", post(orders::create_order).get(orders::list_orders))
        .route("/v1/orders/statistics", get(orders::statistics))
        .route("/v1/orders/queue/status", get(orders::queue_status))
        .route("/v1/orders/:id", get(orders::get_order))
        .route("/v1/orders/:id/cancel", post(orders::cancel_order))
        .route("/v1/orders/:id/twap-progress", get(orders::twap_progress))
        .route("/v1/orders/:id/iceberg-progress", get(orders::iceberg_progress))
        .route("/v1/positions", get(positions::list_positions))
        .route("/v1/positions/sync/:venue", post(positions::sync_positions))
        .route("/v1/positions/:strategy/:venue/:symbol", get(positions::get_position))
        .route("/v1/risk/validate-order", post(risk::validate_order))
        .route("/v1/risk/emergency-stop", post(risk::emergency_stop))
        .route("/v1/alerts/:user_id", get(alerts::list_alerts))
        .route("/v1/alerts/:user_id/:alert_id/acknowledge", post(alerts::acknowledge_alert))
        .route("/v1/alerts/:user_id/cleanup", delete(alerts::cleanup_alerts))
        .route("/health", get(health::health_check))
        .with_state(state)
}
