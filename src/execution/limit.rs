//! Limit executor (spec §4.5): price sanity warnings, IOC/FOK one-shot
//! refetch, GTC background poll. Grounded on the same submit/fetch call
//! shape as `execution::market`.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::order::{OrderStatus, TimeInForce};
use crate::services::order_service::OrderService;
use crate::venue::{SubmitOrderRequest, VenueOrderState};

const GTC_POLL_INTERVAL: Duration = Duration::from_secs(5);
const GTC_DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

fn venue_state_to_status(state: VenueOrderState) -> OrderStatus {
    match state {
        VenueOrderState::Filled => OrderStatus::Filled,
        VenueOrderState::PartiallyFilled => OrderStatus::Partial,
        VenueOrderState::Canceled => OrderStatus::Canceled,
        VenueOrderState::Rejected => OrderStatus::Rejected,
        VenueOrderState::Open => OrderStatus::Submitted,
    }
}

impl OrderService {
    pub async fn execute_limit(self: &Arc<Self>, order_id: Uuid) -> AppResult<()> {
        let order = self
            .get(order_id)
            .ok_or_else(|| AppError::Validation(format!("unknown order {order_id}")))?;
        let price = match order.kind {
            crate::models::order::OrderKind::Limit { price } => price,
            _ => return Err(AppError::Validation("execute_limit called on non-limit order".to_string())),
        };
        let venue = self
            .venue_for(&order.venue)
            .ok_or_else(|| AppError::Validation(format!("unknown venue {}", order.venue)))?;

        if let Ok(ticker) = venue.get_ticker(&order.symbol).await {
            let deviation = (price - ticker.last).abs() / ticker.last;
            if deviation > 0.20 {
                tracing::warn!(order_id = %order_id, deviation_pct = deviation * 100.0, "limit price far from market");
            }
            let adverse = match order.side {
                crate::models::order::OrderSide::Buy => price > ticker.last,
                crate::models::order::OrderSide::Sell => price < ticker.last,
            };
            if adverse && deviation > 0.05 {
                tracing::warn!(order_id = %order_id, "limit price adversely crosses market by more than 5%");
            }
        }

        self.update(order_id, |o| o.transition(OrderStatus::Submitted));

        let ack = match venue
            .submit_limit_order(SubmitOrderRequest {
                symbol: order.symbol.clone(),
                side: order.side,
                quantity: order.requested_quantity,
                price: Some(price),
                time_in_force: order.time_in_force,
                client_order_id: order.client_order_id.clone().unwrap_or_else(|| order.id.to_string()),
            })
            .await
        {
            Ok(ack) => ack,
            Err(e) => {
                self.update(order_id, |o| {
                    o.error_message = Some(e.to_string());
                    o.transition(OrderStatus::Failed);
                });
                return Ok(());
            }
        };
        self.update(order_id, |o| o.venue_order_id = Some(ack.venue_order_id.clone()));

        if ack.filled_quantity > 0.0 {
            self.record_fill(order_id, ack.average_price.unwrap_or(price), ack.filled_quantity, 0.0);
        }

        match order.time_in_force {
            TimeInForce::Ioc | TimeInForce::Fok => {
                tokio::time::sleep(Duration::from_secs(1)).await;
                if let Ok(refetched) = venue.fetch_order(&order.symbol, &ack.venue_order_id).await {
                    self.update(order_id, |o| o.transition(venue_state_to_status(refetched.state)));
                } else {
                    self.update(order_id, |o| o.transition(venue_state_to_status(ack.state)));
                }
            }
            TimeInForce::Gtc | TimeInForce::Gtd => {
                self.update(order_id, |o| o.transition(venue_state_to_status(ack.state)));
                if !matches!(ack.state, VenueOrderState::Filled | VenueOrderState::Rejected | VenueOrderState::Canceled) {
                    self.spawn_gtc_poller(order_id, venue, ack.venue_order_id, GTC_DEFAULT_TIMEOUT);
                }
            }
        }
        Ok(())
    }

    fn spawn_gtc_poller(
        self: &Arc<Self>,
        order_id: Uuid,
        venue: Arc<dyn crate::venue::VenueAdapter>,
        venue_order_id: String,
        timeout: Duration,
    ) {
        let this = self.clone();
        tokio::spawn(async move {
            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                tokio::time::sleep(GTC_POLL_INTERVAL).await;
                let Some(order) = this.get(order_id) else { return };
                if order.status.is_terminal() {
                    return;
                }
                match venue.fetch_order(&order.symbol, &venue_order_id).await {
                    Ok(ack) => {
                        if ack.filled_quantity > order.filled_quantity {
                            let delta = ack.filled_quantity - order.filled_quantity;
                            this.record_fill(order_id, ack.average_price.unwrap_or(0.0), delta, 0.0);
                        }
                        this.update(order_id, |o| o.transition(venue_state_to_status(ack.state)));
                        if matches!(ack.state, VenueOrderState::Filled | VenueOrderState::Canceled | VenueOrderState::Rejected) {
                            return;
                        }
                    }
                    Err(e) => tracing::warn!(order_id = %order_id, error = %e, "gtc poll failed"),
                }
                if tokio::time::Instant::now() >= deadline {
                    tracing::info!(order_id = %order_id, "gtc poll timed out, leaving resting order as-is");
                    return;
                }
            }
        });
    }
}
