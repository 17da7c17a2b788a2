//! Iceberg executor (spec §4.6): conceals a large order behind repeated
//! small "visible" limit child orders, aborting rather than continuing past
//! a frustrated child. Grounded on the same lazy-slice-generation shape as
//! `execution::twap`, generalized from the original's
//! `IcebergOrderExecutor.active_iceberg_orders` map (per §1 supplement).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::order::{OrderSide, OrderStatus, TimeInForce};
use crate::services::order_service::OrderService;
use crate::venue::{SubmitOrderRequest, VenueAdapter, VenueOrderState};

const CHILD_POLL_INTERVAL: Duration = Duration::from_secs(5);
const CHILD_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, serde::Serialize)]
pub struct IcebergProgress {
    pub remaining_quantity: f64,
    pub filled_quantity: f64,
    pub active_child_venue_order_id: Option<String>,
}

pub struct IcebergPlan {
    pub order_id: Uuid,
    pub venue: String,
    pub symbol: String,
    pub side: OrderSide,
    pub slice_quantity: f64,
    pub price: Option<f64>,
    cancel_requested: AtomicBool,
    state: Mutex<IcebergProgress>,
}

impl IcebergPlan {
    fn new(order_id: Uuid, venue: String, symbol: String, side: OrderSide, total_quantity: f64, visible_ratio: f64, price: Option<f64>) -> Arc<Self> {
        let slice_quantity = total_quantity * visible_ratio;
        Arc::new(Self {
            order_id,
            venue,
            symbol,
            side,
            slice_quantity,
            price,
            cancel_requested: AtomicBool::new(false),
            state: Mutex::new(IcebergProgress {
                remaining_quantity: total_quantity,
                filled_quantity: 0.0,
                active_child_venue_order_id: None,
            }),
        })
    }

    pub fn progress(&self) -> IcebergProgress {
        self.state.lock().clone()
    }

    pub async fn cancel(&self, venue: &Arc<dyn VenueAdapter>) {
        self.cancel_requested.store(true, Ordering::SeqCst);
        let active = self.state.lock().active_child_venue_order_id.clone();
        if let Some(venue_order_id) = active {
            let _ = venue.cancel_order(&self.symbol, &venue_order_id).await;
        }
        self.state.lock().remaining_quantity = 0.0;
    }

    fn is_canceled(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }
}

impl OrderService {
    pub async fn start_iceberg(self: &Arc<Self>, order_id: Uuid, visible_ratio: f64, price: Option<f64>) -> AppResult<()> {
        let order = self.get(order_id).expect("dispatch only calls start_iceberg on an existing order");
        let venue = self
            .venue_for(&order.venue)
            .ok_or_else(|| AppError::Validation(format!("unknown venue {}", order.venue)))?;

        let instruments = venue.load_instruments().await?;
        let min_quantity = instruments
            .iter()
            .find(|m| m.symbol == order.symbol)
            .map(|m| m.min_quantity)
            .unwrap_or(0.0);
        let slice_quantity = order.requested_quantity * visible_ratio;
        if slice_quantity < min_quantity {
            let msg = format!("visible slice {slice_quantity} below venue minimum {min_quantity}");
            self.update(order_id, |o| {
                o.error_message = Some(msg.clone());
                o.transition(OrderStatus::Rejected);
            });
            return Err(AppError::Validation(msg));
        }

        let plan = IcebergPlan::new(order_id, order.venue.clone(), order.symbol.clone(), order.side, order.requested_quantity, visible_ratio, price);
        self.iceberg_plans.write().insert(order_id, plan.clone());
        self.update(order_id, |o| o.transition(OrderStatus::Submitted));

        let this = self.clone();
        tokio::spawn(async move {
            this.run_iceberg_slices(order_id, plan, venue).await;
        });
        Ok(())
    }

    async fn run_iceberg_slices(self: Arc<Self>, order_id: Uuid, plan: Arc<IcebergPlan>, venue: Arc<dyn VenueAdapter>) {
        loop {
            if plan.is_canceled() || plan.state.lock().remaining_quantity <= 0.0 {
                break;
            }

            let remaining = plan.state.lock().remaining_quantity;
            let quantity = plan.slice_quantity.min(remaining);

            let limit_price = match plan.price {
                Some(p) => p,
                None => match venue.get_order_book(&plan.symbol, 1).await {
                    Ok(book) => match plan.side {
                        OrderSide::Buy => book.best_bid().unwrap_or(0.0),
                        OrderSide::Sell => book.best_ask().unwrap_or(0.0),
                    },
                    Err(e) => {
                        tracing::warn!(order_id = %order_id, error = %e, "iceberg could not read book for slice price, aborting plan");
                        break;
                    }
                },
            };

            let client_order_id = format!("{}-iceberg-{}", order_id, remaining);
            let ack = match venue
                .submit_limit_order(SubmitOrderRequest {
                    symbol: plan.symbol.clone(),
                    side: plan.side,
                    quantity,
                    price: Some(limit_price),
                    time_in_force: TimeInForce::Gtc,
                    client_order_id,
                })
                .await
            {
                Ok(ack) => ack,
                Err(e) => {
                    tracing::warn!(order_id = %order_id, error = %e, "iceberg child submit failed, aborting plan");
                    break;
                }
            };
            plan.state.lock().active_child_venue_order_id = Some(ack.venue_order_id.clone());

            let mut last_ack = ack.clone();
            let deadline = tokio::time::Instant::now() + CHILD_TIMEOUT;
            loop {
                if matches!(last_ack.state, VenueOrderState::Filled | VenueOrderState::Canceled | VenueOrderState::Rejected) {
                    break;
                }
                if plan.is_canceled() || tokio::time::Instant::now() >= deadline {
                    let _ = venue.cancel_order(&plan.symbol, &ack.venue_order_id).await;
                    break;
                }
                tokio::time::sleep(CHILD_POLL_INTERVAL).await;
                match venue.fetch_order(&plan.symbol, &ack.venue_order_id).await {
                    Ok(refreshed) => last_ack = refreshed,
                    Err(e) => tracing::warn!(order_id = %order_id, error = %e, "iceberg child poll failed"),
                }
            }
            plan.state.lock().active_child_venue_order_id = None;

            let filled = last_ack.filled_quantity;
            if filled > 0.0 {
                self.record_fill(order_id, last_ack.average_price.unwrap_or(limit_price), filled, 0.0);
                let mut state = plan.state.lock();
                state.remaining_quantity -= filled;
                state.filled_quantity += filled;
            }

            if filled < quantity * 0.99 {
                tracing::warn!(order_id = %order_id, filled, quantity, "iceberg child under-filled, aborting plan");
                break;
            }
        }

        let final_status = if plan.is_canceled() {
            OrderStatus::Canceled
        } else if plan.state.lock().remaining_quantity <= 0.0 {
            OrderStatus::Filled
        } else {
            let filled = plan.state.lock().filled_quantity;
            if filled > 0.0 {
                OrderStatus::Partial
            } else {
                OrderStatus::Failed
            }
        };
        self.update(order_id, |o| o.transition(final_status));
    }
}
