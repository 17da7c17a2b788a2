//! Order type executors (spec §4.4–§4.6). Each file adds an `impl
//! OrderService` block rather than introducing a separate executor trait —
//! the executors need direct access to the order map and venue table that
//! `OrderService` already owns, and teacher's own `vault/execution.rs` keeps
//! its execution methods as plain inherent methods on `ExecutionEngine` too.

pub mod iceberg;
pub mod limit;
pub mod market;
pub mod twap;

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::error::AppResult;
use crate::models::order::{OrderKind, OrderStatus};
use crate::services::order_service::OrderService;
use crate::venue::SubmitOrderRequest;

impl OrderService {
    /// Dequeue/dispatch loop; one task is spawned per configured worker
    /// (spec §4.2/§5). Runs until the process shuts down.
    pub async fn run_worker(self: Arc<Self>, worker_id: usize) {
        loop {
            match self.queue.dequeue() {
                Ok(Some((envelope, order_id))) => match self.dispatch(order_id).await {
                    Ok(()) => self.queue.complete_success(&envelope),
                    Err(e) if e.is_retryable() => {
                        tracing::warn!(worker_id, order_id = %order_id, error = %e, "order execution failed transiently, retrying");
                        self.queue.complete_failure(envelope).await;
                    }
                    Err(e) => {
                        tracing::error!(worker_id, order_id = %order_id, error = %e, "order execution failed permanently");
                        let msg = e.to_string();
                        self.update(order_id, |o| {
                            o.error_message = Some(msg.clone());
                            o.transition(OrderStatus::Failed);
                        });
                        self.queue.complete_success(&envelope);
                    }
                },
                Ok(None) => tokio::time::sleep(Duration::from_millis(50)).await,
                Err(e) => {
                    tracing::error!(worker_id, error = %e, "queue dequeue error");
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
            }
        }
    }

    async fn dispatch(self: &Arc<Self>, order_id: Uuid) -> AppResult<()> {
        let Some(order) = self.get(order_id) else { return Ok(()) };
        if order.status.is_terminal() {
            return Ok(());
        }
        match order.kind {
            OrderKind::Market => self.execute_market(order_id).await,
            OrderKind::Limit { .. } => self.execute_limit(order_id).await,
            OrderKind::Twap { slices, interval_secs } => self.start_twap(order_id, slices, interval_secs).await,
            OrderKind::Iceberg { visible_ratio, price } => self.start_iceberg(order_id, visible_ratio, price).await,
            OrderKind::StopLoss { stop_price } | OrderKind::TakeProfit { stop_price } => {
                self.start_conditional_watch(order_id, stop_price).await
            }
        }
    }

    /// Stop-loss/take-profit are reserved variants (spec §9): the wire format
    /// and order-kind already exist, but only a minimal trigger watcher backs
    /// them rather than a full executor. Polls the venue ticker and fires a
    /// market child once the trigger is crossed.
    async fn start_conditional_watch(self: &Arc<Self>, order_id: Uuid, trigger_price: f64) -> AppResult<()> {
        let order = self.get(order_id).expect("dispatch only calls start_conditional_watch on an existing order");
        let venue = self
            .venue_for(&order.venue)
            .ok_or_else(|| crate::error::AppError::Validation(format!("unknown venue {}", order.venue)))?;
        self.update(order_id, |o| o.transition(OrderStatus::Submitted));

        let this = self.clone();
        tokio::spawn(async move {
            loop {
                let Some(current) = this.get(order_id) else { return };
                if current.status.is_terminal() {
                    return;
                }
                if let Ok(ticker) = venue.get_ticker(&order.symbol).await {
                    let triggered = match order.side {
                        crate::models::order::OrderSide::Buy => ticker.last >= trigger_price,
                        crate::models::order::OrderSide::Sell => ticker.last <= trigger_price,
                    };
                    if triggered {
                        match venue
                            .submit_market_order(SubmitOrderRequest {
                                symbol: order.symbol.clone(),
                                side: order.side,
                                quantity: order.requested_quantity,
                                price: None,
                                time_in_force: crate::models::order::TimeInForce::Ioc,
                                client_order_id: order.client_order_id.clone().unwrap_or_else(|| order.id.to_string()),
                            })
                            .await
                        {
                            Ok(ack) => {
                                if ack.filled_quantity > 0.0 {
                                    this.record_fill(order_id, ack.average_price.unwrap_or(trigger_price), ack.filled_quantity, 0.0);
                                }
                                this.update(order_id, |o| o.transition(OrderStatus::Filled));
                            }
                            Err(e) => {
                                let msg = e.to_string();
                                this.update(order_id, |o| {
                                    o.error_message = Some(msg.clone());
                                    o.transition(OrderStatus::Failed);
                                });
                            }
                        }
                        return;
                    }
                }
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        });
        Ok(())
    }
}
