//! Priority Order Queue (spec §4.2), grounded on
//! `original_source/trading-engine/order-executor/src/queue/order_queue.py`'s
//! `OrderQueue`, translated from its Redis sorted-set/list primitives onto the
//! shared in-process `KvStore` (see `kv::mod`).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::kv::{keys, KvStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEnvelope {
    pub item_id: String,
    pub priority: u8,
    pub attempt: u32,
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct QueuePayload {
    order_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub in_flight: usize,
    pub failed: usize,
    pub completed: usize,
    pub health: String,
}

pub struct PriorityOrderQueue {
    kv: Arc<dyn KvStore>,
    max_attempts: u32,
    retry_base: Duration,
    worker_count: usize,
}

impl PriorityOrderQueue {
    pub fn new(kv: Arc<dyn KvStore>, max_attempts: u32, retry_base: Duration, worker_count: usize) -> Self {
        Self {
            kv,
            max_attempts,
            retry_base,
            worker_count,
        }
    }

    /// Write the intent payload, push the envelope into the priority set or
    /// the FIFO, return the queue-item id.
    pub fn enqueue(&self, order_id: Uuid, priority: u8) -> anyhow::Result<String> {
        let item_id = format!("queue_{}_{}", Utc::now().timestamp_nanos_opt().unwrap_or_default(), order_id);
        let payload = QueuePayload { order_id };
        self.kv
            .set_json(&keys::orderq_data(&item_id), &payload, Some(Duration::from_secs(24 * 60 * 60)))?;

        let envelope = OrderEnvelope {
            item_id: item_id.clone(),
            priority,
            attempt: 0,
            max_attempts: self.max_attempts,
            enqueued_at: Utc::now(),
        };
        let serialized = serde_json::to_string(&envelope)?;

        if priority > 0 {
            self.kv.zadd(keys::ORDERQ_PRIORITY, serialized, priority as f64);
        } else {
            self.kv.list_push_back(keys::ORDERQ_PENDING, serialized);
        }

        Ok(item_id)
    }

    /// Prefer the highest-priority non-empty bucket, else the head of the
    /// FIFO. Moves the envelope into the in-flight set. A missing payload is
    /// a garbage envelope and yields `Ok(None)` rather than an error.
    pub fn dequeue(&self) -> anyhow::Result<Option<(OrderEnvelope, Uuid)>> {
        let serialized = match self.kv.zpopmax(keys::ORDERQ_PRIORITY) {
            Some((member, _)) => member,
            None => match self.kv.list_pop_front(keys::ORDERQ_PENDING) {
                Some(member) => member,
                None => return Ok(None),
            },
        };

        let envelope: OrderEnvelope = serde_json::from_str(&serialized)?;
        let payload: Option<QueuePayload> = self.kv.get_json(&keys::orderq_data(&envelope.item_id))?;
        let Some(payload) = payload else {
            tracing::warn!(item_id = %envelope.item_id, "dequeued envelope with no payload, dropping");
            return Ok(None);
        };

        self.kv.set_add(keys::ORDERQ_PROCESSING, envelope.item_id.clone());
        Ok(Some((envelope, payload.order_id)))
    }

    pub fn complete_success(&self, envelope: &OrderEnvelope) {
        self.kv.set_remove(keys::ORDERQ_PROCESSING, &envelope.item_id);
        if let Ok(serialized) = serde_json::to_string(envelope) {
            self.kv.list_push_back(keys::ORDERQ_COMPLETED, serialized);
            self.kv.list_trim_last(keys::ORDERQ_COMPLETED, 10_000);
        }
    }

    /// Either re-enqueues with `attempt+1` after `base * attempt` seconds, or
    /// moves the envelope to the failed list once max-attempts is reached.
    pub async fn complete_failure(&self, mut envelope: OrderEnvelope) {
        self.kv.set_remove(keys::ORDERQ_PROCESSING, &envelope.item_id);

        if envelope.attempt + 1 < envelope.max_attempts {
            envelope.attempt += 1;
            let delay = self.retry_base * envelope.attempt;
            tokio::time::sleep(delay).await;
            if let Ok(serialized) = serde_json::to_string(&envelope) {
                self.kv.list_push_back(keys::ORDERQ_PENDING, serialized);
            }
        } else if let Ok(serialized) = serde_json::to_string(&envelope) {
            self.kv.list_push_back(keys::ORDERQ_FAILED, serialized);
        }
    }

    pub fn status(&self) -> QueueStatus {
        let pending = self.kv.list_len(keys::ORDERQ_PENDING) + self.kv.zcard(keys::ORDERQ_PRIORITY);
        let in_flight = self.kv.set_card(keys::ORDERQ_PROCESSING);
        let failed = self.kv.list_len(keys::ORDERQ_FAILED);
        let completed = self.kv.list_len(keys::ORDERQ_COMPLETED);

        let health = if failed > 100 || in_flight > self.worker_count * 2 {
            "critical"
        } else if failed > 10 || in_flight > self.worker_count {
            "degraded"
        } else {
            "healthy"
        };

        QueueStatus {
            pending,
            in_flight,
            failed,
            completed,
            health: health.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::InMemoryKv;

    fn queue() -> PriorityOrderQueue {
        PriorityOrderQueue::new(Arc::new(InMemoryKv::new()), 3, Duration::from_millis(1), 4)
    }

    #[test]
    fn priority_dispatched_before_fifo() {
        let q = queue();
        let low_id = Uuid::new_v4();
        let high_id = Uuid::new_v4();
        q.enqueue(low_id, 0).unwrap();
        q.enqueue(high_id, 5).unwrap();

        let (_, first) = q.dequeue().unwrap().unwrap();
        assert_eq!(first, high_id);
        let (_, second) = q.dequeue().unwrap().unwrap();
        assert_eq!(second, low_id);
        assert!(q.dequeue().unwrap().is_none());
    }

    #[tokio::test]
    async fn enqueue_then_concurrent_dequeue_yields_each_envelope_once() {
        let q = Arc::new(queue());
        for _ in 0..8 {
            q.enqueue(Uuid::new_v4(), 0).unwrap();
        }
        let mut handles = Vec::new();
        for _ in 0..8 {
            let q = q.clone();
            handles.push(tokio::spawn(async move { q.dequeue().unwrap() }));
        }
        let mut seen = std::collections::HashSet::new();
        for h in handles {
            if let Some((_, order_id)) = h.await.unwrap() {
                assert!(seen.insert(order_id), "order dispatched twice");
            }
        }
        assert_eq!(seen.len(), 8);
        assert_eq!(q.status().pending, 0);
    }
}
