//! Alert service (spec §4.9, §6). Grounded on
//! `original_source/trading-engine/risk-manager/src/api/endpoints/alerts.py`'s
//! REST shape (create / list-paginated / get / acknowledge / count / cleanup);
//! storage is the shared KV rather than Postgres, per spec §5's "alert list...
//! single writer = alert service per user."
//!
//! **Resolved ambiguity** (spec §9): the original has no deduplication.
//! This service suppresses a same-`(type, severity)` alert for a user within
//! a 5-minute window unless the `details` payload materially changed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::kv::{keys, KvStore};
use crate::models::alert::{Alert, AlertType, Severity};

pub struct AlertService {
    kv: Arc<dyn KvStore>,
    dedup_window: Duration,
}

impl AlertService {
    pub fn new(kv: Arc<dyn KvStore>, dedup_window: Duration) -> Self {
        Self { kv, dedup_window }
    }

    /// Creates and stores an alert unless an identical `(type, severity)`
    /// alert with the same `details` was emitted for this user within the
    /// dedup window, in which case `None` is returned.
    pub fn create(&self, user_id: &str, alert_type: AlertType, severity: Severity, message: String, details: serde_json::Value) -> Option<Alert> {
        let existing = self.list(user_id, None, usize::MAX, 0);
        let now = Utc::now();
        let suppressed = existing.iter().any(|a| {
            a.alert_type == alert_type
                && a.severity == severity
                && a.details == details
                && (now - a.created_at).to_std().map(|age| age < self.dedup_window).unwrap_or(false)
        });
        if suppressed {
            return None;
        }

        let alert = Alert::new(user_id.to_string(), alert_type, severity, message, details);
        self.persist(&alert);
        Some(alert)
    }

    fn persist(&self, alert: &Alert) {
        let _ = self.kv.set_json(&keys::alert_data(&alert.user_id, &alert.id.to_string()), alert, None);
        self.kv.list_push_back(&keys::alerts_list(&alert.user_id), alert.id.to_string());
    }

    pub fn list(&self, user_id: &str, acknowledged: Option<bool>, limit: usize, offset: usize) -> Vec<Alert> {
        let ids = self.all_ids(user_id);
        let mut alerts: Vec<Alert> = ids
            .iter()
            .filter_map(|id| self.kv.get_json::<Alert>(&keys::alert_data(user_id, id)).ok().flatten())
            .filter(|a| acknowledged.map(|want| want == a.acknowledged).unwrap_or(true))
            .collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let limit = if limit == 0 { alerts.len() } else { limit };
        alerts.into_iter().skip(offset).take(limit).collect()
    }

    fn all_ids(&self, user_id: &str) -> Vec<String> {
        self.kv.list_all(&keys::alerts_list(user_id))
    }

    pub fn get(&self, user_id: &str, alert_id: Uuid) -> Option<Alert> {
        self.kv.get_json(&keys::alert_data(user_id, &alert_id.to_string())).ok().flatten()
    }

    pub fn acknowledge(&self, user_id: &str, alert_id: Uuid) -> Option<Alert> {
        let mut alert = self.get(user_id, alert_id)?;
        alert.acknowledge();
        self.kv.set_json(&keys::alert_data(user_id, &alert_id.to_string()), &alert, None).ok()?;
        Some(alert)
    }

    pub fn count(&self, user_id: &str, acknowledged: Option<bool>) -> usize {
        self.list(user_id, acknowledged, 0, 0).len()
    }

    /// Drops alerts older than `days`; returns the number removed.
    pub fn cleanup(&self, user_id: &str, days: i64) -> usize {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let ids = self.all_ids(user_id);
        let mut removed = 0;
        for id in ids {
            if let Some(Some(alert)) = self.kv.get_json::<Alert>(&keys::alert_data(user_id, &id)).ok() {
                if alert.created_at < cutoff {
                    self.kv.delete(&keys::alert_data(user_id, &id));
                    removed += 1;
                }
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::InMemoryKv;
    use serde_json::json;

    fn service() -> AlertService {
        AlertService::new(Arc::new(InMemoryKv::new()), Duration::from_secs(300))
    }

    #[test]
    fn duplicate_alert_within_window_is_suppressed() {
        let svc = service();
        let first = svc.create("u1", AlertType::DailyLoss, Severity::Warning, "m".into(), json!({"pct": 0.8}));
        assert!(first.is_some());
        let second = svc.create("u1", AlertType::DailyLoss, Severity::Warning, "m".into(), json!({"pct": 0.8}));
        assert!(second.is_none());
    }

    #[test]
    fn changed_payload_is_not_suppressed() {
        let svc = service();
        svc.create("u1", AlertType::DailyLoss, Severity::Warning, "m".into(), json!({"pct": 0.8}));
        let second = svc.create("u1", AlertType::DailyLoss, Severity::Warning, "m".into(), json!({"pct": 0.9}));
        assert!(second.is_some());
    }

    #[test]
    fn acknowledge_is_monotone() {
        let svc = service();
        let alert = svc.create("u1", AlertType::Drawdown, Severity::Critical, "m".into(), json!({})).unwrap();
        let ack = svc.acknowledge("u1", alert.id).unwrap();
        assert!(ack.acknowledged);
    }
}
