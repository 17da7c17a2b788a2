//! Risk alerts (spec §3, §4.9).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    PositionLimit,
    DailyLoss,
    Drawdown,
    ConsecutiveLoss,
    EmergencyStop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub user_id: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub acknowledged: bool,
}

impl Alert {
    pub fn new(user_id: String, alert_type: AlertType, severity: Severity, message: String, details: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            alert_type,
            severity,
            message,
            details,
            created_at: Utc::now(),
            acknowledged: false,
        }
    }

    /// Acknowledged is monotone: false -> true, never the reverse.
    pub fn acknowledge(&mut self) {
        self.acknowledged = true;
    }
}
