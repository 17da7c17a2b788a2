//! Domain error taxonomy (spec §7): four kinds, each a typed variant instead of
//! a generic string. Internal/ambient plumbing still uses `anyhow::Result`;
//! this enum is reserved for errors that cross an executor/service boundary
//! and need to drive an HTTP status or a retry decision.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum AppError {
    /// Input violates an intrinsic invariant. Never retried. 400/422.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Syntactically valid, definitely refused (venue rejection, risk cap,
    /// emergency-stop armed). Never retried.
    #[error("rejected: {0}")]
    Rejection(String),

    /// Network/5xx/rate-limit/timeout. Retried at the adapter and queue layers.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Submit request sent, no response received. Requires reconciliation
    /// (lookup by client-id) before any retry.
    #[error("indeterminate: {0}")]
    Indeterminate(String),
}

impl AppError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Transient(_) | AppError::Indeterminate(_))
    }

    /// Venue rejection messages are surfaced verbatim but capped, per spec §7.
    pub fn rejection(message: impl Into<String>) -> Self {
        let mut msg = message.into();
        if msg.len() > 500 {
            msg.truncate(500);
        }
        AppError::Rejection(msg)
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Maps the taxonomy onto the HTTP surface of spec §6: 400 for validation,
/// 422 for a refused-but-valid request, 503 for transient/indeterminate
/// (retry elsewhere, not at this boundary).
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Rejection(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Transient(_) | AppError::Indeterminate(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
