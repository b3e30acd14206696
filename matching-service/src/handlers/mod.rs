//! HTTP handlers for matching-service.

pub mod batches;
pub mod health;
pub mod transactions;

pub use health::{health_check, readiness_check};

use axum::http::HeaderMap;
use service_core::error::AppError;

/// Header carrying the operator identity recorded in the audit trail.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Operator identity for write requests. Required; never defaulted.
pub(crate) fn operator(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!("{} header is required", USER_ID_HEADER))
        })
}
