//! Error taxonomy for the matching engine.
//!
//! Low confidence and empty candidate sets are not errors; they come back as
//! `Ok` outcomes with status `unmatched`.

use crate::models::{TransactionStatus, UnknownVariant};
use service_core::error::AppError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input, rejected before any state is touched.
    Validation,
    /// Business rule not met for the current state; nothing changed.
    Precondition,
    /// A concurrent writer won the race for the same bank transaction.
    Conflict,
    /// Store unavailable or too slow; safe to retry.
    Transient,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Precondition => "precondition",
            Self::Conflict => "conflict",
            Self::Transient => "transient",
        }
    }
}

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("bank transaction {0} not found")]
    TransactionNotFound(i64),

    #[error("order {0} not found")]
    OrderNotFound(i64),

    #[error("bank transaction {id} is already matched")]
    AlreadyMatched { id: i64 },

    #[error("bank transaction {id} is {status}, expected one of {allowed}")]
    InvalidStatus {
        id: i64,
        status: TransactionStatus,
        allowed: String,
    },

    #[error("bank transaction {id} is matched to order {actual:?}, not order {expected}")]
    OrderMismatch {
        id: i64,
        expected: i64,
        actual: Option<i64>,
    },

    #[error("conflict on bank transaction {id}: {message}")]
    Conflict { id: i64, message: String },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("store unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),

    #[error("corrupt stored data: {0}")]
    CorruptData(String),
}

impl MatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::TransactionNotFound(_)
            | Self::OrderNotFound(_)
            | Self::AlreadyMatched { .. }
            | Self::InvalidStatus { .. }
            | Self::OrderMismatch { .. } => ErrorKind::Precondition,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Timeout { .. } | Self::Unavailable(_) | Self::CorruptData(_) => {
                ErrorKind::Transient
            }
        }
    }

    /// Conflicts and store faults can succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::CorruptData(_) => false,
            other => matches!(other.kind(), ErrorKind::Conflict | ErrorKind::Transient),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn invalid_status(
        id: i64,
        status: TransactionStatus,
        allowed: &[TransactionStatus],
    ) -> Self {
        if status == TransactionStatus::Matched {
            return Self::AlreadyMatched { id };
        }
        let allowed = allowed
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        Self::InvalidStatus {
            id,
            status,
            allowed,
        }
    }

    pub(crate) fn store(err: impl Into<anyhow::Error>) -> Self {
        Self::Unavailable(err.into())
    }
}

impl From<UnknownVariant> for MatchError {
    fn from(err: UnknownVariant) -> Self {
        Self::CorruptData(err.to_string())
    }
}

impl From<MatchError> for AppError {
    fn from(err: MatchError) -> Self {
        match &err {
            MatchError::Validation(_) => AppError::BadRequest(anyhow::Error::new(err)),
            MatchError::TransactionNotFound(_) | MatchError::OrderNotFound(_) => {
                AppError::NotFound(anyhow::Error::new(err))
            }
            MatchError::AlreadyMatched { .. }
            | MatchError::InvalidStatus { .. }
            | MatchError::OrderMismatch { .. } => {
                AppError::PreconditionFailed(anyhow::Error::new(err))
            }
            MatchError::Conflict { .. } => AppError::Conflict(anyhow::Error::new(err)),
            MatchError::Timeout { .. } | MatchError::Unavailable(_) => {
                AppError::ServiceUnavailable(anyhow::Error::new(err), Some(1))
            }
            MatchError::CorruptData(_) => AppError::DatabaseError(anyhow::Error::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matched_status_reports_already_matched() {
        let err = MatchError::invalid_status(
            4,
            TransactionStatus::Matched,
            &TransactionStatus::AUTO_ELIGIBLE,
        );
        assert!(matches!(err, MatchError::AlreadyMatched { id: 4 }));
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert!(!err.is_retryable());
    }

    #[test]
    fn other_status_lists_allowed_states() {
        let err = MatchError::invalid_status(
            4,
            TransactionStatus::Voided,
            &TransactionStatus::AUTO_ELIGIBLE,
        );
        assert_eq!(
            err.to_string(),
            "bank transaction 4 is voided, expected one of unmatched, review"
        );
    }

    #[test]
    fn conflicts_and_timeouts_are_retryable() {
        let conflict = MatchError::Conflict {
            id: 1,
            message: "status changed".to_string(),
        };
        let timeout = MatchError::Timeout {
            operation: "find_candidates",
            timeout: Duration::from_millis(10),
        };
        assert!(conflict.is_retryable());
        assert!(timeout.is_retryable());
        assert!(!MatchError::validation("missing reason").is_retryable());
        assert!(!MatchError::CorruptData("bad status".to_string()).is_retryable());
    }

    #[test]
    fn maps_onto_http_errors() {
        assert!(matches!(
            AppError::from(MatchError::OrderNotFound(9)),
            AppError::NotFound(_)
        ));
        assert!(matches!(
            AppError::from(MatchError::AlreadyMatched { id: 1 }),
            AppError::PreconditionFailed(_)
        ));
        assert!(matches!(
            AppError::from(MatchError::store(anyhow::anyhow!("pool closed"))),
            AppError::ServiceUnavailable(_, Some(1))
        ));
    }
}
