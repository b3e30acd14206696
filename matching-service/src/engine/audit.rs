//! Audit trail logging.
//!
//! Entries are only ever appended, and only through the unit of work that
//! performs the state change they describe. There is no update or delete.

use super::error::MatchError;
use crate::models::{AuditAction, AuditTrailEntry, BankTransaction, NewAuditEntry};
use crate::store::UnitOfWork;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

/// Snapshot of the match-related fields of a bank transaction.
fn match_state(transaction: &BankTransaction) -> Value {
    json!({
        "status": transaction.status,
        "order_id": transaction.order_id,
        "payment_id": transaction.payment_id,
        "confidence_score": transaction.confidence_score,
        "matched_by": transaction.matched_by,
        "matched_at": transaction.matched_at,
    })
}

/// Entry describing the move from `before` to `after`.
///
/// Order and payment ids are taken from the two states; `extra` is merged
/// into the details next to the pre/post snapshots.
pub fn transition(
    action: AuditAction,
    before: &BankTransaction,
    after: &BankTransaction,
    performed_by: &str,
    reason: Option<String>,
    performed_at: DateTime<Utc>,
    extra: Value,
) -> NewAuditEntry {
    let mut details = json!({
        "before": match_state(before),
        "after": match_state(after),
    });
    if let (Some(details), Value::Object(extra)) = (details.as_object_mut(), extra) {
        details.extend(extra);
    }

    NewAuditEntry {
        transaction_id: after.id,
        action,
        old_order_id: before.order_id,
        new_order_id: after.order_id,
        old_payment_id: before.payment_id,
        new_payment_id: after.payment_id,
        reason,
        performed_by: performed_by.to_string(),
        performed_at,
        details,
    }
}

/// Append `entry` inside the caller's unit of work.
pub async fn record(
    uow: &mut dyn UnitOfWork,
    entry: &NewAuditEntry,
) -> Result<AuditTrailEntry, MatchError> {
    if entry.performed_by.trim().is_empty() {
        return Err(MatchError::validation("audit entries need an actor"));
    }
    let stored = uow.append_audit(entry).await?;
    tracing::debug!(
        transaction_id = stored.transaction_id,
        action = %stored.action,
        audit_id = stored.id,
        "Audit entry recorded"
    );
    Ok(stored)
}
