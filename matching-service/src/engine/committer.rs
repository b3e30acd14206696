//! Transactional committer.
//!
//! Every status change on a bank transaction goes through here. Each
//! operation locks the bank transaction row, re-checks its status, writes,
//! and appends the audit entry in one unit of work.

use super::atomic::atomically;
use super::audit;
use super::error::MatchError;
use crate::models::{
    AuditAction, BankTransaction, MatchedBy, NewPayment, Payment, TransactionStatus,
};
use crate::store::{ReconciliationStore, UnitOfWork};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

/// State after a committed match.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedMatch {
    pub transaction: BankTransaction,
    pub payment: Payment,
}

/// Lock `id` and check it is still in the state the caller decided on.
///
/// A caller that already saw `matched` gets a precondition error. A status
/// that moved between the caller's read and the lock is a lost race.
async fn lock_expecting(
    uow: &mut dyn UnitOfWork,
    snapshot: &BankTransaction,
) -> Result<BankTransaction, MatchError> {
    let locked = uow
        .lock_transaction(snapshot.id)
        .await?
        .ok_or(MatchError::TransactionNotFound(snapshot.id))?;
    if locked.status != snapshot.status {
        return Err(MatchError::Conflict {
            id: snapshot.id,
            message: format!(
                "status changed from {} to {} before the write",
                snapshot.status, locked.status
            ),
        });
    }
    Ok(locked)
}

/// Lock `id` and check its status is one of `allowed`.
async fn lock_in(
    uow: &mut dyn UnitOfWork,
    id: i64,
    allowed: &[TransactionStatus],
) -> Result<BankTransaction, MatchError> {
    let locked = uow
        .lock_transaction(id)
        .await?
        .ok_or(MatchError::TransactionNotFound(id))?;
    if !allowed.contains(&locked.status) {
        return Err(MatchError::invalid_status(id, locked.status, allowed));
    }
    Ok(locked)
}

pub(crate) fn require_actor(actor: &str) -> Result<String, MatchError> {
    let actor = actor.trim();
    if actor.is_empty() {
        return Err(MatchError::validation("actor must not be empty"));
    }
    Ok(actor.to_string())
}

pub(crate) fn require_reason(reason: &str) -> Result<String, MatchError> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(MatchError::validation("reason must not be empty"));
    }
    Ok(reason.to_string())
}

#[derive(Clone)]
pub struct TransactionalCommitter {
    store: Arc<dyn ReconciliationStore>,
    timeout: Duration,
}

impl TransactionalCommitter {
    pub fn new(store: Arc<dyn ReconciliationStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Create a payment for `order_id` and mark the transaction matched.
    ///
    /// `AUTO` and `SYSTEM` matches may start from `unmatched` or `review`;
    /// operator matches (`USER`, `MANUAL`) may also start from `voided` or
    /// `duplicate`.
    #[instrument(skip(self, snapshot, actor), fields(transaction_id = snapshot.id))]
    pub async fn commit_match(
        &self,
        snapshot: &BankTransaction,
        order_id: i64,
        score: u32,
        matched_by: MatchedBy,
        actor: &str,
    ) -> Result<CommittedMatch, MatchError> {
        let allowed: &'static [TransactionStatus] = match matched_by {
            MatchedBy::Auto | MatchedBy::System => &TransactionStatus::AUTO_ELIGIBLE,
            MatchedBy::User | MatchedBy::Manual => &TransactionStatus::OPERATOR_ELIGIBLE,
        };
        if !allowed.contains(&snapshot.status) {
            return Err(MatchError::invalid_status(
                snapshot.id,
                snapshot.status,
                allowed,
            ));
        }
        let actor = require_actor(actor)?;
        let action = match matched_by {
            MatchedBy::Auto => AuditAction::AutoMatch,
            _ => AuditAction::ManualMatch,
        };
        let snapshot = snapshot.clone();

        let committed = atomically(self.store.as_ref(), "commit_match", self.timeout, move |uow| {
            Box::pin(async move {
                let locked = lock_expecting(uow, &snapshot).await?;
                uow.get_order(order_id)
                    .await?
                    .ok_or(MatchError::OrderNotFound(order_id))?;

                let payment = uow
                    .insert_payment(&NewPayment::for_transaction(&locked, order_id, &actor, None))
                    .await?;

                let now = Utc::now();
                let next = BankTransaction {
                    status: TransactionStatus::Matched,
                    order_id: Some(order_id),
                    payment_id: Some(payment.id),
                    confidence_score: Some(score as i32),
                    matched_by: Some(matched_by),
                    matched_at: Some(now),
                    ..locked.clone()
                };
                uow.update_transaction(&next, locked.status).await?;

                let entry = audit::transition(
                    action,
                    &locked,
                    &next,
                    &actor,
                    None,
                    now,
                    json!({ "score": score }),
                );
                audit::record(uow, &entry).await?;

                Ok(CommittedMatch {
                    transaction: next,
                    payment,
                })
            })
        })
        .await?;

        info!(payment_id = committed.payment.id, "Match committed");
        Ok(committed)
    }

    /// Put the transaction in the review queue with the given best score.
    ///
    /// A transaction already in review with the same score and provenance is
    /// left untouched.
    #[instrument(skip(self, snapshot, actor), fields(transaction_id = snapshot.id))]
    pub async fn set_review(
        &self,
        snapshot: &BankTransaction,
        score: u32,
        matched_by: MatchedBy,
        actor: &str,
    ) -> Result<BankTransaction, MatchError> {
        if !TransactionStatus::AUTO_ELIGIBLE.contains(&snapshot.status) {
            return Err(MatchError::invalid_status(
                snapshot.id,
                snapshot.status,
                &TransactionStatus::AUTO_ELIGIBLE,
            ));
        }
        if !matches!(matched_by, MatchedBy::System | MatchedBy::Manual) {
            return Err(MatchError::validation(format!(
                "review routing cannot be attributed to {}",
                matched_by
            )));
        }
        let actor = require_actor(actor)?;
        let snapshot = snapshot.clone();

        atomically(self.store.as_ref(), "set_review", self.timeout, move |uow| {
            Box::pin(async move {
                let locked = lock_expecting(uow, &snapshot).await?;
                let next = BankTransaction {
                    confidence_score: Some(score as i32),
                    matched_by: Some(matched_by),
                    ..locked.cleared(TransactionStatus::Review)
                };
                if next == locked {
                    return Ok(locked);
                }
                uow.update_transaction(&next, locked.status).await?;

                let entry = audit::transition(
                    AuditAction::Review,
                    &locked,
                    &next,
                    &actor,
                    None,
                    Utc::now(),
                    json!({ "score": score }),
                );
                audit::record(uow, &entry).await?;
                Ok(next)
            })
        })
        .await
    }

    /// Move a transaction out of review back to `unmatched`.
    #[instrument(skip(self, snapshot), fields(transaction_id = snapshot.id))]
    pub async fn clear_review(
        &self,
        snapshot: &BankTransaction,
        actor: &str,
    ) -> Result<BankTransaction, MatchError> {
        if snapshot.status != TransactionStatus::Review {
            return Err(MatchError::invalid_status(
                snapshot.id,
                snapshot.status,
                &[TransactionStatus::Review],
            ));
        }
        let actor = require_actor(actor)?;
        let snapshot = snapshot.clone();

        atomically(self.store.as_ref(), "clear_review", self.timeout, move |uow| {
            Box::pin(async move {
                let locked = lock_expecting(uow, &snapshot).await?;
                let next = locked.cleared(TransactionStatus::Unmatched);
                uow.update_transaction(&next, locked.status).await?;

                let entry = audit::transition(
                    AuditAction::Unmatch,
                    &locked,
                    &next,
                    &actor,
                    Some("best candidate fell below the review threshold".to_string()),
                    Utc::now(),
                    json!({}),
                );
                audit::record(uow, &entry).await?;
                Ok(next)
            })
        })
        .await
    }

    /// Void the active payment of a matched transaction and move it to
    /// `voided`.
    #[instrument(skip(self, reason))]
    pub async fn void_match(
        &self,
        transaction_id: i64,
        reason: &str,
        actor: &str,
    ) -> Result<BankTransaction, MatchError> {
        let reason = require_reason(reason)?;
        let actor = require_actor(actor)?;

        let voided = atomically(self.store.as_ref(), "void_match", self.timeout, move |uow| {
            Box::pin(async move {
                let locked = lock_in(uow, transaction_id, &[TransactionStatus::Matched]).await?;
                let payment_id = locked.payment_id.ok_or_else(|| {
                    MatchError::CorruptData(format!(
                        "matched transaction {} has no payment",
                        transaction_id
                    ))
                })?;

                let now = Utc::now();
                uow.void_payment(payment_id, &reason, now).await?;

                let next = locked.cleared(TransactionStatus::Voided);
                uow.update_transaction(&next, locked.status).await?;

                let entry = audit::transition(
                    AuditAction::Void,
                    &locked,
                    &next,
                    &actor,
                    Some(reason),
                    now,
                    json!({ "voided_payment_id": payment_id }),
                );
                audit::record(uow, &entry).await?;
                Ok(next)
            })
        })
        .await?;

        info!("Match voided");
        Ok(voided)
    }

    /// Flag an unmatched or review transaction as a duplicate bank line.
    #[instrument(skip(self, reason))]
    pub async fn mark_duplicate(
        &self,
        transaction_id: i64,
        reason: &str,
        actor: &str,
    ) -> Result<BankTransaction, MatchError> {
        let reason = require_reason(reason)?;
        let actor = require_actor(actor)?;

        atomically(self.store.as_ref(), "mark_duplicate", self.timeout, move |uow| {
            Box::pin(async move {
                let locked =
                    lock_in(uow, transaction_id, &TransactionStatus::AUTO_ELIGIBLE).await?;
                let next = locked.cleared(TransactionStatus::Duplicate);
                uow.update_transaction(&next, locked.status).await?;

                let entry = audit::transition(
                    AuditAction::Duplicate,
                    &locked,
                    &next,
                    &actor,
                    Some(reason),
                    Utc::now(),
                    json!({}),
                );
                audit::record(uow, &entry).await?;
                Ok(next)
            })
        })
        .await
    }
}
