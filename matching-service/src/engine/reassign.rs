//! Payment reassignment: move a matched bank transaction to another order.

use super::atomic::atomically;
use super::audit;
use super::committer::{require_actor, require_reason};
use super::error::MatchError;
use crate::models::{AuditAction, BankTransaction, MatchedBy, NewPayment, TransactionStatus};
use crate::store::ReconciliationStore;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReassignRequest {
    pub transaction_id: i64,
    pub old_order_id: i64,
    pub new_order_id: i64,
    pub reason: String,
    pub actor: String,
}

impl ReassignRequest {
    /// Reject malformed requests before any state is read.
    pub fn validate(&self) -> Result<(), MatchError> {
        for (field, id) in [
            ("transaction_id", self.transaction_id),
            ("old_order_id", self.old_order_id),
            ("new_order_id", self.new_order_id),
        ] {
            if id <= 0 {
                return Err(MatchError::validation(format!(
                    "{} must be a positive id, got {}",
                    field, id
                )));
            }
        }
        if self.old_order_id == self.new_order_id {
            return Err(MatchError::validation(
                "new order must differ from the current order",
            ));
        }
        require_reason(&self.reason)?;
        require_actor(&self.actor)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReassignResult {
    pub old_order_id: i64,
    pub new_order_id: i64,
    /// `None` when the transaction had no active payment to void.
    pub old_payment_id: Option<i64>,
    pub new_payment_id: i64,
}

#[derive(Clone)]
pub struct ReassignmentWorkflow {
    store: Arc<dyn ReconciliationStore>,
    timeout: Duration,
}

impl ReassignmentWorkflow {
    pub fn new(store: Arc<dyn ReconciliationStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Void the current payment and re-point the transaction at a new order,
    /// all in one unit of work.
    #[instrument(skip(self, request), fields(
        transaction_id = request.transaction_id,
        old_order_id = request.old_order_id,
        new_order_id = request.new_order_id,
    ))]
    pub async fn reassign(&self, request: ReassignRequest) -> Result<ReassignResult, MatchError> {
        request.validate()?;
        let ReassignRequest {
            transaction_id,
            old_order_id,
            new_order_id,
            reason,
            actor,
        } = request;
        let reason = reason.trim().to_string();
        let actor = actor.trim().to_string();

        let result = atomically(self.store.as_ref(), "reassign", self.timeout, move |uow| {
            Box::pin(async move {
                let locked = uow
                    .lock_transaction(transaction_id)
                    .await?
                    .ok_or(MatchError::TransactionNotFound(transaction_id))?;
                if locked.status != TransactionStatus::Matched {
                    return Err(MatchError::invalid_status(
                        transaction_id,
                        locked.status,
                        &[TransactionStatus::Matched],
                    ));
                }
                if locked.order_id != Some(old_order_id) {
                    return Err(MatchError::OrderMismatch {
                        id: transaction_id,
                        expected: old_order_id,
                        actual: locked.order_id,
                    });
                }
                for order_id in [old_order_id, new_order_id] {
                    uow.get_order(order_id)
                        .await?
                        .ok_or(MatchError::OrderNotFound(order_id))?;
                }

                let now = Utc::now();
                let mut old_payment_id = None;
                if let Some(payment_id) = locked.payment_id {
                    let active = uow
                        .get_payment(payment_id)
                        .await?
                        .filter(|payment| !payment.is_voided());
                    if let Some(payment) = active {
                        let void_reason = format!("Reassigned to order #{}", new_order_id);
                        uow.void_payment(payment.id, &void_reason, now).await?;
                        old_payment_id = Some(payment.id);
                    }
                }

                let notes = format!("Reassigned from order #{}: {}", old_order_id, reason);
                let payment = uow
                    .insert_payment(&NewPayment::for_transaction(
                        &locked,
                        new_order_id,
                        &actor,
                        Some(notes),
                    ))
                    .await?;

                let next = BankTransaction {
                    order_id: Some(new_order_id),
                    payment_id: Some(payment.id),
                    matched_by: Some(MatchedBy::User),
                    matched_at: Some(now),
                    ..locked.clone()
                };
                uow.update_transaction(&next, TransactionStatus::Matched)
                    .await?;

                let mut entry = audit::transition(
                    AuditAction::Reassign,
                    &locked,
                    &next,
                    &actor,
                    Some(reason),
                    now,
                    json!({ "voided_payment_id": old_payment_id }),
                );
                entry.old_payment_id = old_payment_id;
                audit::record(uow, &entry).await?;

                Ok(ReassignResult {
                    old_order_id,
                    new_order_id,
                    old_payment_id,
                    new_payment_id: payment.id,
                })
            })
        })
        .await?;

        info!(
            old_payment_id = ?result.old_payment_id,
            new_payment_id = result.new_payment_id,
            "Payment reassigned"
        );
        Ok(result)
    }
}
