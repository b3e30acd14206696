//! Engine entry points: single-transaction matching, suggestions, batches and
//! operator actions.

use super::atomic::bounded;
use super::batch::{dedupe, run_batch, BatchSelection, BatchSummary};
use super::candidates::CandidateFinder;
use super::committer::{require_actor, TransactionalCommitter};
use super::error::MatchError;
use super::reassign::{ReassignRequest, ReassignResult, ReassignmentWorkflow};
use super::router::{MatchRouter, RouteOutcome};
use super::scoring::{ConfidenceBreakdown, MatchFlags};
use crate::config::EngineConfig;
use crate::models::{AuditTrailEntry, BankTransaction, MatchedBy, Order, TransactionStatus};
use crate::services::metrics::{record_match_outcome, record_operator_action};
use crate::store::{ReconciliationStore, TransactionFilter};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Actor recorded for decisions the engine takes on its own.
pub const SYSTEM_ACTOR: &str = "system";

/// Result of routing or confirming a single transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    pub status: RouteOutcome,
    pub confidence: u32,
    pub order_id: Option<i64>,
    pub payment_id: Option<i64>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub order: Order,
    pub score: u32,
    pub breakdown: ConfidenceBreakdown,
    pub flags: MatchFlags,
}

#[derive(Clone)]
pub struct MatchingEngine {
    store: Arc<dyn ReconciliationStore>,
    finder: CandidateFinder,
    router: MatchRouter,
    committer: TransactionalCommitter,
    reassignment: ReassignmentWorkflow,
    config: EngineConfig,
}

impl MatchingEngine {
    pub fn new(store: Arc<dyn ReconciliationStore>, config: EngineConfig) -> Self {
        Self {
            finder: CandidateFinder::new(
                store.clone(),
                config.window.clone(),
                config.store_timeout,
            ),
            router: MatchRouter::new(config.thresholds),
            committer: TransactionalCommitter::new(store.clone(), config.store_timeout),
            reassignment: ReassignmentWorkflow::new(store.clone(), config.store_timeout),
            store,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ReconciliationStore> {
        &self.store
    }

    pub async fn health_check(&self) -> Result<(), MatchError> {
        bounded(
            "health_check",
            self.config.store_timeout,
            self.store.health_check(),
        )
        .await
    }

    async fn load_transaction(&self, id: i64) -> Result<BankTransaction, MatchError> {
        if id <= 0 {
            return Err(MatchError::validation(format!(
                "transaction id must be positive, got {}",
                id
            )));
        }
        bounded(
            "get_transaction",
            self.config.store_timeout,
            self.store.get_transaction(id),
        )
        .await?
        .ok_or(MatchError::TransactionNotFound(id))
    }

    async fn load_order(&self, id: i64) -> Result<Order, MatchError> {
        if id <= 0 {
            return Err(MatchError::validation(format!(
                "order id must be positive, got {}",
                id
            )));
        }
        bounded(
            "get_order",
            self.config.store_timeout,
            self.store.get_order(id),
        )
        .await?
        .ok_or(MatchError::OrderNotFound(id))
    }

    /// Find, score and route one transaction, committing the outcome.
    #[instrument(skip(self))]
    pub async fn auto_match_transaction(&self, id: i64) -> Result<MatchResult, MatchError> {
        let transaction = self.load_transaction(id).await?;
        if transaction.status == TransactionStatus::Matched {
            return Err(MatchError::AlreadyMatched { id });
        }

        let candidates = self.finder.find_candidates(&transaction).await?;
        let decision = self.router.decide(&transaction, candidates)?;
        let score = decision.score();

        let result = match (&decision.outcome, &decision.best) {
            (RouteOutcome::Matched, Some(best)) => {
                let committed = self
                    .committer
                    .commit_match(
                        &transaction,
                        best.order.id,
                        score,
                        MatchedBy::Auto,
                        SYSTEM_ACTOR,
                    )
                    .await?;
                MatchResult {
                    status: RouteOutcome::Matched,
                    confidence: score,
                    order_id: Some(best.order.id),
                    payment_id: Some(committed.payment.id),
                    message: format!(
                        "Matched to order #{} with confidence {}",
                        best.order.id, score
                    ),
                }
            }
            (RouteOutcome::Review, Some(best)) => {
                self.committer
                    .set_review(&transaction, score, MatchedBy::System, SYSTEM_ACTOR)
                    .await?;
                MatchResult {
                    status: RouteOutcome::Review,
                    confidence: score,
                    order_id: None,
                    payment_id: None,
                    message: format!(
                        "Best candidate order #{} scored {}; sent to review",
                        best.order.id, score
                    ),
                }
            }
            _ => {
                if transaction.status == TransactionStatus::Review {
                    self.committer
                        .clear_review(&transaction, SYSTEM_ACTOR)
                        .await?;
                }
                let message = match &decision.best {
                    Some(best) => format!(
                        "Best candidate order #{} scored {}, below the review threshold",
                        best.order.id, score
                    ),
                    None => "No candidate orders found".to_string(),
                };
                MatchResult {
                    status: RouteOutcome::Unmatched,
                    confidence: score,
                    order_id: None,
                    payment_id: None,
                    message,
                }
            }
        };

        let matched_by = match result.status {
            RouteOutcome::Matched => MatchedBy::Auto.as_str(),
            RouteOutcome::Review => MatchedBy::System.as_str(),
            RouteOutcome::Unmatched => "none",
        };
        record_match_outcome(
            result.status.as_str(),
            matched_by,
            decision.best.as_ref().map(|_| score),
        );
        info!(
            outcome = result.status.as_str(),
            score,
            order_id = ?result.order_id,
            "Transaction routed"
        );
        Ok(result)
    }

    /// Top-ranked candidates with their breakdowns. Read-only, and served for
    /// every status an operator may confirm from.
    #[instrument(skip(self))]
    pub async fn suggestions(
        &self,
        id: i64,
        limit: Option<usize>,
    ) -> Result<Vec<Suggestion>, MatchError> {
        let limit = limit.unwrap_or(self.config.suggestion_limit);
        if limit == 0 {
            return Err(MatchError::validation("limit must be at least 1"));
        }

        let transaction = self.load_transaction(id).await?;
        let candidates = self.finder.find_operator_candidates(&transaction).await?;

        Ok(self
            .router
            .rank(&transaction, candidates)
            .into_iter()
            .take(limit)
            .map(|candidate| Suggestion {
                score: candidate.score(),
                flags: candidate.breakdown.flags,
                breakdown: candidate.breakdown,
                order: candidate.order,
            })
            .collect())
    }

    /// Operator-confirmed match. The stored confidence is the scorer's value
    /// for the pair, whatever the thresholds say.
    #[instrument(skip(self, actor))]
    pub async fn confirm_match(
        &self,
        id: i64,
        order_id: i64,
        actor: &str,
    ) -> Result<MatchResult, MatchError> {
        let actor = require_actor(actor)?;
        let transaction = self.load_transaction(id).await?;
        let order = self.load_order(order_id).await?;
        let score = self
            .router
            .scorer()
            .calculate_confidence(&transaction, &order);

        let outcome = self
            .committer
            .commit_match(&transaction, order.id, score, MatchedBy::Manual, &actor)
            .await;
        record_operator_action("manual_match", status_label(&outcome));
        let committed = outcome?;

        record_match_outcome("matched", MatchedBy::Manual.as_str(), Some(score));
        Ok(MatchResult {
            status: RouteOutcome::Matched,
            confidence: score,
            order_id: Some(order.id),
            payment_id: Some(committed.payment.id),
            message: format!(
                "Matched to order #{} by {} with confidence {}",
                order.id, actor, score
            ),
        })
    }

    pub async fn reassign(&self, request: ReassignRequest) -> Result<ReassignResult, MatchError> {
        let outcome = self.reassignment.reassign(request).await;
        record_operator_action("reassign", status_label(&outcome));
        outcome
    }

    pub async fn void_match(
        &self,
        id: i64,
        reason: &str,
        actor: &str,
    ) -> Result<BankTransaction, MatchError> {
        let outcome = self.committer.void_match(id, reason, actor).await;
        record_operator_action("void", status_label(&outcome));
        outcome
    }

    pub async fn mark_duplicate(
        &self,
        id: i64,
        reason: &str,
        actor: &str,
    ) -> Result<BankTransaction, MatchError> {
        let outcome = self.committer.mark_duplicate(id, reason, actor).await;
        record_operator_action("duplicate", status_label(&outcome));
        outcome
    }

    pub async fn audit_trail(&self, id: i64) -> Result<Vec<AuditTrailEntry>, MatchError> {
        // Confirms the transaction exists so an unknown id is not an empty trail.
        self.load_transaction(id).await?;
        bounded(
            "audit_trail",
            self.config.store_timeout,
            self.store.audit_trail(id),
        )
        .await
    }

    async fn resolve(&self, selection: &BatchSelection) -> Result<Vec<i64>, MatchError> {
        selection.validate()?;
        match selection {
            BatchSelection::Ids(ids) => Ok(dedupe(ids.clone())),
            BatchSelection::DateRange { from, to } => {
                let filter = TransactionFilter {
                    date_from: Some(*from),
                    date_to: Some(*to),
                    statuses: TransactionStatus::AUTO_ELIGIBLE.to_vec(),
                    limit: None,
                };
                let transactions = bounded(
                    "list_transactions",
                    self.config.store_timeout,
                    self.store.list_transactions(&filter),
                )
                .await?;
                Ok(transactions.into_iter().map(|t| t.id).collect())
            }
        }
    }

    /// Auto-match every selected transaction.
    #[instrument(skip(self, cancel))]
    pub async fn run_auto_match_batch(
        &self,
        selection: &BatchSelection,
        cancel: &CancellationToken,
    ) -> Result<BatchSummary, MatchError> {
        let ids = self.resolve(selection).await?;
        info!(count = ids.len(), "Starting auto-match batch");

        Ok(run_batch("auto_match", ids, cancel, move |id| async move {
            self.auto_match_transaction(id)
                .await
                .map(|result| result.status)
        })
        .await)
    }

    /// Force every selected transaction into review, recording its best
    /// candidate score (0 without candidates).
    #[instrument(skip(self, cancel, actor))]
    pub async fn run_send_to_review_batch(
        &self,
        selection: &BatchSelection,
        matched_by: MatchedBy,
        actor: &str,
        cancel: &CancellationToken,
    ) -> Result<BatchSummary, MatchError> {
        if !matches!(matched_by, MatchedBy::System | MatchedBy::Manual) {
            return Err(MatchError::validation(format!(
                "send-to-review is attributed to SYSTEM or MANUAL, not {}",
                matched_by
            )));
        }
        let actor = require_actor(actor)?;
        let ids = self.resolve(selection).await?;
        info!(count = ids.len(), "Starting send-to-review batch");

        let actor = actor.as_str();
        Ok(run_batch("send_to_review", ids, cancel, move |id| async move {
            self.send_to_review(id, matched_by, actor).await
        })
        .await)
    }

    async fn send_to_review(
        &self,
        id: i64,
        matched_by: MatchedBy,
        actor: &str,
    ) -> Result<RouteOutcome, MatchError> {
        let transaction = self.load_transaction(id).await?;
        let candidates = self.finder.find_candidates(&transaction).await?;
        let score = self
            .router
            .rank(&transaction, candidates)
            .first()
            .map_or(0, |best| best.score());

        self.committer
            .set_review(&transaction, score, matched_by, actor)
            .await?;
        record_match_outcome("review", matched_by.as_str(), Some(score));
        Ok(RouteOutcome::Review)
    }
}

fn status_label<T>(outcome: &Result<T, MatchError>) -> &'static str {
    match outcome {
        Ok(_) => "success",
        Err(err) => err.kind().as_str(),
    }
}
