//! Batch processing with per-item isolation.
//!
//! A failing item is counted and logged; it never stops the batch. The
//! cancellation token is checked between items only, so an item that has
//! started always runs to completion.

use super::error::MatchError;
use super::router::RouteOutcome;
use crate::services::metrics::{record_batch_items, record_error};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const MAX_BATCH_IDS: usize = 5_000;

/// Aggregate counters for one batch run.
///
/// `failed` is `unmatched + errors`, kept for callers that only know the
/// three-way split. `matched + review + failed == total_processed` always.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub matched: usize,
    pub review: usize,
    pub failed: usize,
    pub total_processed: usize,
    pub unmatched: usize,
    pub errors: usize,
    pub cancelled: bool,
}

impl BatchSummary {
    fn record(&mut self, outcome: &Result<RouteOutcome, MatchError>) {
        match outcome {
            Ok(RouteOutcome::Matched) => self.matched += 1,
            Ok(RouteOutcome::Review) => self.review += 1,
            Ok(RouteOutcome::Unmatched) => {
                self.unmatched += 1;
                self.failed += 1;
            }
            Err(_) => {
                self.errors += 1;
                self.failed += 1;
            }
        }
        self.total_processed += 1;
    }

    pub fn is_consistent(&self) -> bool {
        self.matched + self.review + self.failed == self.total_processed
            && self.unmatched + self.errors == self.failed
    }
}

/// Which transactions a batch run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchSelection {
    /// Explicit ids, processed in the given order with duplicates dropped.
    Ids(Vec<i64>),
    /// `unmatched` and `review` transactions dated within the range, inclusive.
    DateRange { from: NaiveDate, to: NaiveDate },
}

impl BatchSelection {
    pub fn validate(&self) -> Result<(), MatchError> {
        match self {
            Self::Ids(ids) => {
                if ids.is_empty() {
                    return Err(MatchError::validation("at least one transaction id is required"));
                }
                if ids.len() > MAX_BATCH_IDS {
                    return Err(MatchError::validation(format!(
                        "at most {} transaction ids per batch, got {}",
                        MAX_BATCH_IDS,
                        ids.len()
                    )));
                }
                if let Some(bad) = ids.iter().find(|id| **id <= 0) {
                    return Err(MatchError::validation(format!(
                        "transaction ids must be positive, got {}",
                        bad
                    )));
                }
                Ok(())
            }
            Self::DateRange { from, to } => {
                if from > to {
                    return Err(MatchError::validation(format!(
                        "date range starts after it ends: {} > {}",
                        from, to
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Drop repeated ids, keeping the first occurrence.
pub(crate) fn dedupe(ids: Vec<i64>) -> Vec<i64> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

/// Process `ids` one by one with `process`, counting every outcome.
pub async fn run_batch<F, Fut>(
    batch: &'static str,
    ids: Vec<i64>,
    cancel: &CancellationToken,
    mut process: F,
) -> BatchSummary
where
    F: FnMut(i64) -> Fut,
    Fut: Future<Output = Result<RouteOutcome, MatchError>>,
{
    let mut summary = BatchSummary::default();
    let total = ids.len();

    for id in ids {
        if cancel.is_cancelled() {
            summary.cancelled = true;
            warn!(
                batch,
                processed = summary.total_processed,
                remaining = total - summary.total_processed,
                "Batch cancelled"
            );
            break;
        }

        let outcome = process(id).await;
        if let Err(err) = &outcome {
            record_error(err.kind().as_str());
            warn!(
                batch,
                transaction_id = id,
                error = %err,
                kind = err.kind().as_str(),
                retryable = err.is_retryable(),
                "Batch item failed"
            );
        }
        summary.record(&outcome);
    }

    record_batch_items(batch, "matched", summary.matched);
    record_batch_items(batch, "review", summary.review);
    record_batch_items(batch, "unmatched", summary.unmatched);
    record_batch_items(batch, "error", summary.errors);

    info!(
        batch,
        matched = summary.matched,
        review = summary.review,
        unmatched = summary.unmatched,
        errors = summary.errors,
        total_processed = summary.total_processed,
        cancelled = summary.cancelled,
        "Batch finished"
    );
    summary
}
