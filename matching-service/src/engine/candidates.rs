//! Candidate discovery: the coarse filters that keep candidate sets small.

use super::atomic::bounded;
use super::error::MatchError;
use crate::models::{BankTransaction, Order, TransactionStatus};
use crate::store::{CandidateQuery, ReconciliationStore};
use chrono::{Days, NaiveDate};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

const MAX_DATE_WINDOW_DAYS: i64 = 366;
const MAX_CANDIDATE_LIMIT: usize = 1_000;

/// Search bounds applied before any scoring happens.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateWindow {
    /// Orders dated within this many days either side of the bank line.
    pub date_window_days: i64,
    /// Absolute amount tolerance.
    pub amount_tolerance: Decimal,
    /// Relative amount tolerance; the wider of the two applies.
    pub amount_tolerance_pct: Decimal,
    pub candidate_limit: usize,
    /// Outlet names to search; empty means every outlet.
    pub outlet_scope: Vec<String>,
    pub excluded_order_statuses: Vec<String>,
}

impl Default for CandidateWindow {
    fn default() -> Self {
        Self {
            date_window_days: 7,
            amount_tolerance: Decimal::new(500, 2),
            amount_tolerance_pct: Decimal::new(5, 2),
            candidate_limit: 50,
            outlet_scope: Vec::new(),
            excluded_order_statuses: vec!["cancelled".to_string(), "refunded".to_string()],
        }
    }
}

impl CandidateWindow {
    pub fn validate(&self) -> Result<(), String> {
        if !(0..=MAX_DATE_WINDOW_DAYS).contains(&self.date_window_days) {
            return Err(format!(
                "date window must be between 0 and {} days, got {}",
                MAX_DATE_WINDOW_DAYS, self.date_window_days
            ));
        }
        if self.amount_tolerance.is_sign_negative() {
            return Err(format!(
                "amount tolerance must not be negative, got {}",
                self.amount_tolerance
            ));
        }
        if self.amount_tolerance_pct.is_sign_negative() || self.amount_tolerance_pct > Decimal::ONE
        {
            return Err(format!(
                "relative amount tolerance must be between 0 and 1, got {}",
                self.amount_tolerance_pct
            ));
        }
        if self.candidate_limit == 0 || self.candidate_limit > MAX_CANDIDATE_LIMIT {
            return Err(format!(
                "candidate limit must be between 1 and {}, got {}",
                MAX_CANDIDATE_LIMIT, self.candidate_limit
            ));
        }
        Ok(())
    }

    /// Store query for `transaction`, or `None` when no order could be paid
    /// by it (zero or negative amounts).
    pub fn query_for(&self, transaction: &BankTransaction) -> Option<CandidateQuery> {
        if transaction.amount <= Decimal::ZERO {
            return None;
        }

        let tolerance = self
            .amount_tolerance
            .max(transaction.amount * self.amount_tolerance_pct);
        let days = Days::new(self.date_window_days.max(0) as u64);
        let date = transaction.transaction_date;

        Some(CandidateQuery {
            amount: transaction.amount,
            date,
            date_from: date.checked_sub_days(days).unwrap_or(NaiveDate::MIN),
            date_to: date.checked_add_days(days).unwrap_or(NaiveDate::MAX),
            amount_min: (transaction.amount - tolerance).max(Decimal::ZERO),
            amount_max: transaction.amount + tolerance,
            outlets: self.outlet_scope.clone(),
            excluded_statuses: self.excluded_order_statuses.clone(),
            limit: self.candidate_limit,
        })
    }
}

#[derive(Clone)]
pub struct CandidateFinder {
    store: Arc<dyn ReconciliationStore>,
    window: CandidateWindow,
    timeout: Duration,
}

impl CandidateFinder {
    pub fn new(
        store: Arc<dyn ReconciliationStore>,
        window: CandidateWindow,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            window,
            timeout,
        }
    }

    pub fn window(&self) -> &CandidateWindow {
        &self.window
    }

    /// Orders that could plausibly be paid by `transaction`, closest first.
    ///
    /// An empty result is a normal outcome. Store faults and timeouts are
    /// returned as errors; a partial list is never returned. When the limit
    /// is reached only the closest orders by amount and date are kept.
    pub async fn find_candidates(
        &self,
        transaction: &BankTransaction,
    ) -> Result<Vec<Order>, MatchError> {
        self.search(transaction, &TransactionStatus::AUTO_ELIGIBLE).await
    }

    /// Same search for operator review, which also covers voided and
    /// duplicate lines an operator may still confirm by hand.
    pub async fn find_operator_candidates(
        &self,
        transaction: &BankTransaction,
    ) -> Result<Vec<Order>, MatchError> {
        self.search(transaction, &TransactionStatus::OPERATOR_ELIGIBLE).await
    }

    #[instrument(skip(self, transaction, allowed), fields(transaction_id = transaction.id))]
    async fn search(
        &self,
        transaction: &BankTransaction,
        allowed: &[TransactionStatus],
    ) -> Result<Vec<Order>, MatchError> {
        if !allowed.contains(&transaction.status) {
            return Err(MatchError::invalid_status(transaction.id, transaction.status, allowed));
        }

        let Some(query) = self.window.query_for(transaction) else {
            debug!(amount = %transaction.amount, "Non-positive amount, no candidates");
            return Ok(Vec::new());
        };

        let candidates = bounded(
            "find_candidates",
            self.timeout,
            self.store.find_candidate_orders(&query),
        )
        .await?;

        if candidates.len() >= query.limit {
            warn!(
                limit = query.limit,
                "Candidate limit reached, keeping the closest orders by amount and date"
            );
        }

        debug!(count = candidates.len(), "Candidates found");
        Ok(candidates)
    }
}
