//! Persistence seam for the engine.
//!
//! `ReconciliationStore` serves plain reads; every write goes through a
//! `UnitOfWork`, which is committed or rolled back as a whole. Implementations
//! must make `lock_transaction` exclusive: while one unit holds a bank
//! transaction, no other unit can lock or update it.

pub mod memory;
pub mod postgres;

use crate::engine::error::MatchError;
use crate::models::{
    AuditTrailEntry, BankTransaction, NewAuditEntry, NewPayment, Order, Payment, TransactionStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

/// Coarse filters for candidate orders.
///
/// When more than `limit` orders pass the filters, the closest ones to
/// `amount` and `date` are kept: smallest amount difference, then smallest
/// date distance, then lowest id.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateQuery {
    /// Bank line amount the candidates are ranked against.
    pub amount: Decimal,
    /// Bank line date the candidates are ranked against.
    pub date: NaiveDate,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub amount_min: Decimal,
    pub amount_max: Decimal,
    /// Outlet names to search; empty means every outlet.
    pub outlets: Vec<String>,
    pub excluded_statuses: Vec<String>,
    pub limit: usize,
}

impl CandidateQuery {
    pub fn admits(&self, order: &Order) -> bool {
        order.order_date >= self.date_from
            && order.order_date <= self.date_to
            && order.total_price >= self.amount_min
            && order.total_price <= self.amount_max
            && !self.excluded_statuses.iter().any(|s| s == &order.status)
            && (self.outlets.is_empty()
                || order
                    .outlet_name
                    .as_ref()
                    .is_some_and(|outlet| self.outlets.contains(outlet)))
    }

    /// Sort key used to pick which admitted orders survive the limit.
    pub fn closeness(&self, order: &Order) -> (Decimal, i64, i64) {
        (
            (order.total_price - self.amount).abs(),
            (order.order_date - self.date).num_days().abs(),
            order.id,
        )
    }
}

/// Selection of bank transactions for batch runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionFilter {
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub statuses: Vec<TransactionStatus>,
    pub limit: Option<usize>,
}

impl TransactionFilter {
    pub fn admits(&self, transaction: &BankTransaction) -> bool {
        self.date_from
            .is_none_or(|from| transaction.transaction_date >= from)
            && self.date_to.is_none_or(|to| transaction.transaction_date <= to)
            && (self.statuses.is_empty() || self.statuses.contains(&transaction.status))
    }
}

#[async_trait]
pub trait ReconciliationStore: Send + Sync {
    /// Open an atomic unit of work.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, MatchError>;

    async fn get_transaction(&self, id: i64) -> Result<Option<BankTransaction>, MatchError>;

    async fn get_order(&self, id: i64) -> Result<Option<Order>, MatchError>;

    /// Orders admitted by `query` that carry no active payment, by ascending id.
    async fn find_candidate_orders(&self, query: &CandidateQuery)
        -> Result<Vec<Order>, MatchError>;

    /// Transactions admitted by `filter`, by ascending id.
    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<BankTransaction>, MatchError>;

    async fn payments_for_transaction(
        &self,
        transaction_id: i64,
    ) -> Result<Vec<Payment>, MatchError>;

    /// Audit entries for a transaction, oldest first.
    async fn audit_trail(&self, transaction_id: i64) -> Result<Vec<AuditTrailEntry>, MatchError>;

    async fn health_check(&self) -> Result<(), MatchError>;
}

#[async_trait]
pub trait UnitOfWork: Send {
    /// Read a bank transaction and hold it exclusively until commit/rollback.
    async fn lock_transaction(&mut self, id: i64) -> Result<Option<BankTransaction>, MatchError>;

    async fn get_order(&mut self, id: i64) -> Result<Option<Order>, MatchError>;

    async fn get_payment(&mut self, id: i64) -> Result<Option<Payment>, MatchError>;

    async fn insert_payment(&mut self, payment: &NewPayment) -> Result<Payment, MatchError>;

    /// One-way void. Voiding an already voided payment is a conflict.
    async fn void_payment(
        &mut self,
        id: i64,
        reason: &str,
        voided_at: DateTime<Utc>,
    ) -> Result<Payment, MatchError>;

    /// Write `next` only if the stored status still equals `expected`;
    /// otherwise fail with `MatchError::Conflict`.
    async fn update_transaction(
        &mut self,
        next: &BankTransaction,
        expected: TransactionStatus,
    ) -> Result<(), MatchError>;

    async fn append_audit(&mut self, entry: &NewAuditEntry) -> Result<AuditTrailEntry, MatchError>;

    async fn commit(self: Box<Self>) -> Result<(), MatchError>;

    async fn rollback(self: Box<Self>) -> Result<(), MatchError>;
}
