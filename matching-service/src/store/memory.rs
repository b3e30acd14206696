//! In-memory store for tests and local development.
//!
//! A unit of work holds the store mutex for its whole lifetime and mutates a
//! private copy of the state; the copy replaces the shared state only on
//! commit. Dropping or rolling back a unit discards every change it made.

use super::{CandidateQuery, ReconciliationStore, TransactionFilter, UnitOfWork};
use crate::engine::error::MatchError;
use crate::models::{
    AuditTrailEntry, BankTransaction, NewAuditEntry, NewPayment, Order, Payment, TransactionStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    transactions: BTreeMap<i64, BankTransaction>,
    orders: BTreeMap<i64, Order>,
    payments: BTreeMap<i64, Payment>,
    audit: Vec<AuditTrailEntry>,
    next_payment_id: i64,
    next_audit_id: i64,
}

impl MemoryState {
    fn has_active_payment_for_order(&self, order_id: i64) -> bool {
        self.payments
            .values()
            .any(|p| p.order_id == order_id && !p.is_voided())
    }
}

/// Switches that make individual store operations misbehave.
#[derive(Debug, Default)]
pub struct FaultInjection {
    fail_transaction_updates: AtomicBool,
    fail_audit_appends: AtomicBool,
    fail_reads: AtomicBool,
    read_delay_ms: AtomicU64,
}

impl FaultInjection {
    pub fn fail_transaction_updates(&self, enabled: bool) {
        self.fail_transaction_updates.store(enabled, Ordering::SeqCst);
    }

    pub fn fail_audit_appends(&self, enabled: bool) {
        self.fail_audit_appends.store(enabled, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, enabled: bool) {
        self.fail_reads.store(enabled, Ordering::SeqCst);
    }

    pub fn delay_reads(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    async fn before_read(&self, operation: &str) -> Result<(), MatchError> {
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(MatchError::store(anyhow::anyhow!(
                "injected read fault in {}",
                operation
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
    faults: Arc<FaultInjection>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> &FaultInjection {
        &self.faults
    }

    /// Insert or replace a bank transaction as ingestion would.
    pub async fn seed_transaction(&self, transaction: BankTransaction) {
        self.state
            .lock()
            .await
            .transactions
            .insert(transaction.id, transaction);
    }

    pub async fn seed_order(&self, order: Order) {
        self.state.lock().await.orders.insert(order.id, order);
    }

    /// Every payment row, voided or not.
    pub async fn all_payments(&self) -> Vec<Payment> {
        self.state.lock().await.payments.values().cloned().collect()
    }

    /// Every audit row across all transactions.
    pub async fn all_audit_entries(&self) -> Vec<AuditTrailEntry> {
        self.state.lock().await.audit.clone()
    }
}

#[async_trait]
impl ReconciliationStore for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, MatchError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryUnitOfWork {
            guard,
            working,
            faults: self.faults.clone(),
        }))
    }

    async fn get_transaction(&self, id: i64) -> Result<Option<BankTransaction>, MatchError> {
        self.faults.before_read("get_transaction").await?;
        Ok(self.state.lock().await.transactions.get(&id).cloned())
    }

    async fn get_order(&self, id: i64) -> Result<Option<Order>, MatchError> {
        self.faults.before_read("get_order").await?;
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn find_candidate_orders(
        &self,
        query: &CandidateQuery,
    ) -> Result<Vec<Order>, MatchError> {
        self.faults.before_read("find_candidate_orders").await?;
        let state = self.state.lock().await;
        let mut admitted: Vec<Order> = state
            .orders
            .values()
            .filter(|order| query.admits(order))
            .filter(|order| !state.has_active_payment_for_order(order.id))
            .cloned()
            .collect();
        admitted.sort_by_key(|order| query.closeness(order));
        admitted.truncate(query.limit);
        Ok(admitted)
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<BankTransaction>, MatchError> {
        self.faults.before_read("list_transactions").await?;
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .values()
            .filter(|t| filter.admits(t))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn payments_for_transaction(
        &self,
        transaction_id: i64,
    ) -> Result<Vec<Payment>, MatchError> {
        self.faults.before_read("payments_for_transaction").await?;
        Ok(self
            .state
            .lock()
            .await
            .payments
            .values()
            .filter(|p| p.bank_transaction_id == transaction_id)
            .cloned()
            .collect())
    }

    async fn audit_trail(&self, transaction_id: i64) -> Result<Vec<AuditTrailEntry>, MatchError> {
        self.faults.before_read("audit_trail").await?;
        Ok(self
            .state
            .lock()
            .await
            .audit
            .iter()
            .filter(|e| e.transaction_id == transaction_id)
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> Result<(), MatchError> {
        self.faults.before_read("health_check").await
    }
}

struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    faults: Arc<FaultInjection>,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn lock_transaction(&mut self, id: i64) -> Result<Option<BankTransaction>, MatchError> {
        Ok(self.working.transactions.get(&id).cloned())
    }

    async fn get_order(&mut self, id: i64) -> Result<Option<Order>, MatchError> {
        Ok(self.working.orders.get(&id).cloned())
    }

    async fn get_payment(&mut self, id: i64) -> Result<Option<Payment>, MatchError> {
        Ok(self.working.payments.get(&id).cloned())
    }

    async fn insert_payment(&mut self, payment: &NewPayment) -> Result<Payment, MatchError> {
        let duplicate = self
            .working
            .payments
            .values()
            .any(|p| p.bank_transaction_id == payment.bank_transaction_id && !p.is_voided());
        if duplicate {
            return Err(MatchError::Conflict {
                id: payment.bank_transaction_id,
                message: "an active payment already exists".to_string(),
            });
        }

        self.working.next_payment_id += 1;
        let row = Payment {
            id: self.working.next_payment_id,
            order_id: payment.order_id,
            bank_transaction_id: payment.bank_transaction_id,
            amount: payment.amount,
            payment_date: payment.payment_date,
            payment_type: payment.payment_type.clone(),
            reference: payment.reference.clone(),
            created_by: payment.created_by.clone(),
            created_at: Utc::now(),
            voided_at: None,
            void_reason: None,
            notes: payment.notes.clone(),
        };
        self.working.payments.insert(row.id, row.clone());
        Ok(row)
    }

    async fn void_payment(
        &mut self,
        id: i64,
        reason: &str,
        voided_at: DateTime<Utc>,
    ) -> Result<Payment, MatchError> {
        let payment = self
            .working
            .payments
            .get_mut(&id)
            .ok_or_else(|| MatchError::CorruptData(format!("payment {} does not exist", id)))?;
        if payment.is_voided() {
            return Err(MatchError::Conflict {
                id: payment.bank_transaction_id,
                message: format!("payment {} is already voided", id),
            });
        }
        payment.voided_at = Some(voided_at);
        payment.void_reason = Some(reason.to_string());
        Ok(payment.clone())
    }

    async fn update_transaction(
        &mut self,
        next: &BankTransaction,
        expected: TransactionStatus,
    ) -> Result<(), MatchError> {
        if self.faults.fail_transaction_updates.load(Ordering::SeqCst) {
            return Err(MatchError::store(anyhow::anyhow!(
                "injected fault updating bank transaction {}",
                next.id
            )));
        }
        next.check_invariants().map_err(MatchError::CorruptData)?;

        let current = self
            .working
            .transactions
            .get_mut(&next.id)
            .ok_or(MatchError::TransactionNotFound(next.id))?;
        if current.status != expected {
            return Err(MatchError::Conflict {
                id: next.id,
                message: format!("status is {}, expected {}", current.status, expected),
            });
        }
        *current = next.clone();
        Ok(())
    }

    async fn append_audit(&mut self, entry: &NewAuditEntry) -> Result<AuditTrailEntry, MatchError> {
        if self.faults.fail_audit_appends.load(Ordering::SeqCst) {
            return Err(MatchError::store(anyhow::anyhow!(
                "injected fault appending audit for bank transaction {}",
                entry.transaction_id
            )));
        }
        self.working.next_audit_id += 1;
        let row = AuditTrailEntry {
            id: self.working.next_audit_id,
            transaction_id: entry.transaction_id,
            action: entry.action,
            old_order_id: entry.old_order_id,
            new_order_id: entry.new_order_id,
            old_payment_id: entry.old_payment_id,
            new_payment_id: entry.new_payment_id,
            reason: entry.reason.clone(),
            performed_by: entry.performed_by.clone(),
            performed_at: entry.performed_at,
            details: entry.details.clone(),
        };
        self.working.audit.push(row.clone());
        Ok(row)
    }

    async fn commit(self: Box<Self>) -> Result<(), MatchError> {
        let MemoryUnitOfWork {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), MatchError> {
        Ok(())
    }
}
