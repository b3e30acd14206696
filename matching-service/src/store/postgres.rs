//! PostgreSQL store.
//!
//! Row locks come from `SELECT ... FOR UPDATE` inside a transaction, and
//! status writes are compare-and-set on the expected status, so a concurrent
//! writer that slipped past the lock still surfaces as a conflict.

use super::{CandidateQuery, ReconciliationStore, TransactionFilter, UnitOfWork};
use crate::engine::error::MatchError;
use crate::models::{
    AuditTrailEntry, BankTransaction, NewAuditEntry, NewPayment, Order, Payment, TransactionStatus,
};
use crate::services::metrics::db_timer;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument, warn};

const TRANSACTION_COLUMNS: &str = "id, transaction_date, transaction_time, reference, name, \
     description, transaction_type, amount, status, order_id, payment_id, confidence_score, \
     matched_by, matched_at, created_at";

const ORDER_COLUMNS: &str = "id, total_price, order_date, customer_first_name, \
     customer_last_name, outlet_name, invoice_number, status";

const PAYMENT_COLUMNS: &str = "id, order_id, bank_transaction_id, amount, payment_date, \
     payment_type, reference, created_by, created_at, voided_at, void_reason, notes";

const AUDIT_COLUMNS: &str = "id, transaction_id, action, old_order_id, new_order_id, \
     old_payment_id, new_payment_id, reason, performed_by, performed_at, details";

#[derive(Debug, FromRow)]
struct BankTransactionRow {
    id: i64,
    transaction_date: NaiveDate,
    transaction_time: Option<NaiveTime>,
    reference: String,
    name: String,
    description: Option<String>,
    transaction_type: String,
    amount: Decimal,
    status: String,
    order_id: Option<i64>,
    payment_id: Option<i64>,
    confidence_score: Option<i32>,
    matched_by: Option<String>,
    matched_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<BankTransactionRow> for BankTransaction {
    type Error = MatchError;

    fn try_from(row: BankTransactionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            transaction_date: row.transaction_date,
            transaction_time: row.transaction_time,
            reference: row.reference,
            name: row.name,
            description: row.description,
            transaction_type: row.transaction_type.parse()?,
            amount: row.amount,
            status: row.status.parse()?,
            order_id: row.order_id,
            payment_id: row.payment_id,
            confidence_score: row.confidence_score,
            matched_by: row.matched_by.as_deref().map(str::parse).transpose()?,
            matched_at: row.matched_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct AuditRow {
    id: i64,
    transaction_id: i64,
    action: String,
    old_order_id: Option<i64>,
    new_order_id: Option<i64>,
    old_payment_id: Option<i64>,
    new_payment_id: Option<i64>,
    reason: Option<String>,
    performed_by: String,
    performed_at: DateTime<Utc>,
    details: serde_json::Value,
}

impl TryFrom<AuditRow> for AuditTrailEntry {
    type Error = MatchError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            transaction_id: row.transaction_id,
            action: row.action.parse()?,
            old_order_id: row.old_order_id,
            new_order_id: row.new_order_id,
            old_payment_id: row.old_payment_id,
            new_payment_id: row.new_payment_id,
            reason: row.reason,
            performed_by: row.performed_by,
            performed_at: row.performed_at,
            details: row.details,
        })
    }
}

/// Map a driver error. Constraint violations keep their meaning; everything
/// else is treated as the store being unavailable.
fn db_error(context: &str, transaction_id: Option<i64>, err: sqlx::Error) -> MatchError {
    if let Some(db_err) = err.as_database_error() {
        if db_err.is_unique_violation() {
            return MatchError::Conflict {
                id: transaction_id.unwrap_or_default(),
                message: format!("{}: {}", context, db_err.message()),
            };
        }
        if db_err.is_check_violation() || db_err.is_foreign_key_violation() {
            return MatchError::CorruptData(format!("{}: {}", context, db_err.message()));
        }
    }
    MatchError::store(anyhow::anyhow!("{}: {}", context, err))
}

/// Connection pool wrapper implementing the reconciliation store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "matching-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl ReconciliationStore for PgStore {
    #[instrument(skip(self))]
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, MatchError> {
        let _timer = db_timer("begin");
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", None, e))?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    #[instrument(skip(self))]
    async fn get_transaction(&self, id: i64) -> Result<Option<BankTransaction>, MatchError> {
        let _timer = db_timer("get_transaction");
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM bank_transactions WHERE id = $1");
        sqlx::query_as::<_, BankTransactionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to get bank transaction", Some(id), e))?
            .map(BankTransaction::try_from)
            .transpose()
    }

    #[instrument(skip(self))]
    async fn get_order(&self, id: i64) -> Result<Option<Order>, MatchError> {
        let _timer = db_timer("get_order");
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        sqlx::query_as::<_, Order>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to get order", None, e))
    }

    #[instrument(skip(self), fields(date_from = %query.date_from, date_to = %query.date_to))]
    async fn find_candidate_orders(
        &self,
        query: &CandidateQuery,
    ) -> Result<Vec<Order>, MatchError> {
        let _timer = db_timer("find_candidate_orders");
        let outlets = (!query.outlets.is_empty()).then(|| query.outlets.clone());
        let sql = format!(
            r#"
            SELECT {ORDER_COLUMNS}
            FROM orders o
            WHERE o.order_date BETWEEN $1 AND $2
              AND o.total_price BETWEEN $3 AND $4
              AND o.status <> ALL($5::text[])
              AND ($6::text[] IS NULL OR o.outlet_name = ANY($6))
              AND NOT EXISTS (
                  SELECT 1 FROM payments p
                  WHERE p.order_id = o.id AND p.voided_at IS NULL
              )
            ORDER BY ABS(o.total_price - $8::numeric), ABS(o.order_date - $9::date), o.id
            LIMIT $7
            "#
        );
        sqlx::query_as::<_, Order>(&sql)
            .bind(query.date_from)
            .bind(query.date_to)
            .bind(query.amount_min)
            .bind(query.amount_max)
            .bind(&query.excluded_statuses)
            .bind(outlets)
            .bind(query.limit as i64)
            .bind(query.amount)
            .bind(query.date)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to find candidate orders", None, e))
    }

    #[instrument(skip(self))]
    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<BankTransaction>, MatchError> {
        let _timer = db_timer("list_transactions");
        let statuses: Vec<String> = filter
            .statuses
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        let sql = format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM bank_transactions
            WHERE ($1::date IS NULL OR transaction_date >= $1)
              AND ($2::date IS NULL OR transaction_date <= $2)
              AND (cardinality($3::text[]) = 0 OR status = ANY($3))
            ORDER BY id
            LIMIT $4
            "#
        );
        let rows = sqlx::query_as::<_, BankTransactionRow>(&sql)
            .bind(filter.date_from)
            .bind(filter.date_to)
            .bind(&statuses)
            .bind(filter.limit.map(|l| l as i64))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to list bank transactions", None, e))?;

        rows.into_iter().map(BankTransaction::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn payments_for_transaction(
        &self,
        transaction_id: i64,
    ) -> Result<Vec<Payment>, MatchError> {
        let _timer = db_timer("payments_for_transaction");
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE bank_transaction_id = $1 ORDER BY id"
        );
        sqlx::query_as::<_, Payment>(&sql)
            .bind(transaction_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to list payments", Some(transaction_id), e))
    }

    #[instrument(skip(self))]
    async fn audit_trail(&self, transaction_id: i64) -> Result<Vec<AuditTrailEntry>, MatchError> {
        let _timer = db_timer("audit_trail");
        let sql = format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_trail WHERE transaction_id = $1 ORDER BY id"
        );
        let rows = sqlx::query_as::<_, AuditRow>(&sql)
            .bind(transaction_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to read audit trail", Some(transaction_id), e))?;

        rows.into_iter().map(AuditTrailEntry::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), MatchError> {
        let _timer = db_timer("health_check");
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Health check failed", None, e))?;
        Ok(())
    }
}

struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    #[instrument(skip(self))]
    async fn lock_transaction(&mut self, id: i64) -> Result<Option<BankTransaction>, MatchError> {
        let _timer = db_timer("lock_transaction");
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM bank_transactions WHERE id = $1 FOR UPDATE"
        );
        sqlx::query_as::<_, BankTransactionRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error("Failed to lock bank transaction", Some(id), e))?
            .map(BankTransaction::try_from)
            .transpose()
    }

    #[instrument(skip(self))]
    async fn get_order(&mut self, id: i64) -> Result<Option<Order>, MatchError> {
        let _timer = db_timer("get_order");
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        sqlx::query_as::<_, Order>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error("Failed to get order", None, e))
    }

    #[instrument(skip(self))]
    async fn get_payment(&mut self, id: i64) -> Result<Option<Payment>, MatchError> {
        let _timer = db_timer("get_payment");
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1");
        sqlx::query_as::<_, Payment>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error("Failed to get payment", None, e))
    }

    #[instrument(skip(self, payment), fields(order_id = payment.order_id, transaction_id = payment.bank_transaction_id))]
    async fn insert_payment(&mut self, payment: &NewPayment) -> Result<Payment, MatchError> {
        let _timer = db_timer("insert_payment");
        let sql = format!(
            r#"
            INSERT INTO payments (order_id, bank_transaction_id, amount, payment_date, payment_type, reference, created_by, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {PAYMENT_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Payment>(&sql)
            .bind(payment.order_id)
            .bind(payment.bank_transaction_id)
            .bind(payment.amount)
            .bind(payment.payment_date)
            .bind(&payment.payment_type)
            .bind(&payment.reference)
            .bind(&payment.created_by)
            .bind(&payment.notes)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| {
                db_error(
                    "Failed to create payment",
                    Some(payment.bank_transaction_id),
                    e,
                )
            })
    }

    #[instrument(skip(self))]
    async fn void_payment(
        &mut self,
        id: i64,
        reason: &str,
        voided_at: DateTime<Utc>,
    ) -> Result<Payment, MatchError> {
        let _timer = db_timer("void_payment");
        let sql = format!(
            r#"
            UPDATE payments
            SET voided_at = $2, void_reason = $3
            WHERE id = $1 AND voided_at IS NULL
            RETURNING {PAYMENT_COLUMNS}
            "#
        );
        let voided = sqlx::query_as::<_, Payment>(&sql)
            .bind(id)
            .bind(voided_at)
            .bind(reason)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error("Failed to void payment", None, e))?;

        match voided {
            Some(payment) => Ok(payment),
            None => match self.get_payment(id).await? {
                Some(existing) => Err(MatchError::Conflict {
                    id: existing.bank_transaction_id,
                    message: format!("payment {} is already voided", id),
                }),
                None => Err(MatchError::CorruptData(format!(
                    "payment {} does not exist",
                    id
                ))),
            },
        }
    }

    #[instrument(skip(self, next), fields(transaction_id = next.id, status = %next.status))]
    async fn update_transaction(
        &mut self,
        next: &BankTransaction,
        expected: TransactionStatus,
    ) -> Result<(), MatchError> {
        let _timer = db_timer("update_transaction");
        let result = sqlx::query(
            r#"
            UPDATE bank_transactions
            SET status = $3,
                order_id = $4,
                payment_id = $5,
                confidence_score = $6,
                matched_by = $7,
                matched_at = $8
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(next.id)
        .bind(expected.as_str())
        .bind(next.status.as_str())
        .bind(next.order_id)
        .bind(next.payment_id)
        .bind(next.confidence_score)
        .bind(next.matched_by.map(|m| m.as_str()))
        .bind(next.matched_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to update bank transaction", Some(next.id), e))?;

        if result.rows_affected() == 0 {
            warn!(transaction_id = next.id, expected = %expected, "Status changed underneath update");
            return Err(MatchError::Conflict {
                id: next.id,
                message: format!("status is no longer {}", expected),
            });
        }
        Ok(())
    }

    #[instrument(skip(self, entry), fields(transaction_id = entry.transaction_id, action = %entry.action))]
    async fn append_audit(&mut self, entry: &NewAuditEntry) -> Result<AuditTrailEntry, MatchError> {
        let _timer = db_timer("append_audit");
        let sql = format!(
            r#"
            INSERT INTO audit_trail (transaction_id, action, old_order_id, new_order_id, old_payment_id, new_payment_id, reason, performed_by, performed_at, details)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {AUDIT_COLUMNS}
            "#
        );
        sqlx::query_as::<_, AuditRow>(&sql)
            .bind(entry.transaction_id)
            .bind(entry.action.as_str())
            .bind(entry.old_order_id)
            .bind(entry.new_order_id)
            .bind(entry.old_payment_id)
            .bind(entry.new_payment_id)
            .bind(&entry.reason)
            .bind(&entry.performed_by)
            .bind(entry.performed_at)
            .bind(&entry.details)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| db_error("Failed to append audit entry", Some(entry.transaction_id), e))?
            .try_into()
    }

    async fn commit(self: Box<Self>) -> Result<(), MatchError> {
        let _timer = db_timer("commit");
        self.tx
            .commit()
            .await
            .map_err(|e| db_error("Failed to commit transaction", None, e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), MatchError> {
        let _timer = db_timer("rollback");
        self.tx
            .rollback()
            .await
            .map_err(|e| db_error("Failed to roll back transaction", None, e))
    }
}
