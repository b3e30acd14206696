//! Domain models for matching-service.
//!
//! These are the only shapes the engine works with. Store implementations
//! decode their rows into these types at the boundary.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// Returned when a persisted enum column holds a value this build does not know.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

// ============================================================================
// Bank Transaction Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Unmatched,
    Review,
    Matched,
    Voided,
    Duplicate,
}

string_enum!(TransactionStatus, "transaction status", {
    Unmatched => "unmatched",
    Review => "review",
    Matched => "matched",
    Voided => "voided",
    Duplicate => "duplicate",
});

impl TransactionStatus {
    /// Statuses the automatic flows (router, batch) may act on.
    pub const AUTO_ELIGIBLE: [TransactionStatus; 2] =
        [TransactionStatus::Unmatched, TransactionStatus::Review];

    /// Statuses an operator may confirm a match from.
    pub const OPERATOR_ELIGIBLE: [TransactionStatus; 4] = [
        TransactionStatus::Unmatched,
        TransactionStatus::Review,
        TransactionStatus::Voided,
        TransactionStatus::Duplicate,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    StoreDeposit,
    RetailCustomer,
    WholesaleCustomer,
    EftposSettlement,
    Other,
}

string_enum!(TransactionType, "transaction type", {
    StoreDeposit => "store_deposit",
    RetailCustomer => "retail_customer",
    WholesaleCustomer => "wholesale_customer",
    EftposSettlement => "eftpos_settlement",
    Other => "other",
});

impl TransactionType {
    /// Payment type recorded on payments created from this kind of bank line.
    pub fn payment_type(&self) -> &'static str {
        match self {
            Self::StoreDeposit => "store_deposit",
            Self::EftposSettlement => "eftpos",
            Self::RetailCustomer | Self::WholesaleCustomer | Self::Other => "bank_transfer",
        }
    }
}

/// Provenance of a match or routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchedBy {
    Auto,
    System,
    User,
    Manual,
}

string_enum!(MatchedBy, "matched_by", {
    Auto => "AUTO",
    System => "SYSTEM",
    User => "USER",
    Manual => "MANUAL",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankTransaction {
    pub id: i64,
    pub transaction_date: NaiveDate,
    pub transaction_time: Option<NaiveTime>,
    pub reference: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub order_id: Option<i64>,
    pub payment_id: Option<i64>,
    pub confidence_score: Option<i32>,
    pub matched_by: Option<MatchedBy>,
    pub matched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl BankTransaction {
    /// Check the status/link invariants every persisted row must satisfy.
    pub fn check_invariants(&self) -> Result<(), String> {
        let linked = self.order_id.is_some() && self.payment_id.is_some();
        let unlinked = self.order_id.is_none() && self.payment_id.is_none();
        let is_matched = self.status == TransactionStatus::Matched;

        if is_matched && !linked {
            return Err(format!(
                "transaction {} is matched without order and payment",
                self.id
            ));
        }
        if !is_matched && !unlinked {
            return Err(format!(
                "transaction {} is {} but still linked to an order or payment",
                self.id, self.status
            ));
        }

        let scored = matches!(
            self.status,
            TransactionStatus::Matched | TransactionStatus::Review
        );
        if scored != self.confidence_score.is_some() {
            return Err(format!(
                "transaction {} is {} with confidence {:?}",
                self.id, self.status, self.confidence_score
            ));
        }
        Ok(())
    }

    /// Text fields that may carry an invoice number or payer hint.
    pub fn searchable_text(&self) -> impl Iterator<Item = &str> {
        [Some(self.reference.as_str()), self.description.as_deref(), Some(self.name.as_str())]
            .into_iter()
            .flatten()
    }

    /// State with every match-related field cleared, keeping the given status.
    pub(crate) fn cleared(&self, status: TransactionStatus) -> Self {
        Self {
            status,
            order_id: None,
            payment_id: None,
            confidence_score: None,
            matched_by: None,
            matched_at: None,
            ..self.clone()
        }
    }
}

// ============================================================================
// Order Models
// ============================================================================

/// A commerce order; owned by the order system and only read here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: i64,
    pub total_price: Decimal,
    pub order_date: NaiveDate,
    pub customer_first_name: String,
    pub customer_last_name: String,
    pub outlet_name: Option<String>,
    pub invoice_number: Option<String>,
    pub status: String,
}

impl Order {
    pub fn customer_name(&self) -> String {
        format!(
            "{} {}",
            self.customer_first_name.trim(),
            self.customer_last_name.trim()
        )
        .trim()
        .to_string()
    }
}

// ============================================================================
// Payment Models
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: i64,
    pub order_id: i64,
    pub bank_transaction_id: i64,
    pub amount: Decimal,
    pub payment_date: NaiveDate,
    pub payment_type: String,
    pub reference: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub voided_at: Option<DateTime<Utc>>,
    pub void_reason: Option<String>,
    pub notes: Option<String>,
}

impl Payment {
    pub fn is_voided(&self) -> bool {
        self.voided_at.is_some()
    }
}

/// Payment row to be inserted; the store assigns id and created_at.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub order_id: i64,
    pub bank_transaction_id: i64,
    pub amount: Decimal,
    pub payment_date: NaiveDate,
    pub payment_type: String,
    pub reference: String,
    pub created_by: String,
    pub notes: Option<String>,
}

impl NewPayment {
    /// Payment mirroring a bank line's amount, date and reference.
    pub fn for_transaction(
        transaction: &BankTransaction,
        order_id: i64,
        created_by: &str,
        notes: Option<String>,
    ) -> Self {
        Self {
            order_id,
            bank_transaction_id: transaction.id,
            amount: transaction.amount,
            payment_date: transaction.transaction_date,
            payment_type: transaction.transaction_type.payment_type().to_string(),
            reference: transaction.reference.clone(),
            created_by: created_by.to_string(),
            notes,
        }
    }
}

// ============================================================================
// Audit Trail Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    AutoMatch,
    ManualMatch,
    Review,
    Unmatch,
    Void,
    Duplicate,
    Reassign,
}

string_enum!(AuditAction, "audit action", {
    AutoMatch => "auto_match",
    ManualMatch => "manual_match",
    Review => "review",
    Unmatch => "unmatch",
    Void => "void",
    Duplicate => "duplicate",
    Reassign => "reassign",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditTrailEntry {
    pub id: i64,
    pub transaction_id: i64,
    pub action: AuditAction,
    pub old_order_id: Option<i64>,
    pub new_order_id: Option<i64>,
    pub old_payment_id: Option<i64>,
    pub new_payment_id: Option<i64>,
    pub reason: Option<String>,
    pub performed_by: String,
    pub performed_at: DateTime<Utc>,
    pub details: serde_json::Value,
}

/// Audit row to be appended; the store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    pub transaction_id: i64,
    pub action: AuditAction,
    pub old_order_id: Option<i64>,
    pub new_order_id: Option<i64>,
    pub old_payment_id: Option<i64>,
    pub new_payment_id: Option<i64>,
    pub reason: Option<String>,
    pub performed_by: String,
    pub performed_at: DateTime<Utc>,
    pub details: serde_json::Value,
}
