//! Confidence scoring for (bank transaction, order) pairs.
//!
//! The score is the sum of four independently weighted factors:
//!
//! | factor    | weight |
//! |-----------|--------|
//! | amount    | 120    |
//! | date      | 60     |
//! | reference | 70     |
//! | name      | 50     |
//!
//! Amounts within a cent earn the full 120. Beyond that the credit falls
//! linearly from just under 120 to zero at a 5% relative difference, so a
//! one-cent gap costs a point rather than a step.
//!
//! Scoring is a pure function of its inputs. It never reads the clock.

use crate::models::{BankTransaction, Order};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeSet;

pub const AMOUNT_WEIGHT: u32 = 120;
pub const DATE_WEIGHT: u32 = 60;
pub const REFERENCE_WEIGHT: u32 = 70;
pub const NAME_WEIGHT: u32 = 50;
pub const MAX_SCORE: u32 = AMOUNT_WEIGHT + DATE_WEIGHT + REFERENCE_WEIGHT + NAME_WEIGHT;

const DATE_DECAY_PER_DAY: i64 = 10;
const REFERENCE_PARTIAL: u32 = 50;
const REFERENCE_DIGITS: u32 = 35;
const MIN_REFERENCE_LEN: usize = 4;
const MIN_NAME_SIMILARITY: f64 = 0.3;
const NAME_MATCH_SIMILARITY: f64 = 0.8;

fn amount_epsilon() -> Decimal {
    Decimal::new(1, 2)
}

/// Relative difference at which near-amount credit reaches zero.
fn amount_cutoff() -> Decimal {
    Decimal::new(5, 2)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MatchFlags {
    pub amount_exact: bool,
    pub same_day: bool,
    pub reference_exact: bool,
    pub name_match: bool,
}

/// Per-factor contributions plus the raw measurements behind them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfidenceBreakdown {
    pub amount: u32,
    pub date: u32,
    pub reference: u32,
    pub name: u32,
    pub total: u32,
    pub amount_difference: Decimal,
    pub days_apart: i64,
    pub name_similarity: f64,
    pub flags: MatchFlags,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConfidenceScorer;

impl ConfidenceScorer {
    pub fn new() -> Self {
        Self
    }

    pub fn calculate_confidence(&self, transaction: &BankTransaction, order: &Order) -> u32 {
        self.confidence_breakdown(transaction, order).total
    }

    pub fn confidence_breakdown(
        &self,
        transaction: &BankTransaction,
        order: &Order,
    ) -> ConfidenceBreakdown {
        let amount_difference = (transaction.amount - order.total_price).abs();
        let amount = amount_points(transaction.amount, order.total_price);

        let days_apart = (transaction.transaction_date - order.order_date)
            .num_days()
            .abs();
        let date = date_points(days_apart);

        let reference = reference_points(transaction, order.invoice_number.as_deref());

        let name_similarity = name_similarity(&transaction.name, &order.customer_name());
        let name = name_points(name_similarity);

        ConfidenceBreakdown {
            amount,
            date,
            reference,
            name,
            total: amount + date + reference + name,
            amount_difference,
            days_apart,
            name_similarity,
            flags: MatchFlags {
                amount_exact: amount == AMOUNT_WEIGHT,
                same_day: days_apart == 0,
                reference_exact: reference == REFERENCE_WEIGHT,
                name_match: name_similarity >= NAME_MATCH_SIMILARITY,
            },
        }
    }
}

fn amount_points(a: Decimal, b: Decimal) -> u32 {
    let difference = (a - b).abs();
    if difference < amount_epsilon() {
        return AMOUNT_WEIGHT;
    }
    let scale = a.abs().max(b.abs());
    if scale.is_zero() {
        return 0;
    }
    let relative = difference / scale;
    if relative >= amount_cutoff() {
        return 0;
    }
    let points = Decimal::from(AMOUNT_WEIGHT) * (Decimal::ONE - relative / amount_cutoff());
    // Only amounts within a cent earn the full weight.
    points
        .floor()
        .to_u32()
        .map_or(0, |p| p.min(AMOUNT_WEIGHT - 1))
}

fn date_points(days_apart: i64) -> u32 {
    let points = DATE_WEIGHT as i64 - DATE_DECAY_PER_DAY * days_apart;
    points.max(0) as u32
}

/// Upper-case alphanumerics only, so "inv-1001" and "INV 1001" compare equal.
pub fn normalize_reference(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Longest run of ASCII digits in `raw`.
fn longest_digit_run(raw: &str) -> &str {
    raw.split(|c: char| !c.is_ascii_digit())
        .max_by_key(|run| run.len())
        .unwrap_or("")
}

fn reference_points(transaction: &BankTransaction, invoice_number: Option<&str>) -> u32 {
    let invoice = normalize_reference(invoice_number.unwrap_or(""));
    if invoice.is_empty() {
        return 0;
    }

    let reference = normalize_reference(&transaction.reference);
    if reference == invoice {
        return REFERENCE_WEIGHT;
    }

    let texts: Vec<String> = transaction
        .searchable_text()
        .map(normalize_reference)
        .filter(|t| !t.is_empty())
        .collect();

    let invoice_found =
        invoice.len() >= MIN_REFERENCE_LEN && texts.iter().any(|t| t.contains(&invoice));
    let reference_in_invoice =
        reference.len() >= MIN_REFERENCE_LEN && invoice.contains(&reference);
    if invoice_found || reference_in_invoice {
        return REFERENCE_PARTIAL;
    }

    let digits = longest_digit_run(&invoice);
    if digits.len() >= MIN_REFERENCE_LEN && texts.iter().any(|t| t.contains(digits)) {
        return REFERENCE_DIGITS;
    }
    0
}

fn name_tokens(raw: &str) -> Vec<String> {
    raw.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn bigrams(text: &str) -> Vec<(char, char)> {
    let chars: Vec<char> = text.chars().collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

/// Similarity of two person names in `[0, 1]`.
///
/// Names with the same set of tokens ("SMITH J" and "j smith") score 1.0;
/// otherwise the Sørensen–Dice coefficient over character bigrams of the
/// sorted tokens is used.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let mut left = name_tokens(a);
    let mut right = name_tokens(b);
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }

    let left_set: BTreeSet<&String> = left.iter().collect();
    let right_set: BTreeSet<&String> = right.iter().collect();
    if left_set == right_set {
        return 1.0;
    }

    left.sort();
    right.sort();
    let left_bigrams = bigrams(&left.join(" "));
    let mut right_bigrams = bigrams(&right.join(" "));
    let total = left_bigrams.len() + right_bigrams.len();
    if total == 0 {
        return 0.0;
    }

    let mut shared = 0usize;
    for pair in &left_bigrams {
        if let Some(pos) = right_bigrams.iter().position(|p| p == pair) {
            right_bigrams.swap_remove(pos);
            shared += 1;
        }
    }
    (2 * shared) as f64 / total as f64
}

fn name_points(similarity: f64) -> u32 {
    if similarity < MIN_NAME_SIMILARITY {
        return 0;
    }
    (NAME_WEIGHT as f64 * similarity).round() as u32
}
