//! Threshold routing: picks the best candidate and decides the outcome.

use super::error::MatchError;
use super::scoring::{ConfidenceBreakdown, ConfidenceScorer, MAX_SCORE};
use crate::models::{BankTransaction, Order, TransactionStatus};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigValidationError {
    #[error("review threshold must be greater than zero")]
    ZeroReviewThreshold,

    #[error("review threshold {review} is above auto threshold {auto}")]
    ReviewAboveAuto { review: u32, auto: u32 },

    #[error("auto threshold {auto} is above the maximum score {max}")]
    AutoAboveMax { auto: u32, max: u32 },
}

/// Validated routing thresholds. Holds `0 < review <= auto <= MAX_SCORE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    auto: u32,
    review: u32,
}

impl Thresholds {
    pub fn new(auto: u32, review: u32) -> Result<Self, ConfigValidationError> {
        if review == 0 {
            return Err(ConfigValidationError::ZeroReviewThreshold);
        }
        if review > auto {
            return Err(ConfigValidationError::ReviewAboveAuto { review, auto });
        }
        if auto > MAX_SCORE {
            return Err(ConfigValidationError::AutoAboveMax {
                auto,
                max: MAX_SCORE,
            });
        }
        Ok(Self { auto, review })
    }

    pub fn auto(&self) -> u32 {
        self.auto
    }

    pub fn review(&self) -> u32 {
        self.review
    }

    pub fn route(&self, score: u32) -> RouteOutcome {
        if score >= self.auto {
            RouteOutcome::Matched
        } else if score >= self.review {
            RouteOutcome::Review
        } else {
            RouteOutcome::Unmatched
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            auto: 200,
            review: 150,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteOutcome {
    Matched,
    Review,
    Unmatched,
}

impl RouteOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Matched => "matched",
            Self::Review => "review",
            Self::Unmatched => "unmatched",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub order: Order,
    pub breakdown: ConfidenceBreakdown,
}

impl ScoredCandidate {
    pub fn score(&self) -> u32 {
        self.breakdown.total
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteDecision {
    pub outcome: RouteOutcome,
    pub best: Option<ScoredCandidate>,
}

impl RouteDecision {
    /// Winning score, or 0 when there were no candidates.
    pub fn score(&self) -> u32 {
        self.best.as_ref().map_or(0, ScoredCandidate::score)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MatchRouter {
    thresholds: Thresholds,
    scorer: ConfidenceScorer,
}

impl MatchRouter {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            scorer: ConfidenceScorer::new(),
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub fn scorer(&self) -> &ConfidenceScorer {
        &self.scorer
    }

    /// Score every candidate and order by score descending, then order id
    /// ascending.
    pub fn rank(
        &self,
        transaction: &BankTransaction,
        candidates: Vec<Order>,
    ) -> Vec<ScoredCandidate> {
        let mut ranked: Vec<ScoredCandidate> = candidates
            .into_iter()
            .map(|order| ScoredCandidate {
                breakdown: self.scorer.confidence_breakdown(transaction, &order),
                order,
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.score()
                .cmp(&a.score())
                .then_with(|| a.order.id.cmp(&b.order.id))
        });
        ranked
    }

    pub fn decide(
        &self,
        transaction: &BankTransaction,
        candidates: Vec<Order>,
    ) -> Result<RouteDecision, MatchError> {
        if !TransactionStatus::AUTO_ELIGIBLE.contains(&transaction.status) {
            return Err(MatchError::invalid_status(
                transaction.id,
                transaction.status,
                &TransactionStatus::AUTO_ELIGIBLE,
            ));
        }

        let best = self.rank(transaction, candidates).into_iter().next();
        let outcome = match &best {
            Some(candidate) => self.thresholds.route(candidate.score()),
            None => RouteOutcome::Unmatched,
        };
        Ok(RouteDecision { outcome, best })
    }
}
