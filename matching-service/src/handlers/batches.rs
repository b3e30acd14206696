use axum::{extract::State, http::HeaderMap, Json};
use chrono::NaiveDate;
use serde::Deserialize;

use super::operator;
use crate::engine::{BatchSelection, BatchSummary, MatchError};
use crate::models::MatchedBy;
use crate::startup::AppState;
use service_core::error::AppError;

/// Either explicit ids or an inclusive `YYYY-MM-DD` date range.
#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub transaction_ids: Option<Vec<i64>>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendToReviewRequest {
    #[serde(flatten)]
    pub selection: BatchRequest,
    /// Defaults to `MANUAL` for explicit ids and `SYSTEM` for date ranges.
    pub matched_by: Option<MatchedBy>,
}

fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, MatchError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|e| {
        MatchError::validation(format!("{} must be YYYY-MM-DD, got '{}': {}", field, raw, e))
    })
}

impl BatchRequest {
    fn selection(&self) -> Result<BatchSelection, MatchError> {
        match (&self.transaction_ids, &self.date_from, &self.date_to) {
            (Some(ids), None, None) => Ok(BatchSelection::Ids(ids.clone())),
            (None, Some(from), Some(to)) => Ok(BatchSelection::DateRange {
                from: parse_date("date_from", from)?,
                to: parse_date("date_to", to)?,
            }),
            _ => Err(MatchError::validation(
                "provide either transaction_ids or both date_from and date_to",
            )),
        }
    }
}

#[tracing::instrument(skip(state, request))]
pub async fn auto_match_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<BatchSummary>, AppError> {
    let selection = request.selection()?;
    let cancel = state.shutdown.child_token();

    let summary = state
        .engine
        .run_auto_match_batch(&selection, &cancel)
        .await?;
    Ok(Json(summary))
}

#[tracing::instrument(skip(state, headers, request))]
pub async fn send_to_review_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SendToReviewRequest>,
) -> Result<Json<BatchSummary>, AppError> {
    let actor = operator(&headers)?;
    let selection = request.selection.selection()?;
    let matched_by = request.matched_by.unwrap_or(match &selection {
        BatchSelection::Ids(_) => MatchedBy::Manual,
        BatchSelection::DateRange { .. } => MatchedBy::System,
    });
    let cancel = state.shutdown.child_token();

    let summary = state
        .engine
        .run_send_to_review_batch(&selection, matched_by, &actor, &cancel)
        .await?;
    Ok(Json(summary))
}
