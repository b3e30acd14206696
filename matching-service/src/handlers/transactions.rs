use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::operator;
use crate::engine::{MatchResult, ReassignRequest, ReassignResult, Suggestion};
use crate::models::{AuditTrailEntry, BankTransaction};
use crate::startup::AppState;
use service_core::error::AppError;

#[derive(Debug, Deserialize, Validate)]
pub struct SuggestionsQuery {
    #[validate(range(min = 1, max = 50, message = "limit must be between 1 and 50"))]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SuggestionsResponse {
    pub transaction_id: i64,
    pub suggestions: Vec<Suggestion>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ConfirmMatchRequest {
    #[validate(range(min = 1, message = "order_id must be positive"))]
    pub order_id: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReassignPaymentRequest {
    #[validate(range(min = 1, message = "old_order_id must be positive"))]
    pub old_order_id: i64,
    #[validate(range(min = 1, message = "new_order_id must be positive"))]
    pub new_order_id: i64,
    #[validate(length(min = 1, max = 500, message = "reason must be 1-500 characters"))]
    pub reason: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReasonRequest {
    #[validate(length(min = 1, max = 500, message = "reason must be 1-500 characters"))]
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct AuditTrailResponse {
    pub transaction_id: i64,
    pub entries: Vec<AuditTrailEntry>,
    pub count: usize,
}

#[tracing::instrument(skip(state))]
pub async fn auto_match(
    State(state): State<AppState>,
    Path(transaction_id): Path<i64>,
) -> Result<Json<MatchResult>, AppError> {
    let result = state.engine.auto_match_transaction(transaction_id).await?;
    Ok(Json(result))
}

#[tracing::instrument(skip(state))]
pub async fn suggestions(
    State(state): State<AppState>,
    Path(transaction_id): Path<i64>,
    Query(query): Query<SuggestionsQuery>,
) -> Result<Json<SuggestionsResponse>, AppError> {
    query.validate()?;

    let suggestions = state
        .engine
        .suggestions(transaction_id, query.limit)
        .await?;

    Ok(Json(SuggestionsResponse {
        transaction_id,
        suggestions,
    }))
}

#[tracing::instrument(skip(state, headers, request))]
pub async fn confirm_match(
    State(state): State<AppState>,
    Path(transaction_id): Path<i64>,
    headers: HeaderMap,
    Json(request): Json<ConfirmMatchRequest>,
) -> Result<Json<MatchResult>, AppError> {
    request.validate()?;
    let actor = operator(&headers)?;

    let result = state
        .engine
        .confirm_match(transaction_id, request.order_id, &actor)
        .await?;

    tracing::info!(
        transaction_id,
        order_id = request.order_id,
        actor = %actor,
        "Match confirmed by operator"
    );
    Ok(Json(result))
}

#[tracing::instrument(skip(state, headers, request))]
pub async fn reassign(
    State(state): State<AppState>,
    Path(transaction_id): Path<i64>,
    headers: HeaderMap,
    Json(request): Json<ReassignPaymentRequest>,
) -> Result<Json<ReassignResult>, AppError> {
    request.validate()?;
    let actor = operator(&headers)?;

    let result = state
        .engine
        .reassign(ReassignRequest {
            transaction_id,
            old_order_id: request.old_order_id,
            new_order_id: request.new_order_id,
            reason: request.reason,
            actor,
        })
        .await?;

    Ok(Json(result))
}

#[tracing::instrument(skip(state, headers, request))]
pub async fn void_match(
    State(state): State<AppState>,
    Path(transaction_id): Path<i64>,
    headers: HeaderMap,
    Json(request): Json<ReasonRequest>,
) -> Result<Json<BankTransaction>, AppError> {
    request.validate()?;
    let actor = operator(&headers)?;

    let transaction = state
        .engine
        .void_match(transaction_id, &request.reason, &actor)
        .await?;
    Ok(Json(transaction))
}

#[tracing::instrument(skip(state, headers, request))]
pub async fn mark_duplicate(
    State(state): State<AppState>,
    Path(transaction_id): Path<i64>,
    headers: HeaderMap,
    Json(request): Json<ReasonRequest>,
) -> Result<Json<BankTransaction>, AppError> {
    request.validate()?;
    let actor = operator(&headers)?;

    let transaction = state
        .engine
        .mark_duplicate(transaction_id, &request.reason, &actor)
        .await?;
    Ok(Json(transaction))
}

#[tracing::instrument(skip(state))]
pub async fn audit_trail(
    State(state): State<AppState>,
    Path(transaction_id): Path<i64>,
) -> Result<Json<AuditTrailResponse>, AppError> {
    let entries = state.engine.audit_trail(transaction_id).await?;

    Ok(Json(AuditTrailResponse {
        transaction_id,
        count: entries.len(),
        entries,
    }))
}
