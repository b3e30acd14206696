//! Integration tests for the HTTP surface.

mod common;

use common::{full_match_store, order, spawn_app, OPERATOR};
use matching_service::handlers::USER_ID_HEADER;
use reqwest::StatusCode;
use serde_json::{json, Value};

#[tokio::test]
async fn health_and_metrics_endpoints_respond() {
    let app = spawn_app(full_match_store().await).await;

    let health = app.client.get(app.url("/health")).send().await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    let body: Value = health.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "matching-service");

    let ready = app.client.get(app.url("/ready")).send().await.unwrap();
    assert_eq!(ready.status(), StatusCode::OK);

    let metrics = app.client.get(app.url("/metrics")).send().await.unwrap();
    assert_eq!(metrics.status(), StatusCode::OK);
}

#[tokio::test]
async fn health_reports_store_outage() {
    let app = spawn_app(full_match_store().await).await;
    app.store.faults().fail_reads(true);

    let health = app.client.get(app.url("/health")).send().await.unwrap();
    assert_eq!(health.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn auto_match_then_repeat_is_precondition_failed() {
    let app = spawn_app(full_match_store().await).await;

    let response = app
        .client
        .post(app.url("/v1/transactions/1/auto-match"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "matched");
    assert_eq!(body["confidence"], 300);
    assert_eq!(body["order_id"], 1);
    assert!(body["payment_id"].is_i64());

    let repeat = app
        .client
        .post(app.url("/v1/transactions/1/auto-match"))
        .send()
        .await
        .unwrap();
    assert_eq!(repeat.status(), StatusCode::PRECONDITION_FAILED);
    let body: Value = repeat.json().await.unwrap();
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn unknown_transaction_is_not_found() {
    let app = spawn_app(full_match_store().await).await;

    let response = app
        .client
        .post(app.url("/v1/transactions/404/auto-match"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn store_outage_is_service_unavailable_with_retry_hint() {
    let app = spawn_app(full_match_store().await).await;
    app.store.faults().fail_reads(true);

    let response = app
        .client
        .post(app.url("/v1/transactions/1/auto-match"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(response.headers().contains_key("retry-after"));
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["retryable"], true);
}

#[tokio::test]
async fn suggestions_are_ranked_with_breakdown() {
    let store = full_match_store().await;
    store
        .seed_order(order(2, 12, "101.00", "Jon", "Smyth", None))
        .await;
    let app = spawn_app(store).await;

    let response = app
        .client
        .get(app.url("/v1/transactions/1/suggestions?limit=1"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    let suggestions = body["suggestions"].as_array().unwrap();
    assert_eq!(suggestions.len(), 1);
    assert_eq!(suggestions[0]["order"]["id"], 1);
    assert_eq!(suggestions[0]["score"], 300);
    assert_eq!(suggestions[0]["breakdown"]["amount"], 120);
    assert_eq!(suggestions[0]["flags"]["reference_exact"], true);

    let invalid = app
        .client
        .get(app.url("/v1/transactions/1/suggestions?limit=0"))
        .send()
        .await
        .unwrap();
    assert_eq!(invalid.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn operator_writes_require_identity() {
    let app = spawn_app(full_match_store().await).await;

    let response = app
        .client
        .post(app.url("/v1/transactions/1/confirm"))
        .json(&json!({ "order_id": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.store.all_payments().await.is_empty());
}

#[tokio::test]
async fn confirm_reassign_and_audit_over_http() {
    let store = full_match_store().await;
    store
        .seed_order(order(2, 11, "100.00", "Jane", "Doe", None))
        .await;
    let app = spawn_app(store).await;

    let confirmed = app
        .client
        .post(app.url("/v1/transactions/1/confirm"))
        .header(USER_ID_HEADER, OPERATOR)
        .json(&json!({ "order_id": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(confirmed.status(), StatusCode::OK);

    let reassigned = app
        .client
        .post(app.url("/v1/transactions/1/reassign"))
        .header(USER_ID_HEADER, OPERATOR)
        .json(&json!({
            "old_order_id": 1,
            "new_order_id": 2,
            "reason": "customer paid the wrong invoice"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(reassigned.status(), StatusCode::OK);
    let body: Value = reassigned.json().await.unwrap();
    assert_eq!(body["old_order_id"], 1);
    assert_eq!(body["new_order_id"], 2);
    assert!(body["old_payment_id"].is_i64());

    let mismatch = app
        .client
        .post(app.url("/v1/transactions/1/reassign"))
        .header(USER_ID_HEADER, OPERATOR)
        .json(&json!({
            "old_order_id": 1,
            "new_order_id": 2,
            "reason": "retry with stale view"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(mismatch.status(), StatusCode::PRECONDITION_FAILED);

    let audit = app
        .client
        .get(app.url("/v1/transactions/1/audit"))
        .send()
        .await
        .unwrap();
    assert_eq!(audit.status(), StatusCode::OK);
    let body: Value = audit.json().await.unwrap();
    assert_eq!(body["count"], 2);
    assert_eq!(body["entries"][0]["action"], "manual_match");
    assert_eq!(body["entries"][1]["action"], "reassign");
    assert_eq!(body["entries"][1]["performed_by"], OPERATOR);
}

#[tokio::test]
async fn void_and_duplicate_over_http() {
    let store = full_match_store().await;
    store
        .seed_transaction(common::bank_transaction(2, 10, "55.00", "X", "Y"))
        .await;
    let app = spawn_app(store).await;

    app.client
        .post(app.url("/v1/transactions/1/auto-match"))
        .send()
        .await
        .unwrap();

    let voided = app
        .client
        .post(app.url("/v1/transactions/1/void"))
        .header(USER_ID_HEADER, OPERATOR)
        .json(&json!({ "reason": "deposit reversed" }))
        .send()
        .await
        .unwrap();
    assert_eq!(voided.status(), StatusCode::OK);
    let body: Value = voided.json().await.unwrap();
    assert_eq!(body["status"], "voided");

    let empty_reason = app
        .client
        .post(app.url("/v1/transactions/2/duplicate"))
        .header(USER_ID_HEADER, OPERATOR)
        .json(&json!({ "reason": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(empty_reason.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let duplicate = app
        .client
        .post(app.url("/v1/transactions/2/duplicate"))
        .header(USER_ID_HEADER, OPERATOR)
        .json(&json!({ "reason": "imported twice" }))
        .send()
        .await
        .unwrap();
    assert_eq!(duplicate.status(), StatusCode::OK);
    let body: Value = duplicate.json().await.unwrap();
    assert_eq!(body["status"], "duplicate");
}

#[tokio::test]
async fn batch_endpoints_return_summaries() {
    let store = full_match_store().await;
    store
        .seed_transaction(common::bank_transaction(2, 10, "55.00", "X", "Y"))
        .await;
    let app = spawn_app(store).await;

    let response = app
        .client
        .post(app.url("/v1/batches/auto-match"))
        .json(&json!({ "transaction_ids": [1, 2, 3] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let summary: Value = response.json().await.unwrap();
    assert_eq!(summary["matched"], 1);
    assert_eq!(summary["unmatched"], 1);
    assert_eq!(summary["errors"], 1);
    assert_eq!(summary["failed"], 2);
    assert_eq!(summary["total_processed"], 3);
    assert_eq!(summary["cancelled"], false);

    let review = app
        .client
        .post(app.url("/v1/batches/send-to-review"))
        .header(USER_ID_HEADER, OPERATOR)
        .json(&json!({ "date_from": "2025-01-01", "date_to": "2025-01-31" }))
        .send()
        .await
        .unwrap();
    assert_eq!(review.status(), StatusCode::OK);
    let summary: Value = review.json().await.unwrap();
    assert_eq!(summary["review"], 1);
    assert_eq!(summary["total_processed"], 1);

    let bad = app
        .client
        .post(app.url("/v1/batches/auto-match"))
        .json(&json!({ "date_from": "January", "date_to": "2025-01-31" }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
}
