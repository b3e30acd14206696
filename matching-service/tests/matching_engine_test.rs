//! Integration tests for single-transaction matching and operator actions.

mod common;

use common::{bank_transaction, current, engine, engine_with, full_match_store, order, OPERATOR};
use matching_service::config::EngineConfig;
use matching_service::engine::{ErrorKind, MatchError, RouteOutcome, Thresholds, MAX_SCORE};
use matching_service::models::{AuditAction, MatchedBy, TransactionStatus};
use matching_service::store::{InMemoryStore, ReconciliationStore};
use std::time::Duration;

/// Transaction 2 and order 2 agree on amount and date only (score 180).
async fn seed_review_pair(store: &InMemoryStore) {
    store
        .seed_transaction(bank_transaction(2, 10, "250.00", "TRANSFER", "ACME LTD"))
        .await;
    store
        .seed_order(order(2, 10, "250.00", "Jane", "Doe", None))
        .await;
}

#[tokio::test]
async fn full_match_commits_payment_and_audit() {
    let store = full_match_store().await;
    let engine = engine(&store);

    let result = engine.auto_match_transaction(1).await.unwrap();

    assert_eq!(result.status, RouteOutcome::Matched);
    assert_eq!(result.confidence, MAX_SCORE);
    assert_eq!(result.order_id, Some(1));
    assert!(result.payment_id.is_some());

    let txn = current(&store, 1).await;
    assert_eq!(txn.status, TransactionStatus::Matched);
    assert_eq!(txn.order_id, Some(1));
    assert_eq!(txn.payment_id, result.payment_id);
    assert_eq!(txn.confidence_score, Some(300));
    assert_eq!(txn.matched_by, Some(MatchedBy::Auto));
    assert!(txn.matched_at.is_some());

    let payments = store.all_payments().await;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].amount, txn.amount);
    assert_eq!(payments[0].order_id, 1);
    assert_eq!(payments[0].created_by, "system");

    let audit = engine.audit_trail(1).await.unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, AuditAction::AutoMatch);
    assert_eq!(audit[0].new_order_id, Some(1));
    assert_eq!(audit[0].new_payment_id, result.payment_id);
}

#[tokio::test]
async fn auto_match_is_idempotent() {
    let store = full_match_store().await;
    let engine = engine(&store);

    engine.auto_match_transaction(1).await.unwrap();
    let err = engine.auto_match_transaction(1).await.unwrap_err();

    assert!(matches!(err, MatchError::AlreadyMatched { id: 1 }));
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert_eq!(store.all_payments().await.len(), 1);
    assert_eq!(store.all_audit_entries().await.len(), 1);
}

#[tokio::test]
async fn mid_confidence_goes_to_review() {
    let store = InMemoryStore::new();
    seed_review_pair(&store).await;
    let engine = engine(&store);

    let result = engine.auto_match_transaction(2).await.unwrap();

    assert_eq!(result.status, RouteOutcome::Review);
    assert_eq!(result.confidence, 180);
    assert_eq!(result.payment_id, None);

    let txn = current(&store, 2).await;
    assert_eq!(txn.status, TransactionStatus::Review);
    assert_eq!(txn.confidence_score, Some(180));
    assert_eq!(txn.matched_by, Some(MatchedBy::System));
    assert_eq!(txn.order_id, None);
    assert!(store.all_payments().await.is_empty());

    // Routing again with the same result writes nothing new.
    engine.auto_match_transaction(2).await.unwrap();
    let audit = engine.audit_trail(2).await.unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, AuditAction::Review);
}

#[tokio::test]
async fn threshold_boundaries_are_inclusive() {
    // The seeded pair scores exactly 180.
    let cases = [
        (Thresholds::new(180, 150).unwrap(), RouteOutcome::Matched),
        (Thresholds::new(181, 180).unwrap(), RouteOutcome::Review),
        (Thresholds::new(200, 181).unwrap(), RouteOutcome::Unmatched),
    ];

    for (thresholds, expected) in cases {
        let store = InMemoryStore::new();
        seed_review_pair(&store).await;
        let engine = engine_with(
            &store,
            EngineConfig {
                thresholds,
                ..common::test_engine_config()
            },
        );

        let result = engine.auto_match_transaction(2).await.unwrap();
        assert_eq!(result.confidence, 180);
        assert_eq!(result.status, expected, "thresholds {:?}", thresholds);
    }
}

#[tokio::test]
async fn review_is_cleared_when_confidence_drops() {
    let store = InMemoryStore::new();
    seed_review_pair(&store).await;

    engine(&store).auto_match_transaction(2).await.unwrap();
    assert_eq!(current(&store, 2).await.status, TransactionStatus::Review);

    let strict = engine_with(
        &store,
        EngineConfig {
            thresholds: Thresholds::new(260, 200).unwrap(),
            ..common::test_engine_config()
        },
    );
    let result = strict.auto_match_transaction(2).await.unwrap();
    assert_eq!(result.status, RouteOutcome::Unmatched);

    let txn = current(&store, 2).await;
    assert_eq!(txn.status, TransactionStatus::Unmatched);
    assert_eq!(txn.confidence_score, None);
    assert_eq!(txn.matched_by, None);

    let actions: Vec<_> = strict
        .audit_trail(2)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(actions, vec![AuditAction::Review, AuditAction::Unmatch]);
}

#[tokio::test]
async fn no_candidates_leaves_transaction_untouched() {
    let store = InMemoryStore::new();
    store
        .seed_transaction(bank_transaction(5, 10, "75.00", "CASH", "UNKNOWN"))
        .await;
    let engine = engine(&store);

    let result = engine.auto_match_transaction(5).await.unwrap();

    assert_eq!(result.status, RouteOutcome::Unmatched);
    assert_eq!(result.confidence, 0);
    assert_eq!(result.message, "No candidate orders found");
    assert_eq!(current(&store, 5).await.status, TransactionStatus::Unmatched);
    assert!(store.all_audit_entries().await.is_empty());
    assert!(store.all_payments().await.is_empty());
}

#[tokio::test]
async fn scoring_is_deterministic() {
    let store = full_match_store().await;
    store
        .seed_order(order(2, 12, "101.00", "Jon", "Smyth", Some("INV-1002")))
        .await;
    let engine = engine(&store);

    let first = engine.suggestions(1, None).await.unwrap();
    let second = engine.suggestions(1, None).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].order.id, 1);
    assert_eq!(first[0].score, 300);
    assert!(first[0].flags.amount_exact && first[0].flags.reference_exact);
    assert!(first[1].score < first[0].score);
}

#[tokio::test]
async fn equal_scores_resolve_to_lowest_order_id() {
    let store = InMemoryStore::new();
    store
        .seed_transaction(bank_transaction(1, 10, "100.00", "INV-1001", "JOHN SMITH"))
        .await;
    store
        .seed_order(order(9, 10, "100.00", "John", "Smith", Some("INV-1001")))
        .await;
    store
        .seed_order(order(8, 10, "100.00", "John", "Smith", Some("INV-1001")))
        .await;
    let engine = engine(&store);

    let suggestions = engine.suggestions(1, Some(5)).await.unwrap();
    let ids: Vec<i64> = suggestions.iter().map(|s| s.order.id).collect();
    assert_eq!(ids, vec![8, 9]);

    let result = engine.auto_match_transaction(1).await.unwrap();
    assert_eq!(result.order_id, Some(8));
}

#[tokio::test]
async fn paid_orders_are_not_offered_again() {
    let store = full_match_store().await;
    store
        .seed_transaction(bank_transaction(2, 10, "100.00", "INV-1001", "JOHN SMITH"))
        .await;
    let engine = engine(&store);

    engine.auto_match_transaction(1).await.unwrap();
    let result = engine.auto_match_transaction(2).await.unwrap();

    assert_eq!(result.status, RouteOutcome::Unmatched);
    assert!(engine.suggestions(2, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn suggestions_follow_operator_eligibility() {
    let store = full_match_store().await;
    store
        .seed_transaction(bank_transaction(2, 10, "100.00", "INV-1001", "JOHN SMITH"))
        .await;
    let engine = engine(&store);

    engine
        .mark_duplicate(2, "imported twice", OPERATOR)
        .await
        .unwrap();
    let suggestions = engine.suggestions(2, None).await.unwrap();
    assert_eq!(suggestions.len(), 1);
    assert_eq!(suggestions[0].order.id, 1);

    engine.auto_match_transaction(1).await.unwrap();
    let err = engine.suggestions(1, None).await.unwrap_err();
    assert!(matches!(err, MatchError::AlreadyMatched { id: 1 }));
}

#[tokio::test]
async fn crowded_window_keeps_the_closest_candidates() {
    let store = InMemoryStore::new();
    store
        .seed_transaction(bank_transaction(1, 10, "20.00", "INV-9999", "JOHN SMITH"))
        .await;
    // Fifty near misses fill the default candidate limit on their own.
    for id in 1..=50 {
        store
            .seed_order(order(id, 10, "16.00", "Pat", "Lee", None))
            .await;
    }
    store
        .seed_order(order(51, 10, "20.00", "John", "Smith", Some("INV-9999")))
        .await;
    let engine = engine(&store);

    let suggestions = engine.suggestions(1, Some(1)).await.unwrap();
    assert_eq!(suggestions[0].order.id, 51);
    assert_eq!(suggestions[0].score, MAX_SCORE);

    let result = engine.auto_match_transaction(1).await.unwrap();
    assert_eq!(result.status, RouteOutcome::Matched);
    assert_eq!(result.order_id, Some(51));
}

#[tokio::test]
async fn failed_audit_append_rolls_back_the_match() {
    let store = full_match_store().await;
    let engine = engine(&store);

    store.faults().fail_audit_appends(true);
    let err = engine.auto_match_transaction(1).await.unwrap_err();
    assert!(matches!(err, MatchError::Unavailable(_)));
    assert!(err.is_retryable());

    let txn = current(&store, 1).await;
    assert_eq!(txn.status, TransactionStatus::Unmatched);
    assert_eq!(txn.payment_id, None);
    assert!(store.all_payments().await.is_empty());
    assert!(store.all_audit_entries().await.is_empty());

    // The same call succeeds once the store recovers.
    store.faults().fail_audit_appends(false);
    let result = engine.auto_match_transaction(1).await.unwrap();
    assert_eq!(result.status, RouteOutcome::Matched);
    assert_eq!(store.all_payments().await.len(), 1);
}

#[tokio::test]
async fn failed_status_update_leaves_no_payment() {
    let store = full_match_store().await;
    let engine = engine(&store);

    store.faults().fail_transaction_updates(true);
    assert!(engine.confirm_match(1, 1, OPERATOR).await.is_err());

    assert!(store.all_payments().await.is_empty());
    assert!(store.all_audit_entries().await.is_empty());
    assert_eq!(current(&store, 1).await.status, TransactionStatus::Unmatched);
}

#[tokio::test]
async fn slow_store_times_out_as_retryable() {
    let store = full_match_store().await;
    let engine = engine_with(
        &store,
        EngineConfig {
            store_timeout: Duration::from_millis(50),
            ..EngineConfig::default()
        },
    );

    store.faults().delay_reads(Duration::from_millis(300));
    let err = engine.auto_match_transaction(1).await.unwrap_err();

    assert!(matches!(err, MatchError::Timeout { .. }));
    assert_eq!(err.kind(), ErrorKind::Transient);
    assert!(err.is_retryable());

    store.faults().delay_reads(Duration::ZERO);
    assert_eq!(current(&store, 1).await.status, TransactionStatus::Unmatched);
}

#[tokio::test]
async fn concurrent_commits_yield_exactly_one_match() {
    let store = full_match_store().await;
    store
        .seed_order(order(2, 10, "100.00", "John", "Smith", Some("INV-2002")))
        .await;
    let engine = engine(&store);

    let first = engine.clone();
    let second = engine.clone();
    let (a, b) = tokio::join!(
        tokio::spawn(async move { first.confirm_match(1, 1, OPERATOR).await }),
        tokio::spawn(async move { second.confirm_match(1, 2, OPERATOR).await }),
    );
    let outcomes = [a.unwrap(), b.unwrap()];

    let successes = outcomes.iter().filter(|o| o.is_ok()).count();
    assert_eq!(successes, 1);
    for err in outcomes.iter().filter_map(|o| o.as_ref().err()) {
        assert!(matches!(
            err.kind(),
            ErrorKind::Conflict | ErrorKind::Precondition
        ));
    }

    let active: Vec<_> = store
        .all_payments()
        .await
        .into_iter()
        .filter(|p| !p.is_voided())
        .collect();
    assert_eq!(active.len(), 1);
    assert_eq!(current(&store, 1).await.order_id, Some(active[0].order_id));
}

#[tokio::test]
async fn confirm_match_records_operator_and_score() {
    let store = InMemoryStore::new();
    seed_review_pair(&store).await;
    let engine = engine(&store);

    let result = engine.confirm_match(2, 2, OPERATOR).await.unwrap();
    assert_eq!(result.status, RouteOutcome::Matched);
    assert_eq!(result.confidence, 180);

    let txn = current(&store, 2).await;
    assert_eq!(txn.matched_by, Some(MatchedBy::Manual));
    assert_eq!(txn.confidence_score, Some(180));

    let audit = engine.audit_trail(2).await.unwrap();
    assert_eq!(audit[0].action, AuditAction::ManualMatch);
    assert_eq!(audit[0].performed_by, OPERATOR);
}

#[tokio::test]
async fn confirm_match_validates_inputs() {
    let store = full_match_store().await;
    let engine = engine(&store);

    assert!(matches!(
        engine.confirm_match(1, 1, "  ").await,
        Err(MatchError::Validation(_))
    ));
    assert!(matches!(
        engine.confirm_match(1, 42, OPERATOR).await,
        Err(MatchError::OrderNotFound(42))
    ));
    assert!(matches!(
        engine.confirm_match(77, 1, OPERATOR).await,
        Err(MatchError::TransactionNotFound(77))
    ));
    assert!(store.all_payments().await.is_empty());
}

#[tokio::test]
async fn void_then_rematch_by_operator() {
    let store = full_match_store().await;
    let engine = engine(&store);

    let matched = engine.auto_match_transaction(1).await.unwrap();
    let voided = engine
        .void_match(1, "bank reversed the deposit", OPERATOR)
        .await
        .unwrap();

    assert_eq!(voided.status, TransactionStatus::Voided);
    assert_eq!(voided.order_id, None);
    assert_eq!(voided.payment_id, None);

    let payments = store.all_payments().await;
    assert_eq!(payments.len(), 1);
    assert_eq!(Some(payments[0].id), matched.payment_id);
    assert!(payments[0].is_voided());
    assert_eq!(
        payments[0].void_reason.as_deref(),
        Some("bank reversed the deposit")
    );

    // Automatic flows leave voided transactions alone.
    let err = engine.auto_match_transaction(1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);

    // The operator still gets ranked candidates for the voided line.
    let suggestions = engine.suggestions(1, None).await.unwrap();
    assert_eq!(suggestions[0].order.id, 1);
    assert_eq!(suggestions[0].score, MAX_SCORE);

    let rematched = engine.confirm_match(1, 1, OPERATOR).await.unwrap();
    assert_eq!(rematched.status, RouteOutcome::Matched);
    assert_ne!(rematched.payment_id, matched.payment_id);

    let actions: Vec<_> = engine
        .audit_trail(1)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(
        actions,
        vec![
            AuditAction::AutoMatch,
            AuditAction::Void,
            AuditAction::ManualMatch
        ]
    );
}

#[tokio::test]
async fn void_requires_a_matched_transaction() {
    let store = full_match_store().await;
    let engine = engine(&store);

    let err = engine
        .void_match(1, "not matched yet", OPERATOR)
        .await
        .unwrap_err();
    assert!(matches!(err, MatchError::InvalidStatus { .. }));

    let err = engine.void_match(1, "", OPERATOR).await.unwrap_err();
    assert!(matches!(err, MatchError::Validation(_)));
}

#[tokio::test]
async fn duplicates_leave_the_automatic_flow() {
    let store = full_match_store().await;
    let engine = engine(&store);

    let txn = engine
        .mark_duplicate(1, "same deposit imported twice", OPERATOR)
        .await
        .unwrap();
    assert_eq!(txn.status, TransactionStatus::Duplicate);

    let err = engine.auto_match_transaction(1).await.unwrap_err();
    assert!(matches!(
        err,
        MatchError::InvalidStatus {
            status: TransactionStatus::Duplicate,
            ..
        }
    ));

    let audit = store.audit_trail(1).await.unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, AuditAction::Duplicate);
    assert_eq!(
        audit[0].reason.as_deref(),
        Some("same deposit imported twice")
    );
}

#[tokio::test]
async fn audit_trail_of_unknown_transaction_is_not_found() {
    let store = InMemoryStore::new();
    let engine = engine(&store);

    assert!(matches!(
        engine.audit_trail(404).await,
        Err(MatchError::TransactionNotFound(404))
    ));
}
