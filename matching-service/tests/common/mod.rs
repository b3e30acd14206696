//! Common test utilities for matching-service integration tests.

#![allow(dead_code)]

use chrono::{NaiveDate, Utc};
use matching_service::config::EngineConfig;
use matching_service::engine::MatchingEngine;
use matching_service::models::{BankTransaction, Order, TransactionStatus, TransactionType};
use matching_service::startup::Application;
use matching_service::store::{InMemoryStore, ReconciliationStore};
use rust_decimal::Decimal;
use service_core::config::Config as CommonConfig;
use service_core::observability::init_test_tracing;
use std::sync::Arc;
use std::time::Duration;

pub const OPERATOR: &str = "ops@example.com";

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    init_test_tracing("info,matching_service=debug");
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid test date")
}

pub fn money(raw: &str) -> Decimal {
    raw.parse().expect("valid test amount")
}

/// Unmatched bank line dated in January 2025.
pub fn bank_transaction(
    id: i64,
    day: u32,
    amount: &str,
    reference: &str,
    name: &str,
) -> BankTransaction {
    BankTransaction {
        id,
        transaction_date: date(2025, 1, day),
        transaction_time: None,
        reference: reference.to_string(),
        name: name.to_string(),
        description: None,
        transaction_type: TransactionType::RetailCustomer,
        amount: money(amount),
        status: TransactionStatus::Unmatched,
        order_id: None,
        payment_id: None,
        confidence_score: None,
        matched_by: None,
        matched_at: None,
        created_at: Utc::now(),
    }
}

/// Completed order dated in January 2025.
pub fn order(
    id: i64,
    day: u32,
    total: &str,
    first_name: &str,
    last_name: &str,
    invoice: Option<&str>,
) -> Order {
    Order {
        id,
        total_price: money(total),
        order_date: date(2025, 1, day),
        customer_first_name: first_name.to_string(),
        customer_last_name: last_name.to_string(),
        outlet_name: Some("Newmarket".to_string()),
        invoice_number: invoice.map(str::to_string),
        status: "completed".to_string(),
    }
}

pub fn test_engine_config() -> EngineConfig {
    EngineConfig {
        store_timeout: Duration::from_secs(2),
        ..EngineConfig::default()
    }
}

pub fn engine(store: &InMemoryStore) -> MatchingEngine {
    engine_with(store, test_engine_config())
}

pub fn engine_with(store: &InMemoryStore, config: EngineConfig) -> MatchingEngine {
    init_tracing();
    MatchingEngine::new(Arc::new(store.clone()), config)
}

/// Store holding the canonical full-match pair: transaction 1 and order 1
/// agree on amount, date, invoice and name (score 300).
pub async fn full_match_store() -> InMemoryStore {
    let store = InMemoryStore::new();
    store
        .seed_transaction(bank_transaction(1, 10, "100.00", "INV-1001", "JOHN SMITH"))
        .await;
    store
        .seed_order(order(1, 10, "100.00", "John", "Smith", Some("INV-1001")))
        .await;
    store
}

pub async fn current(store: &InMemoryStore, id: i64) -> BankTransaction {
    store
        .get_transaction(id)
        .await
        .expect("store read")
        .expect("transaction exists")
}

/// Test application wrapper.
pub struct TestApp {
    pub address: String,
    pub http_port: u16,
    pub store: InMemoryStore,
    pub client: reqwest::Client,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }
}

/// Spawn the HTTP application on an ephemeral port over `store`.
pub async fn spawn_app(store: InMemoryStore) -> TestApp {
    init_tracing();

    let app = Application::build_with_store(
        CommonConfig::with_port(0),
        test_engine_config(),
        Arc::new(store.clone()),
    )
    .await
    .expect("Failed to build application");

    let http_port = app.http_port();

    // The listener is already bound, so requests queue until the server runs.
    tokio::spawn(async move {
        app.run_until_stopped(std::future::pending()).await.ok();
    });

    TestApp {
        address: format!("http://127.0.0.1:{}", http_port),
        http_port,
        store,
        client: reqwest::Client::new(),
    }
}
