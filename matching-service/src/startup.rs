//! Application startup and lifecycle management.

use crate::config::{EngineConfig, MatchingConfig};
use crate::engine::MatchingEngine;
use crate::handlers::{self, batches, transactions};
use crate::services::{get_metrics, init_metrics};
use crate::store::{PgStore, ReconciliationStore};
use axum::{
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use service_core::config::Config;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: MatchingEngine,
    /// Cancelled on shutdown; running batches stop between items.
    pub shutdown: CancellationToken,
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    let metrics = get_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        metrics,
    )
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application against Postgres, applying migrations.
    pub async fn build(config: MatchingConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this when the schema is managed outside the service.
    pub async fn build_without_migrations(config: MatchingConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(config: MatchingConfig, run_migrations: bool) -> Result<Self, AppError> {
        let store = PgStore::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            store.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        Self::build_with_store(config.common, config.engine, Arc::new(store)).await
    }

    /// Build the application on top of any store. Tests pass the in-memory
    /// store and port 0.
    pub async fn build_with_store(
        common: Config,
        engine_config: EngineConfig,
        store: Arc<dyn ReconciliationStore>,
    ) -> Result<Self, AppError> {
        init_metrics();

        let state = AppState {
            engine: MatchingEngine::new(store, engine_config),
            shutdown: CancellationToken::new(),
        };

        let http_addr = SocketAddr::from(([0, 0, 0, 0], common.port));
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(http_port, "Matching service listener bound");

        Ok(Self {
            http_port,
            http_listener,
            state,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn engine(&self) -> &MatchingEngine {
        &self.state.engine
    }

    /// Token cancelled when the server shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    fn router(state: AppState) -> Router {
        Router::new()
            .route("/health", get(handlers::health_check))
            .route("/ready", get(handlers::readiness_check))
            .route("/metrics", get(metrics_handler))
            .route(
                "/v1/transactions/:id/auto-match",
                post(transactions::auto_match),
            )
            .route(
                "/v1/transactions/:id/suggestions",
                get(transactions::suggestions),
            )
            .route(
                "/v1/transactions/:id/confirm",
                post(transactions::confirm_match),
            )
            .route(
                "/v1/transactions/:id/reassign",
                post(transactions::reassign),
            )
            .route("/v1/transactions/:id/void", post(transactions::void_match))
            .route(
                "/v1/transactions/:id/duplicate",
                post(transactions::mark_duplicate),
            )
            .route("/v1/transactions/:id/audit", get(transactions::audit_trail))
            .route("/v1/batches/auto-match", post(batches::auto_match_batch))
            .route(
                "/v1/batches/send-to-review",
                post(batches::send_to_review_batch),
            )
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(metrics_middleware))
            .layer(middleware::from_fn(request_id_middleware))
            .with_state(state)
    }

    /// Serve until `shutdown` resolves, then cancel running batches and
    /// drain in-flight requests.
    pub async fn run_until_stopped<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let token = self.state.shutdown.clone();
        let router = Self::router(self.state);

        tracing::info!(
            service = "matching-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            "Service ready to accept connections"
        );

        axum::serve(self.http_listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                token.cancel();
            })
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "HTTP server error");
                std::io::Error::other(format!("HTTP server error: {}", e))
            })
    }
}
