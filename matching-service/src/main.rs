//! Matching service entry point.

use matching_service::config::MatchingConfig;
use matching_service::startup::Application;

use service_core::observability::{init_tracing, shutdown_tracing};
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = MatchingConfig::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        version = %config.service_version,
        otlp_endpoint = ?config.otlp_endpoint,
        "Starting matching-service"
    );

    tracing::info!(
        service_name = %config.service_name,
        http_port = %config.common.port,
        db_max_connections = %config.database.max_connections,
        db_min_connections = %config.database.min_connections,
        auto_threshold = config.engine.thresholds.auto(),
        review_threshold = config.engine.thresholds.review(),
        date_window_days = config.engine.window.date_window_days,
        store_timeout_ms = config.engine.store_timeout.as_millis() as u64,
        "Configuration loaded"
    );

    let grace = Duration::from_secs(config.common.shutdown_grace_secs);
    let app = Application::build(config).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to build application");
        std::io::Error::other(format!("Application build error: {}", e))
    })?;

    let stop = CancellationToken::new();
    let mut server = tokio::spawn(app.run_until_stopped(stop.clone().cancelled_owned()));

    let result = tokio::select! {
        joined = &mut server => joined,
        _ = shutdown_signal() => {
            stop.cancel();
            match tokio::time::timeout(grace, &mut server).await {
                Ok(joined) => joined,
                Err(_) => {
                    tracing::warn!(
                        grace_secs = grace.as_secs(),
                        "In-flight requests did not drain in time"
                    );
                    server.abort();
                    Ok(Ok(()))
                }
            }
        }
    };

    let outcome = match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Application error");
            Err(e)
        }
        Err(e) => {
            tracing::error!(error = %e, "Server task failed");
            Err(std::io::Error::other(e))
        }
    };

    tracing::info!("Service shutdown complete");
    shutdown_tracing();
    outcome
}
