//! Configuration module for matching-service.

use crate::engine::candidates::CandidateWindow;
use crate::engine::router::Thresholds;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MatchingConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Everything the engine needs to decide and commit matches.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub thresholds: Thresholds,
    pub window: CandidateWindow,
    /// Upper bound for any single store call or atomic unit.
    pub store_timeout: Duration,
    pub suggestion_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            window: CandidateWindow::default(),
            store_timeout: Duration::from_millis(5_000),
            suggestion_limit: 5,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();

        let thresholds = Thresholds::new(
            env_or("MATCH_AUTO_THRESHOLD", defaults.thresholds.auto())?,
            env_or("MATCH_REVIEW_THRESHOLD", defaults.thresholds.review())?,
        )
        .map_err(|e| AppError::ConfigError(anyhow::Error::new(e)))?;

        let window = CandidateWindow {
            date_window_days: env_or("MATCH_DATE_WINDOW_DAYS", defaults.window.date_window_days)?,
            amount_tolerance: env_or("MATCH_AMOUNT_TOLERANCE", defaults.window.amount_tolerance)?,
            amount_tolerance_pct: env_or(
                "MATCH_AMOUNT_TOLERANCE_PCT",
                defaults.window.amount_tolerance_pct,
            )?,
            candidate_limit: env_or("MATCH_CANDIDATE_LIMIT", defaults.window.candidate_limit)?,
            outlet_scope: env_list("MATCH_OUTLET_SCOPE").unwrap_or(defaults.window.outlet_scope),
            excluded_order_statuses: env_list("MATCH_EXCLUDED_ORDER_STATUSES")
                .unwrap_or(defaults.window.excluded_order_statuses),
        };
        window
            .validate()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let timeout_ms: u64 = env_or("MATCH_STORE_TIMEOUT_MS", 5_000)?;
        if timeout_ms == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "MATCH_STORE_TIMEOUT_MS must be greater than zero"
            )));
        }

        Ok(Self {
            thresholds,
            window,
            store_timeout: Duration::from_millis(timeout_ms),
            suggestion_limit: env_or("MATCH_SUGGESTION_LIMIT", defaults.suggestion_limit)?,
        })
    }
}

impl MatchingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "matching-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: env_or("DATABASE_MIN_CONNECTIONS", 2)?,
            },
            engine: EngineConfig::from_env()?,
        })
    }
}

/// Read `key`, falling back to `default` when unset. A value that is set but
/// does not parse is a configuration error rather than a silent default.
fn env_or<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("{} has invalid value '{}': {}", key, raw, e))
        }),
        _ => Ok(default),
    }
}

fn env_list(key: &str) -> Option<Vec<String>> {
    env::var(key).ok().map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
}
