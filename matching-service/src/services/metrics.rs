//! Prometheus metrics for matching-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram, register_histogram_vec, CounterVec, Encoder,
    Histogram, HistogramTimer, HistogramVec, TextEncoder,
};

/// Histogram for store query duration by operation.
static DB_QUERY_DURATION: Lazy<Option<HistogramVec>> = Lazy::new(|| {
    register_histogram_vec!(
        "matching_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .map_err(|e| tracing::warn!(error = %e, "Failed to register DB_QUERY_DURATION"))
    .ok()
});

/// Counter for routing outcomes (matched, review, unmatched).
static MATCH_OUTCOMES: Lazy<Option<CounterVec>> = Lazy::new(|| {
    register_counter_vec!(
        "matching_outcomes_total",
        "Total number of routing outcomes",
        &["outcome", "matched_by"]
    )
    .map_err(|e| tracing::warn!(error = %e, "Failed to register MATCH_OUTCOMES"))
    .ok()
});

/// Histogram of winning confidence scores.
static CONFIDENCE_SCORES: Lazy<Option<Histogram>> = Lazy::new(|| {
    register_histogram!(
        "matching_confidence_score",
        "Best candidate confidence score per routed transaction",
        vec![0.0, 50.0, 100.0, 150.0, 175.0, 200.0, 225.0, 250.0, 275.0, 300.0]
    )
    .map_err(|e| tracing::warn!(error = %e, "Failed to register CONFIDENCE_SCORES"))
    .ok()
});

/// Counter for operator actions (confirm, reassign, void, duplicate).
static OPERATOR_ACTIONS: Lazy<Option<CounterVec>> = Lazy::new(|| {
    register_counter_vec!(
        "matching_operator_actions_total",
        "Total number of operator actions",
        &["action", "status"]
    )
    .map_err(|e| tracing::warn!(error = %e, "Failed to register OPERATOR_ACTIONS"))
    .ok()
});

/// Counter for batch runs and the items they processed.
static BATCH_ITEMS: Lazy<Option<CounterVec>> = Lazy::new(|| {
    register_counter_vec!(
        "matching_batch_items_total",
        "Total number of transactions processed by batch runs",
        &["batch", "outcome"]
    )
    .map_err(|e| tracing::warn!(error = %e, "Failed to register BATCH_ITEMS"))
    .ok()
});

/// Counter for errors by kind.
static ERRORS: Lazy<Option<CounterVec>> = Lazy::new(|| {
    register_counter_vec!(
        "matching_errors_total",
        "Total number of errors",
        &["error_type"]
    )
    .map_err(|e| tracing::warn!(error = %e, "Failed to register ERRORS"))
    .ok()
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&MATCH_OUTCOMES);
    Lazy::force(&CONFIDENCE_SCORES);
    Lazy::force(&OPERATOR_ACTIONS);
    Lazy::force(&BATCH_ITEMS);
    Lazy::force(&ERRORS);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Start timing a store operation; the duration is recorded when the timer drops.
pub fn db_timer(operation: &str) -> Option<HistogramTimer> {
    DB_QUERY_DURATION
        .as_ref()
        .map(|h| h.with_label_values(&[operation]).start_timer())
}

/// Record where a transaction was routed and the score that decided it.
pub fn record_match_outcome(outcome: &str, matched_by: &str, score: Option<u32>) {
    if let Some(counter) = MATCH_OUTCOMES.as_ref() {
        counter.with_label_values(&[outcome, matched_by]).inc();
    }
    if let (Some(histogram), Some(score)) = (CONFIDENCE_SCORES.as_ref(), score) {
        histogram.observe(f64::from(score));
    }
}

/// Record an operator action.
pub fn record_operator_action(action: &str, status: &str) {
    if let Some(counter) = OPERATOR_ACTIONS.as_ref() {
        counter.with_label_values(&[action, status]).inc();
    }
}

/// Record the items a batch run processed, per outcome.
pub fn record_batch_items(batch: &str, outcome: &str, count: usize) {
    if count == 0 {
        return;
    }
    if let Some(counter) = BATCH_ITEMS.as_ref() {
        counter
            .with_label_values(&[batch, outcome])
            .inc_by(count as f64);
    }
}

/// Record an error.
pub fn record_error(error_type: &str) {
    if let Some(counter) = ERRORS.as_ref() {
        counter.with_label_values(&[error_type]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exported_text_includes_recorded_outcomes() {
        init_metrics();
        record_match_outcome("matched", "AUTO", Some(280));
        record_operator_action("reassign", "success");
        record_batch_items("auto_match", "review", 2);
        record_error("conflict");
        drop(db_timer("unit_test"));

        let text = get_metrics();
        assert!(text.contains("matching_outcomes_total"));
        assert!(text.contains("matching_operator_actions_total"));
        assert!(text.contains("matching_db_query_duration_seconds"));
    }
}
