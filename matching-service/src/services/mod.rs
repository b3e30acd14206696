//! Services module for matching-service.

pub mod metrics;

pub use metrics::{
    db_timer, get_metrics, init_metrics, record_batch_items, record_error, record_match_outcome,
    record_operator_action,
};
