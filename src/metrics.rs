use once_cell::sync::Lazy;
use prometheus::{opts, register_int_counter, Encoder, IntCounter, TextEncoder};

use crate::error::{AppError, AppResult};

// Synchronous creation path
pub static ENTITIES_CREATED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "keystone_entities_created_total",
        "Entities created through the synchronous endpoint"
    ))
    .expect("metric registration")
});

pub static DUPLICATES_REJECTED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "keystone_duplicates_rejected_total",
        "Synchronous requests rejected as idempotent duplicates"
    ))
    .expect("metric registration")
});

pub static LOCK_TIMEOUTS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "keystone_lock_timeouts_total",
        "Requests that timed out waiting for a per-key lock"
    ))
    .expect("metric registration")
});

// Asynchronous pipeline
pub static MESSAGES_PUBLISHED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "keystone_messages_published_total",
        "Creation requests published to the broker"
    ))
    .expect("metric registration")
});

pub static MESSAGES_CONSUMED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "keystone_messages_consumed_total",
        "Creation requests consumed from the broker"
    ))
    .expect("metric registration")
});

pub static MESSAGES_COMPLETED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "keystone_messages_completed_total",
        "Consumed requests that created an entity"
    ))
    .expect("metric registration")
});

pub static MESSAGES_DUPLICATE: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "keystone_messages_duplicate_total",
        "Consumed requests settled as duplicates"
    ))
    .expect("metric registration")
});

pub static MESSAGES_FAILED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "keystone_messages_failed_total",
        "Consumed requests that settled as failed"
    ))
    .expect("metric registration")
});

/// Render all registered metrics in the Prometheus text format.
pub fn gather_metrics() -> AppResult<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| AppError::internal(format!("failed to encode metrics: {e}")))?;
    String::from_utf8(buffer).map_err(|e| AppError::internal(format!("metrics not UTF-8: {e}")))
}
