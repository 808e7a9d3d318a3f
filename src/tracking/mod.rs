// Tracking of asynchronously submitted creation requests. Records advance
// through Pending -> Processing -> {Completed, Failed, Duplicate} and are
// queryable by message id or idempotency key.

pub mod memory;
pub mod redis;

use anyhow::Result;
use serde::Serialize;

use crate::broker::types::EntityMessage;

pub use memory::InMemoryTracker;
pub use redis::RedisTracker;

/// Per-status counts for monitoring.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrackingStats {
    pub total: u64,
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub duplicate: u64,
}

/// State-machine store for tracked messages.
///
/// Lookups are indexed both by message id and by idempotency key. When a key
/// is resubmitted under a new message id the key index points at the latest
/// message (last-write-wins); this store is a status view, not a historical
/// log.
#[async_trait::async_trait]
pub trait MessageTracker: Send + Sync {
    /// Register a newly accepted message (status Pending).
    async fn track(&self, message: &EntityMessage) -> Result<()>;

    /// Record a status advance made by the consumer.
    async fn update(&self, message: &EntityMessage) -> Result<()>;

    async fn get_by_message_id(&self, message_id: &str) -> Result<Option<EntityMessage>>;

    async fn get_by_key(&self, idempotency_key: &str) -> Result<Option<EntityMessage>>;

    async fn list(&self) -> Result<Vec<EntityMessage>>;

    async fn remove(&self, message_id: &str) -> Result<()>;

    /// Purge terminal messages older than `max_age`. Pending and Processing
    /// records represent in-flight work and are never purged by age.
    /// Returns the number of removed records.
    async fn clean_old(&self, max_age: chrono::Duration) -> Result<usize>;

    async fn statistics(&self) -> Result<TrackingStats>;
}
