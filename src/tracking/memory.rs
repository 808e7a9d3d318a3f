use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use chrono::Utc;
use tracing::debug;

use crate::broker::types::{EntityMessage, MessageStatus};
use crate::tracking::{MessageTracker, TrackingStats};

#[derive(Default)]
struct Indexes {
    by_id: HashMap<String, EntityMessage>,
    /// idempotency key -> latest message id
    by_key: HashMap<String, String>,
}

/// In-memory tracker, the default for single-instance deployments and tests.
#[derive(Default)]
pub struct InMemoryTracker {
    inner: Mutex<Indexes>,
}

impl InMemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn upsert(&self, message: &EntityMessage) -> Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("tracker lock poisoned"))?;
        inner
            .by_id
            .insert(message.message_id.clone(), message.clone());
        inner
            .by_key
            .insert(message.idempotency_key.clone(), message.message_id.clone());
        Ok(())
    }
}

#[async_trait::async_trait]
impl MessageTracker for InMemoryTracker {
    async fn track(&self, message: &EntityMessage) -> Result<()> {
        self.upsert(message)?;
        debug!(message_id = %message.message_id, "Message registered for tracking");
        Ok(())
    }

    async fn update(&self, message: &EntityMessage) -> Result<()> {
        self.upsert(message)?;
        debug!(
            message_id = %message.message_id,
            status = ?message.status,
            "Tracked message status updated"
        );
        Ok(())
    }

    async fn get_by_message_id(&self, message_id: &str) -> Result<Option<EntityMessage>> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("tracker lock poisoned"))?;
        Ok(inner.by_id.get(message_id).cloned())
    }

    async fn get_by_key(&self, idempotency_key: &str) -> Result<Option<EntityMessage>> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("tracker lock poisoned"))?;
        Ok(inner
            .by_key
            .get(idempotency_key)
            .and_then(|id| inner.by_id.get(id))
            .cloned())
    }

    async fn list(&self) -> Result<Vec<EntityMessage>> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("tracker lock poisoned"))?;
        Ok(inner.by_id.values().cloned().collect())
    }

    async fn remove(&self, message_id: &str) -> Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("tracker lock poisoned"))?;
        if let Some(message) = inner.by_id.remove(message_id) {
            // Only drop the key index if it still points at this message
            if inner.by_key.get(&message.idempotency_key) == Some(&message.message_id) {
                inner.by_key.remove(&message.idempotency_key);
            }
        }
        Ok(())
    }

    async fn clean_old(&self, max_age: chrono::Duration) -> Result<usize> {
        let cutoff = Utc::now() - max_age;
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("tracker lock poisoned"))?;

        let expired: Vec<EntityMessage> = inner
            .by_id
            .values()
            .filter(|m| m.status.is_terminal() && m.created_at < cutoff)
            .cloned()
            .collect();

        for message in &expired {
            inner.by_id.remove(&message.message_id);
            if inner.by_key.get(&message.idempotency_key) == Some(&message.message_id) {
                inner.by_key.remove(&message.idempotency_key);
            }
        }

        Ok(expired.len())
    }

    async fn statistics(&self) -> Result<TrackingStats> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("tracker lock poisoned"))?;

        let mut stats = TrackingStats {
            total: inner.by_id.len() as u64,
            ..Default::default()
        };
        for message in inner.by_id.values() {
            match message.status {
                MessageStatus::Pending => stats.pending += 1,
                MessageStatus::Processing => stats.processing += 1,
                MessageStatus::Completed => stats.completed += 1,
                MessageStatus::Failed => stats.failed += 1,
                MessageStatus::Duplicate => stats.duplicate += 1,
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NewBankEntity;

    fn payload() -> NewBankEntity {
        NewBankEntity {
            name: "Banco Test".to_string(),
            code: "999".to_string(),
            country: "Argentina".to_string(),
        }
    }

    #[tokio::test]
    async fn test_lookup_by_id_and_key_agree() {
        let tracker = InMemoryTracker::new();
        let msg = EntityMessage::new("key-1", &payload());
        tracker.track(&msg).await.unwrap();

        let by_id = tracker
            .get_by_message_id(&msg.message_id)
            .await
            .unwrap()
            .unwrap();
        let by_key = tracker.get_by_key("key-1").await.unwrap().unwrap();
        assert_eq!(by_id.message_id, by_key.message_id);
    }

    #[tokio::test]
    async fn test_key_index_is_last_write_wins() {
        let tracker = InMemoryTracker::new();
        let first = EntityMessage::new("key-1", &payload());
        let second = EntityMessage::new("key-1", &payload());
        tracker.track(&first).await.unwrap();
        tracker.track(&second).await.unwrap();

        let latest = tracker.get_by_key("key-1").await.unwrap().unwrap();
        assert_eq!(latest.message_id, second.message_id);
        // Both records remain reachable by message id
        assert!(tracker
            .get_by_message_id(&first.message_id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_clean_old_only_purges_terminal() {
        let tracker = InMemoryTracker::new();

        let mut done = EntityMessage::new("key-done", &payload());
        done.status = MessageStatus::Completed;
        done.created_at = Utc::now() - chrono::Duration::hours(2);
        tracker.track(&done).await.unwrap();

        let mut inflight = EntityMessage::new("key-inflight", &payload());
        inflight.status = MessageStatus::Processing;
        inflight.created_at = Utc::now() - chrono::Duration::hours(2);
        tracker.track(&inflight).await.unwrap();

        let removed = tracker.clean_old(chrono::Duration::hours(1)).await.unwrap();
        assert_eq!(removed, 1);
        // In-flight work is never purged by age
        assert!(tracker.get_by_key("key-inflight").await.unwrap().is_some());

        // Cleanup is idempotent
        let removed_again = tracker.clean_old(chrono::Duration::hours(1)).await.unwrap();
        assert_eq!(removed_again, 0);
    }

    #[tokio::test]
    async fn test_statistics_counts_by_status() {
        let tracker = InMemoryTracker::new();

        let pending = EntityMessage::new("k1", &payload());
        tracker.track(&pending).await.unwrap();

        let mut completed = EntityMessage::new("k2", &payload());
        completed.status = MessageStatus::Completed;
        tracker.track(&completed).await.unwrap();

        let stats = tracker.statistics().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 0);
    }
}
