use anyhow::{Context, Result};
use chrono::Utc;
use redis::AsyncCommands;
use tracing::{debug, warn};

use crate::broker::types::{EntityMessage, MessageStatus};
use crate::config::RedisConfig;
use crate::tracking::{MessageTracker, TrackingStats};

/// Redis-backed tracker for multi-instance deployments.
///
/// Key patterns:
/// - "{message_id_prefix}{message_id}" -> EntityMessage (JSON), TTL-bound
/// - "{message_key_prefix}{idempotency_key}" -> message id, TTL-bound
///
/// TTLs make age-based cleanup a safety net rather than the only defense
/// against unbounded growth.
pub struct RedisTracker {
    conn: redis::aio::ConnectionManager,
    id_prefix: String,
    key_prefix: String,
    ttl_secs: u64,
}

impl RedisTracker {
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        let conn = client.get_connection_manager().await?;
        Ok(Self {
            conn,
            id_prefix: config.message_id_prefix.clone(),
            key_prefix: config.message_key_prefix.clone(),
            ttl_secs: config.tracking_ttl_secs,
        })
    }

    fn id_key(&self, message_id: &str) -> String {
        format!("{}{}", self.id_prefix, message_id)
    }

    fn key_index(&self, idempotency_key: &str) -> String {
        format!("{}{}", self.key_prefix, idempotency_key)
    }

    async fn scan_messages(&self) -> Result<Vec<EntityMessage>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", self.id_prefix);
        let keys: Vec<String> = {
            let mut iter = conn
                .scan_match::<_, String>(pattern)
                .await
                .context("Failed to scan tracked messages")?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        let mut messages = Vec::with_capacity(keys.len());
        for key in keys {
            let raw: Option<String> = conn.get(&key).await?;
            if let Some(raw) = raw {
                match serde_json::from_str::<EntityMessage>(&raw) {
                    Ok(message) => messages.push(message),
                    Err(e) => warn!(key = %key, error = %e, "Skipping unparsable tracked message"),
                }
            }
        }
        Ok(messages)
    }

    async fn write(&self, message: &EntityMessage, ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(message)?;
        conn.set_ex::<_, _, ()>(self.id_key(&message.message_id), raw, ttl_secs)
            .await
            .context("Failed to store tracked message")?;
        conn.set_ex::<_, _, ()>(
            self.key_index(&message.idempotency_key),
            message.message_id.clone(),
            ttl_secs,
        )
        .await
        .context("Failed to store key index")?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl MessageTracker for RedisTracker {
    async fn track(&self, message: &EntityMessage) -> Result<()> {
        self.write(message, self.ttl_secs).await?;
        debug!(message_id = %message.message_id, ttl = self.ttl_secs, "Message registered in Redis");
        Ok(())
    }

    async fn update(&self, message: &EntityMessage) -> Result<()> {
        // Preserve the remaining TTL so updates don't extend a record's life
        let mut conn = self.conn.clone();
        let remaining: i64 = conn.ttl(self.id_key(&message.message_id)).await.unwrap_or(-1);
        let ttl = if remaining > 0 {
            remaining as u64
        } else {
            self.ttl_secs
        };
        self.write(message, ttl).await?;
        debug!(
            message_id = %message.message_id,
            status = ?message.status,
            "Tracked message updated in Redis"
        );
        Ok(())
    }

    async fn get_by_message_id(&self, message_id: &str) -> Result<Option<EntityMessage>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(self.id_key(message_id))
            .await
            .context("Failed to read tracked message")?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn get_by_key(&self, idempotency_key: &str) -> Result<Option<EntityMessage>> {
        let mut conn = self.conn.clone();
        let message_id: Option<String> = conn
            .get(self.key_index(idempotency_key))
            .await
            .context("Failed to read key index")?;
        match message_id {
            Some(id) => self.get_by_message_id(&id).await,
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<EntityMessage>> {
        self.scan_messages().await
    }

    async fn remove(&self, message_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        if let Some(message) = self.get_by_message_id(message_id).await? {
            let indexed: Option<String> = conn.get(self.key_index(&message.idempotency_key)).await?;
            if indexed.as_deref() == Some(message_id) {
                conn.del::<_, ()>(self.key_index(&message.idempotency_key))
                    .await?;
            }
        }
        conn.del::<_, ()>(self.id_key(message_id)).await?;
        Ok(())
    }

    async fn clean_old(&self, max_age: chrono::Duration) -> Result<usize> {
        let cutoff = Utc::now() - max_age;
        let mut removed = 0;
        for message in self.scan_messages().await? {
            if message.status.is_terminal() && message.created_at < cutoff {
                self.remove(&message.message_id).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn statistics(&self) -> Result<TrackingStats> {
        let mut stats = TrackingStats::default();
        for message in self.scan_messages().await? {
            stats.total += 1;
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
