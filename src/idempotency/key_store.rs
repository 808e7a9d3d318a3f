use std::collections::HashSet;
use std::sync::Mutex;

use anyhow::{Context, Result};
use sqlx::PgPool;

/// Durable record of claimed idempotency keys. This is the source of truth:
/// cache layers may be lost, the claim recorded here may not.
#[async_trait::async_trait]
pub trait IdempotencyKeyStore: Send + Sync {
    /// Atomically claim a key. Returns true when the key was newly claimed,
    /// false when it was already present (duplicate).
    async fn check_and_save(&self, key: &str) -> Result<bool>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Explicit cleanup; claimed keys otherwise persist.
    async fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory implementation used by default and in tests.
#[derive(Debug, Default)]
pub struct InMemoryKeyStore {
    keys: Mutex<HashSet<String>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl IdempotencyKeyStore for InMemoryKeyStore {
    async fn check_and_save(&self, key: &str) -> Result<bool> {
        let mut keys = self
            .keys
            .lock()
            .map_err(|_| anyhow::anyhow!("key store lock poisoned"))?;
        Ok(keys.insert(key.to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let keys = self
            .keys
            .lock()
            .map_err(|_| anyhow::anyhow!("key store lock poisoned"))?;
        Ok(keys.contains(key))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut keys = self
            .keys
            .lock()
            .map_err(|_| anyhow::anyhow!("key store lock poisoned"))?;
        keys.remove(key);
        Ok(())
    }
}

/// PostgreSQL implementation. The unique constraint on key_value makes the
/// claim atomic across service instances.
pub struct PostgresKeyStore {
    pool: PgPool,
}

impl PostgresKeyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl IdempotencyKeyStore for PostgresKeyStore {
    async fn check_and_save(&self, key: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO idempotency_keys (key_value)
            VALUES ($1)
            ON CONFLICT (key_value) DO NOTHING
            "#,
        )
        .bind(key)
        .execute(&self.pool)
        .await
        .context("Failed to claim idempotency key")?;

        Ok(result.rows_affected() > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let exists: (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM idempotency_keys WHERE key_value = $1)")
                .bind(key)
                .fetch_one(&self.pool)
                .await
                .context("Failed to check idempotency key")?;

        Ok(exists.0)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM idempotency_keys WHERE key_value = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .context("Failed to remove idempotency key")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_claim_wins() {
        let store = InMemoryKeyStore::new();

        assert!(store.check_and_save("k1").await.unwrap());
        assert!(!store.check_and_save("k1").await.unwrap());
        assert!(store.exists("k1").await.unwrap());
        assert!(!store.exists("k2").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_releases_key() {
        let store = InMemoryKeyStore::new();

        store.check_and_save("k1").await.unwrap();
        store.remove("k1").await.unwrap();
        assert!(store.check_and_save("k1").await.unwrap());
    }
}
