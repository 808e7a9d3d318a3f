use std::sync::Arc;

use anyhow::Result;
use redis::AsyncCommands;
use tracing::{debug, warn};

use crate::config::RedisConfig;
use crate::idempotency::key_store::IdempotencyKeyStore;

/// TTL-bound cache of claimed idempotency keys, consulted before the durable
/// store. A probe returning `None` means "cache miss or cache unavailable";
/// callers must then fall back to the durable store. The cache can never
/// produce a false negative that allows a duplicate create, because a miss
/// always defers to the durable store.
#[async_trait::async_trait]
pub trait IdempotencyCache: Send + Sync {
    /// `Some(true)` on a cache hit for a claimed key, `None` on miss or
    /// cache failure.
    async fn probe(&self, key: &str) -> Option<bool>;

    /// Record a claimed key. Best-effort: failures are logged, not surfaced.
    async fn store(&self, key: &str);

    /// Drop a key from the cache. Best-effort.
    async fn invalidate(&self, key: &str);
}

/// Redis-backed cache. Key pattern: "{prefix}{idempotency_key}" with a TTL.
pub struct RedisIdempotencyCache {
    conn: redis::aio::ConnectionManager,
    prefix: String,
    ttl_secs: u64,
}

impl RedisIdempotencyCache {
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        let conn = client.get_connection_manager().await?;
        Ok(Self {
            conn,
            prefix: config.idempotency_prefix.clone(),
            ttl_secs: config.idempotency_ttl_secs,
        })
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait::async_trait]
impl IdempotencyCache for RedisIdempotencyCache {
    async fn probe(&self, key: &str) -> Option<bool> {
        let mut conn = self.conn.clone();
        match conn.exists::<_, bool>(self.redis_key(key)).await {
            Ok(true) => {
                debug!(key = %key, "Idempotency cache hit");
                Some(true)
            }
            Ok(false) => {
                debug!(key = %key, "Idempotency cache miss");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Idempotency cache probe failed, falling back to durable store");
                None
            }
        }
    }

    async fn store(&self, key: &str) {
        let mut conn = self.conn.clone();
        if let Err(e) = conn
            .set_ex::<_, _, ()>(self.redis_key(key), "1", self.ttl_secs)
            .await
        {
            warn!(key = %key, error = %e, "Failed to cache idempotency key (not critical)");
        }
    }

    async fn invalidate(&self, key: &str) {
        let mut conn = self.conn.clone();
        if let Err(e) = conn.del::<_, ()>(self.redis_key(key)).await {
            warn!(key = %key, error = %e, "Failed to invalidate cached idempotency key");
        }
    }
}

/// Cache-aside composition of a durable key store and a cache.
///
/// Reads probe the cache first and fall back to the durable store on a miss.
/// Claims go to the durable store first; the cache is populated only after
/// the durable write succeeded, so the durable store stays ground truth.
pub struct CachedKeyStore {
    inner: Arc<dyn IdempotencyKeyStore>,
    cache: Arc<dyn IdempotencyCache>,
}

impl CachedKeyStore {
    pub fn new(inner: Arc<dyn IdempotencyKeyStore>, cache: Arc<dyn IdempotencyCache>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait::async_trait]
impl IdempotencyKeyStore for CachedKeyStore {
    async fn check_and_save(&self, key: &str) -> Result<bool> {
        let claimed = self.inner.check_and_save(key).await?;
        if claimed {
            self.cache.store(key).await;
        }
        Ok(claimed)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        if let Some(true) = self.cache.probe(key).await {
            return Ok(true);
        }
        let exists = self.inner.exists(key).await?;
        if exists {
            // Repopulate so the next probe hits
            self.cache.store(key).await;
        }
        Ok(exists)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.inner.remove(key).await?;
        self.cache.invalidate(key).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::key_store::InMemoryKeyStore;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Cache double that can simulate an outage.
    #[derive(Default)]
    struct TestCache {
        keys: Mutex<HashSet<String>>,
        down: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl IdempotencyCache for TestCache {
        async fn probe(&self, key: &str) -> Option<bool> {
            if self.down.load(std::sync::atomic::Ordering::SeqCst) {
                return None;
            }
            let keys = self.keys.lock().unwrap();
            if keys.contains(key) {
                Some(true)
            } else {
                None
            }
        }

        async fn store(&self, key: &str) {
            if !self.down.load(std::sync::atomic::Ordering::SeqCst) {
                self.keys.lock().unwrap().insert(key.to_string());
            }
        }

        async fn invalidate(&self, key: &str) {
            self.keys.lock().unwrap().remove(key);
        }
    }

    #[tokio::test]
    async fn test_claim_populates_cache() {
        let cache = Arc::new(TestCache::default());
        let store = CachedKeyStore::new(Arc::new(InMemoryKeyStore::new()), cache.clone());

        assert!(store.check_and_save("k1").await.unwrap());
        assert_eq!(cache.probe("k1").await, Some(true));
        assert!(!store.check_and_save("k1").await.unwrap());
    }

    #[tokio::test]
    async fn test_cache_outage_falls_back_to_durable_store() {
        let cache = Arc::new(TestCache::default());
        let store = CachedKeyStore::new(Arc::new(InMemoryKeyStore::new()), cache.clone());

        store.check_and_save("k1").await.unwrap();
        cache.down.store(true, std::sync::atomic::Ordering::SeqCst);

        // Cache is unavailable; the durable store still answers
        assert!(store.exists("k1").await.unwrap());
        assert!(!store.check_and_save("k1").await.unwrap());
    }

    #[tokio::test]
    async fn test_cache_loss_never_allows_duplicate() {
        let cache = Arc::new(TestCache::default());
        let store = CachedKeyStore::new(Arc::new(InMemoryKeyStore::new()), cache.clone());

        store.check_and_save("k1").await.unwrap();
        // Simulate full cache eviction
        cache.invalidate("k1").await;

        assert!(store.exists("k1").await.unwrap());
        assert!(!store.check_and_save("k1").await.unwrap());
    }
}
