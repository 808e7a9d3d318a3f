// Idempotency core: durable key claims, the cache-aside layer in front of
// them, and the per-key locking coordinator that serializes concurrent
// submissions of the same key.

pub mod cache;
pub mod coordinator;
pub mod key_store;
mod lock;

pub use cache::{CachedKeyStore, IdempotencyCache, RedisIdempotencyCache};
pub use coordinator::{CoordinatorStats, IdempotencyCoordinator, WorkError};
pub use key_store::{IdempotencyKeyStore, InMemoryKeyStore, PostgresKeyStore};
