use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::{parse_idempotency_key, BankEntity, CreationResult, FailureKind};
use crate::error::AppError;
use crate::idempotency::lock::LockTable;

/// Why a unit of creation work did not produce an entity.
#[derive(Debug)]
pub enum WorkError {
    /// The durable store already holds this key (or the entity id); the
    /// submission is a duplicate, not a failure.
    AlreadyClaimed(String),
    /// The creation step itself failed.
    Failed(AppError),
}

impl From<AppError> for WorkError {
    fn from(err: AppError) -> Self {
        WorkError::Failed(err)
    }
}

impl From<anyhow::Error> for WorkError {
    fn from(err: anyhow::Error) -> Self {
        WorkError::Failed(AppError::Unknown(err))
    }
}

#[derive(Debug, Clone)]
struct CachedSuccess {
    entity: BankEntity,
    cached_at: Instant,
}

/// Per-key statistics for monitoring.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorStats {
    pub cached_results: usize,
    pub active_locks: usize,
}

/// The synchronous fast-path gate: serializes concurrent submissions of the
/// same idempotency key behind a fair per-key lock and replays cached
/// outcomes for keys that already succeeded.
pub struct IdempotencyCoordinator {
    locks: LockTable,
    results: Mutex<HashMap<String, CachedSuccess>>,
    lock_wait: Duration,
}

impl IdempotencyCoordinator {
    pub fn new(lock_wait: Duration) -> Self {
        Self {
            locks: LockTable::new(),
            results: Mutex::new(HashMap::new()),
            lock_wait,
        }
    }

    /// Run `work` at most once for `key`, holding the per-key lock.
    ///
    /// - An invalid key is rejected before any lock is taken.
    /// - Lock acquisition waits at most the configured bound; a timeout is a
    ///   terminal failed outcome for this attempt only.
    /// - A cached prior success short-circuits to a duplicate outcome
    ///   without invoking `work`: the entity was already created once, and
    ///   only the first submission may observe `Created`.
    /// - Only successful outcomes are cached; failures stay retryable under
    ///   a later submission attempt.
    pub async fn process<F, Fut>(&self, key: &str, work: F) -> CreationResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<BankEntity, WorkError>>,
    {
        if let Err(e) = parse_idempotency_key(key) {
            return CreationResult::Failed {
                kind: FailureKind::InvalidKey,
                message: e.to_string(),
            };
        }

        let lock = self.locks.checkout(key);
        let guard = match tokio::time::timeout(self.lock_wait, lock.gate.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                self.locks.release(key, &lock);
                warn!(key = %key, wait = ?self.lock_wait, "Could not acquire per-key lock");
                return CreationResult::Failed {
                    kind: FailureKind::LockTimeout,
                    message: "lock timeout".to_string(),
                };
            }
        };

        // Double-check inside the lock: a concurrent submission may have
        // completed while this caller was waiting.
        let outcome = if self.cached(key).is_some() {
            debug!(key = %key, "Replaying cached outcome as duplicate");
            CreationResult::Duplicate {
                reason: "request already processed".to_string(),
            }
        } else {
            match work().await {
                Ok(entity) => {
                    self.cache_success(key, &entity);
                    CreationResult::Created { entity }
                }
                Err(WorkError::AlreadyClaimed(reason)) => CreationResult::Duplicate { reason },
                Err(WorkError::Failed(e)) => {
                    warn!(key = %key, error = %e, "Creation work failed");
                    CreationResult::Failed {
                        kind: FailureKind::Processing,
                        message: e.to_string(),
                    }
                }
            }
        };

        drop(guard);
        self.locks.release(key, &lock);
        outcome
    }

    /// Non-blocking check whether a key already produced a success.
    pub fn is_claimed(&self, key: &str) -> bool {
        self.cached(key).is_some()
    }

    /// Drop cached successes older than `max_age`. Returns the removed count.
    pub fn cleanup_old_results(&self, max_age: Duration) -> usize {
        let mut results = self.results.lock().expect("result cache poisoned");
        let before = results.len();
        results.retain(|_, cached| cached.cached_at.elapsed() < max_age);
        before - results.len()
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            cached_results: self.results.lock().expect("result cache poisoned").len(),
            active_locks: self.locks.len(),
        }
    }

    fn cached(&self, key: &str) -> Option<BankEntity> {
        self.results
            .lock()
            .expect("result cache poisoned")
            .get(key)
            .map(|c| c.entity.clone())
    }

    fn cache_success(&self, key: &str, entity: &BankEntity) {
        self.results.lock().expect("result cache poisoned").insert(
            key.to_string(),
            CachedSuccess {
                entity: entity.clone(),
                cached_at: Instant::now(),
            },
        );
    }
}
