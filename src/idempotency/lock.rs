use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// One entry in the lock table. `gate` is a fair (FIFO) async mutex; `refs`
/// counts every caller that has checked the entry out and not yet returned
/// it, including callers still waiting on the gate.
pub(crate) struct KeyLock {
    pub(crate) gate: tokio::sync::Mutex<()>,
    refs: AtomicUsize,
}

impl KeyLock {
    fn new() -> Self {
        Self {
            gate: tokio::sync::Mutex::new(()),
            refs: AtomicUsize::new(0),
        }
    }
}

/// Concurrency-safe map from idempotency key to its lock.
///
/// Entries are reference counted: `checkout` registers interest under the
/// table mutex before the caller ever waits on the gate, and `release`
/// removes the entry only when the count has dropped to zero, checked under
/// that same mutex. A new waiter can therefore never be stranded on a lock
/// that was concurrently evicted.
#[derive(Default)]
pub(crate) struct LockTable {
    entries: Mutex<HashMap<String, Arc<KeyLock>>>,
}

impl LockTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Get or create the lock for a key and register as a holder/waiter.
    pub(crate) fn checkout(&self, key: &str) -> Arc<KeyLock> {
        let mut entries = self.entries.lock().expect("lock table poisoned");
        let lock = entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(KeyLock::new()))
            .clone();
        lock.refs.fetch_add(1, Ordering::SeqCst);
        lock
    }

    /// Return a checked-out lock. The entry is removed only when no holder
    /// and no waiter remain.
    pub(crate) fn release(&self, key: &str, lock: &Arc<KeyLock>) {
        let mut entries = self.entries.lock().expect("lock table poisoned");
        if lock.refs.fetch_sub(1, Ordering::SeqCst) == 1 {
            if let Some(current) = entries.get(key) {
                if Arc::ptr_eq(current, lock) && current.refs.load(Ordering::SeqCst) == 0 {
                    entries.remove(key);
                }
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().expect("lock table poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_removed_when_last_holder_releases() {
        let table = LockTable::new();
        let lock = table.checkout("k1");
        assert_eq!(table.len(), 1);

        table.release("k1", &lock);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_entry_survives_while_waiters_registered() {
        let table = LockTable::new();
        let first = table.checkout("k1");
        let second = table.checkout("k1");
        assert!(Arc::ptr_eq(&first, &second));

        table.release("k1", &first);
        // Second caller is still registered; the entry must stay
        assert_eq!(table.len(), 1);

        table.release("k1", &second);
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn test_checkout_after_release_gets_fresh_entry() {
        let table = LockTable::new();
        let first = table.checkout("k1");
        table.release("k1", &first);

        let second = table.checkout("k1");
        // Old entry was evicted; the new checkout created a new lock
        assert!(!Arc::ptr_eq(&first, &second));
        table.release("k1", &second);
    }

    #[tokio::test]
    async fn test_gate_serializes_holders() {
        let table = Arc::new(LockTable::new());
        let lock = table.checkout("k1");
        let guard = lock.gate.lock().await;

        let contender = table.checkout("k1");
        assert!(contender.gate.try_lock().is_err());

        drop(guard);
        assert!(contender.gate.try_lock().is_ok());
        table.release("k1", &lock);
        table.release("k1", &contender);
    }
}
