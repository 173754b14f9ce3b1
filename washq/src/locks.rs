//! Per-key async locks.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

/// One async mutex per key, created on first use.
///
/// Guards are owned so they can move into spawned tasks. Entries nobody
/// holds or waits on are dropped on the next `lock`, so the map stays
/// bounded by the keys in use.
#[derive(Debug)]
pub(crate) struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub(crate) fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for exclusive access to `key`.
    pub(crate) async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            // Holders and waiters each own a clone of the entry
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::<String>::new());
        let guard = locks.lock(&"m1".to_string()).await;

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.lock(&"m1".to_string()).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!contender.is_finished());

        drop(guard);
        assert!(contender.await.is_ok());
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyedLocks::<String>::new();
        let _m1 = locks.lock(&"m1".to_string()).await;
        let _m2 = locks.lock(&"m2".to_string()).await;
    }

    #[tokio::test]
    async fn released_keys_are_forgotten() {
        let locks = KeyedLocks::<String>::new();
        for key in ["u1", "u2", "u3", "m1", "m2"] {
            drop(locks.lock(&key.to_string()).await);
        }
        assert_eq!(locks.len(), 1);

        let held = locks.lock(&"u9".to_string()).await;
        drop(locks.lock(&"m9".to_string()).await);
        assert_eq!(locks.len(), 2);

        drop(held);
        drop(locks.lock(&"m9".to_string()).await);
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn waiter_keeps_its_entry_while_queued() {
        let locks = Arc::new(KeyedLocks::<String>::new());
        let guard = locks.lock(&"m1".to_string()).await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.lock(&"m1".to_string()).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(locks.lock(&"m2".to_string()).await);
        assert_eq!(locks.len(), 2);

        drop(guard);
        assert!(waiter.await.is_ok());
    }
}
