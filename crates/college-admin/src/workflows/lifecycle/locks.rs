use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per key, created on demand. Holders of the same key run one at a time.
#[derive(Debug)]
pub(crate) struct KeyedLocks<K> {
    slots: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub(crate) async fn acquire(&self, key: &K) -> OwnedMutexGuard<()> {
        slot_for(&self.slots, key).lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().expect("lock table mutex poisoned").len()
    }
}

/// Blocking counterpart of [`KeyedLocks`] for the synchronous workflows.
#[derive(Debug)]
pub(crate) struct BlockingKeyedLocks<K> {
    slots: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for BlockingKeyedLocks<K> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> BlockingKeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    /// Runs `work` while holding the lock for `key`.
    pub(crate) fn with<T>(&self, key: &K, work: impl FnOnce() -> T) -> T {
        let slot = slot_for(&self.slots, key);
        let _guard = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        work()
    }
}

fn slot_for<K, M>(slots: &Mutex<HashMap<K, Arc<M>>>, key: &K) -> Arc<M>
where
    K: Eq + Hash + Clone,
    M: Default,
{
    let mut slots = slots.lock().expect("lock table mutex poisoned");
    // Drop slots nobody holds or waits on.
    slots.retain(|_, slot| Arc::strong_count(slot) > 1);
    slots.entry(key.clone()).or_default().clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_serialized() {
        let locks = Arc::new(KeyedLocks::<String>::default());
        let guard = locks.acquire(&"inv-1".to_string()).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(&"inv-1".to_string()).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished(), "second holder must wait");
        drop(guard);
        contender.await.expect("contender completes");
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyedLocks::<String>::default();
        let _first = locks.acquire(&"inv-1".to_string()).await;
        let _second = locks.acquire(&"inv-2".to_string()).await;
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn blocking_holders_of_one_key_do_not_overlap() {
        let locks = BlockingKeyedLocks::<String>::default();
        let inside = std::sync::atomic::AtomicU32::new(0);
        let overlapped = std::sync::atomic::AtomicBool::new(false);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    locks.with(&"stu-1".to_string(), || {
                        if inside.fetch_add(1, std::sync::atomic::Ordering::SeqCst) > 0 {
                            overlapped.store(true, std::sync::atomic::Ordering::SeqCst);
                        }
                        std::thread::sleep(Duration::from_millis(5));
                        inside.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                    });
                });
            }
        });

        assert!(!overlapped.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn released_slots_are_pruned() {
        let locks = KeyedLocks::<String>::default();
        drop(locks.acquire(&"inv-1".to_string()).await);
        let _other = locks.acquire(&"inv-2".to_string()).await;
        assert_eq!(locks.len(), 1);
    }
}
