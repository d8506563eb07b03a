use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Registry of per-key async read/write locks.
///
/// Entries only live while a guard or a waiter holds them, so the map stays
/// proportional to the number of keys currently in use.
pub struct KeyedLocks<K> {
    entries: Mutex<HashMap<K, Weak<RwLock<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, key: &K) -> Arc<RwLock<()>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(lock) = entries.get(key).and_then(Weak::upgrade) {
            return lock;
        }
        entries.retain(|_, weak| weak.strong_count() > 0);
        let lock = Arc::new(RwLock::new(()));
        entries.insert(key.clone(), Arc::downgrade(&lock));
        lock
    }

    pub async fn read(&self, key: &K) -> OwnedRwLockReadGuard<()> {
        self.lock_for(key).read_owned().await
    }

    pub async fn write(&self, key: &K) -> OwnedRwLockWriteGuard<()> {
        self.lock_for(key).write_owned().await
    }

    /// Keys that currently have a live lock.
    pub fn active(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}
