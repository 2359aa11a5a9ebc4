//! Per-content-hash exclusive sections.
//!
//! Uploads and deletes touching the same hash run one at a time inside this
//! process; the database transaction covers the same ground across processes.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = HashMap<String, Arc<AsyncMutex<()>>>;

/// Registry of async mutexes keyed by content hash
#[derive(Clone, Default)]
pub struct HashLocks {
    inner: Arc<Mutex<LockMap>>,
}

/// Holds the exclusive section for one hash until dropped
pub struct HashLockGuard {
    key: String,
    locks: Arc<Mutex<LockMap>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl HashLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and enter the exclusive section for `hash`
    pub async fn lock(&self, hash: &str) -> HashLockGuard {
        let mutex = {
            let mut map = self.inner.lock();
            map.entry(hash.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        let guard = mutex.lock_owned().await;

        HashLockGuard {
            key: hash.to_string(),
            locks: self.inner.clone(),
            guard: Some(guard),
        }
    }

    /// Number of hashes currently locked or awaited
    pub fn active(&self) -> usize {
        self.inner.lock().len()
    }
}

impl Drop for HashLockGuard {
    fn drop(&mut self) {
        // Release first so the strong count below reflects only waiters
        self.guard.take();

        let mut map = self.locks.lock();
        if let Some(mutex) = map.get(&self.key) {
            if Arc::strong_count(mutex) == 1 {
                map.remove(&self.key);
            }
        }
    }
}
