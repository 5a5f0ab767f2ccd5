use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::storage::ContentHash;

/// Advisory async locks keyed by content hash.
///
/// Ingestion holds the lock for a hash across lookup, commit and insert; the
/// garbage collector holds it across delete, reference check and blob removal;
/// workers hold it while publishing a result to every row sharing the hash.
/// Entries are dropped once nobody holds or waits on them.
#[derive(Clone, Default)]
pub struct HashLocks {
    inner: Arc<DashMap<ContentHash, Arc<Mutex<()>>>>,
}

impl HashLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `hash`.
    pub async fn lock(&self, hash: ContentHash) -> HashGuard {
        let mutex = self.inner.entry(hash).or_default().clone();
        let guard = mutex.lock_owned().await;
        HashGuard {
            guard: Some(guard),
            locks: Arc::clone(&self.inner),
            hash,
        }
    }

    /// Number of hashes currently locked or contended.
    pub fn active(&self) -> usize {
        self.inner.len()
    }
}

/// Releases the hash lock on drop.
pub struct HashGuard {
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<ContentHash, Arc<Mutex<()>>>>,
    hash: ContentHash,
}

impl HashGuard {
    pub fn hash(&self) -> &ContentHash {
        &self.hash
    }
}

impl Drop for HashGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.hash, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
