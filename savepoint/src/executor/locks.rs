//! Per-file serialisation of backup work.
//!
//! Archive and retention for one source must not interleave: retention could
//! delete a version that is still being written, and two saves in the same
//! second race on one destination name. Locks are keyed by the mirrored
//! backup path, so distinct sources never contend.

use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of per-file locks
#[derive(Clone, Default)]
pub struct PathLocks {
    locks: Arc<DashMap<PathBuf, Arc<Mutex<()>>>>,
}

/// Held while work on one backup path is in flight
pub struct PathLease {
    guard: Option<OwnedMutexGuard<()>>,
    key: PathBuf,
    locks: Arc<DashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other lease for `key` is held, then take one
    pub async fn acquire(&self, key: PathBuf) -> PathLease {
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        PathLease {
            guard: Some(guard),
            key,
            locks: self.locks.clone(),
        }
    }

    /// Number of paths with a lease held or awaited
    pub fn active(&self) -> usize {
        self.locks.len()
    }
}

impl Drop for PathLease {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Forget the lock once nobody else holds or waits for it
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}
