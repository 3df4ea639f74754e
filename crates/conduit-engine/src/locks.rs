//! Per-subject mutual exclusion for generation runs.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use conduit_core::OrchestratorError;

/// Lazily created lock per subject key. Entries are never removed, so the
/// table grows with the number of subjects seen.
///
/// Waiters are served in FIFO order (tokio's mutex is fair), but callers
/// must not rely on it; the only guarantee is the bounded wait.
pub struct SessionLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
    timeout: Duration,
}

impl SessionLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait up to the configured timeout for the subject's lock. The guard
    /// releases on drop.
    pub async fn acquire(
        &self,
        subject_key: &str,
    ) -> Result<OwnedMutexGuard<()>, OrchestratorError> {
        let lock = Arc::clone(
            self.locks
                .entry(subject_key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        tokio::time::timeout(self.timeout, lock.lock_owned())
            .await
            .map_err(|_| OrchestratorError::LockTimeout(self.timeout))
    }

    /// Whether a run currently holds the subject's lock.
    pub fn is_held(&self, subject_key: &str) -> bool {
        self.locks
            .get(subject_key)
            .is_some_and(|l| l.try_lock().is_err())
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
