//! In-process locks keyed by vote target.
//!
//! Vote transactions and reconciliation on the same target take the same lock,
//! so within one process they never interleave.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError},
};

use qna_db::entities::TargetKind;
use tokio::sync::{Mutex, OwnedMutexGuard};

type TargetKey = (TargetKind, String);

/// Async mutexes keyed by `(kind, target id)`.
///
/// Entries are created on demand and removed when the last holder releases
/// them.
#[derive(Default)]
pub struct TargetLocks {
    locks: StdMutex<HashMap<TargetKey, Arc<Mutex<()>>>>,
}

impl TargetLocks {
    /// Create an empty lock map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a target.
    pub async fn acquire(self: &Arc<Self>, kind: TargetKind, target_id: &str) -> TargetLockGuard {
        let key = (kind, target_id.to_string());
        let lock = self.map().entry(key.clone()).or_default().clone();
        let guard = lock.lock_owned().await;

        TargetLockGuard {
            locks: Arc::clone(self),
            key,
            guard: Some(guard),
        }
    }

    /// Number of targets with a live entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<TargetKey, Arc<Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, key: &TargetKey, guard: OwnedMutexGuard<()>) {
        drop(guard);
        let mut locks = self.map();
        // A waiter still holds a clone; it removes the entry when it is done.
        if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(key);
        }
    }
}

/// Exclusive access to one target. Released on drop, including when the owning
/// future is cancelled.
pub struct TargetLockGuard {
    locks: Arc<TargetLocks>,
    key: TargetKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for TargetLockGuard {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            self.locks.release(&self.key, guard);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_entry_removed_after_release() {
        let locks = Arc::new(TargetLocks::new());

        let guard = locks.acquire(TargetKind::Question, "q1").await;
        assert_eq!(locks.len(), 1);

        drop(guard);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_same_target_is_exclusive() {
        let locks = Arc::new(TargetLocks::new());
        let held = locks.acquire(TargetKind::Answer, "a1").await;

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.acquire(TargetKind::Answer, "a1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(held);
        contender.await.unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_kinds_do_not_share_a_lock() {
        let locks = Arc::new(TargetLocks::new());
        let _question = locks.acquire(TargetKind::Question, "x").await;

        let answer = tokio::time::timeout(
            Duration::from_millis(100),
            locks.acquire(TargetKind::Answer, "x"),
        )
        .await;

        assert!(answer.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_holder_releases_entry() {
        let locks = Arc::new(TargetLocks::new());

        let task = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.acquire(TargetKind::Question, "q1").await;
                std::future::pending::<()>().await;
            })
        };
        while locks.is_empty() {
            tokio::task::yield_now().await;
        }

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert!(locks.is_empty());
    }
}
