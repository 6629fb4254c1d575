//! Per-instance critical sections.

use crate::types::InstanceId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per instance id.
///
/// Read-modify-write sequences that await on storage hold the id's guard for
/// their whole duration, so concurrent writers to the same id are serialized
/// while other ids proceed in parallel.
#[derive(Default)]
pub(crate) struct KeyedLocks {
    locks: DashMap<InstanceId, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`.
    pub(crate) async fn lock(&self, id: &InstanceId) -> OwnedMutexGuard<()> {
        // clone the Arc out so the shard lock is not held across the await
        let lock = self
            .locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        lock.lock_owned().await
    }

    /// Drop the mutex for an id that no longer exists.
    ///
    /// The entry stays while any guard or waiter still holds the mutex, so a
    /// later caller can never end up with a second mutex for the same id.
    pub(crate) fn forget(&self, id: &InstanceId) {
        self.locks.remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::new());
        let id = InstanceId::from_string("a");
        let guard = locks.lock(&id).await;

        let contender = {
            let locks = Arc::clone(&locks);
            let id = id.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(&id).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());
        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock(&InstanceId::from_string("a")).await;
        let _b = locks.lock(&InstanceId::from_string("b")).await;
    }

    #[tokio::test]
    async fn test_forget_keeps_mutex_while_contended() {
        let locks = Arc::new(KeyedLocks::new());
        let id = InstanceId::from_string("a");
        let guard = locks.lock(&id).await;

        let waiter = {
            let locks = Arc::clone(&locks);
            let id = id.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(&id).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // held and awaited: forgetting must not split the mutex
        locks.forget(&id);
        assert!(locks.locks.contains_key(&id));

        // a newcomer still queues behind the original holder
        let newcomer = {
            let locks = Arc::clone(&locks);
            let id = id.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(&id).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!newcomer.is_finished());

        drop(guard);
        waiter.await.unwrap();
        newcomer.await.unwrap();

        locks.forget(&id);
        assert!(!locks.locks.contains_key(&id));
    }
}
