use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

/// One lock per cluster name, created on first use and kept for the life of
/// the plugin.
///
/// Refreshes of the same cluster share a scratch directory and must not
/// overlap. Refreshes of different clusters never contend.
#[derive(Default)]
pub(crate) struct ClusterLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ClusterLocks {
    /// Wait for exclusive access to `cluster`.
    pub(crate) async fn acquire(&self, cluster: &str) -> OwnedMutexGuard<()> {
        let lock = self.lock_for(cluster);
        trace!(cluster, "Waiting for cluster lock");
        lock.lock_owned().await
    }

    /// Returns the lock for `cluster`, creating it if needed. Lookup and
    /// insertion happen under one table lock.
    fn lock_for(&self, cluster: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(locks) => locks,
            // The table holds no invariant a panicking holder could break
            Err(poisoned) => poisoned.into_inner(),
        };
        locks
            .entry(cluster.to_owned())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_lock_per_cluster() {
        let locks = ClusterLocks::default();
        let a = locks.lock_for("a");
        assert!(Arc::ptr_eq(&a, &locks.lock_for("a")));
        assert!(!Arc::ptr_eq(&a, &locks.lock_for("b")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_use_shares_a_lock() {
        let locks = Arc::new(ClusterLocks::default());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let locks = locks.clone();
                tokio::spawn(async move { locks.lock_for("fresh") })
            })
            .collect();
        let mut created = Vec::new();
        for handle in handles {
            created.push(handle.await.unwrap());
        }
        assert!(created.iter().all(|l| Arc::ptr_eq(l, &created[0])));
    }

    #[tokio::test]
    async fn held_locks_block_the_same_cluster_only() {
        let locks = ClusterLocks::default();
        let _guard = locks.acquire("a").await;
        assert!(locks.lock_for("a").try_lock().is_err());
        assert!(locks.lock_for("b").try_lock().is_ok());
    }
}
