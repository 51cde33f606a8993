// Per-resource async locks.
//
// Every manager operation holds the locks of the resources whose rows it
// mutates or whose full rule set it resends, for its whole duration.
// Multiple keys are always taken in `LockKey` order.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::{IpAddressId, NetworkId, VpcId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockKey {
    Vpc(VpcId),
    Network(NetworkId),
    Ip(IpAddressId),
}

/// Held locks; released on drop.
#[must_use = "locks are released as soon as the guard is dropped"]
pub struct LockGuard {
    _guards: Vec<OwnedMutexGuard<()>>,
}

#[derive(Default)]
pub struct ResourceLocks {
    table: DashMap<LockKey, Arc<Mutex<()>>>,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: LockKey) -> Arc<Mutex<()>> {
        self.table.entry(key).or_default().clone()
    }

    pub async fn acquire(&self, key: LockKey) -> LockGuard {
        self.acquire_many([key]).await
    }

    /// Take every lock in `keys`, sorted and deduplicated.
    pub async fn acquire_many(&self, keys: impl IntoIterator<Item = LockKey>) -> LockGuard {
        let mut keys: Vec<LockKey> = keys.into_iter().collect();
        keys.sort_unstable();
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.slot(key).lock_owned().await);
        }
        LockGuard { _guards: guards }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_key_is_exclusive_other_keys_are_not() {
        let locks = Arc::new(ResourceLocks::new());
        let held = locks.acquire(LockKey::Ip(IpAddressId(1))).await;

        let other = tokio::time::timeout(
            Duration::from_millis(50),
            locks.acquire(LockKey::Ip(IpAddressId(2))),
        )
        .await;
        assert!(other.is_ok());

        let same = tokio::time::timeout(
            Duration::from_millis(50),
            locks.acquire(LockKey::Ip(IpAddressId(1))),
        )
        .await;
        assert!(same.is_err());

        drop(held);
        let again = tokio::time::timeout(
            Duration::from_millis(50),
            locks.acquire_many([LockKey::Ip(IpAddressId(1)), LockKey::Network(NetworkId(1))]),
        )
        .await;
        assert!(again.is_ok());
    }

    #[test]
    fn keys_order_coarse_to_fine() {
        assert!(LockKey::Vpc(VpcId(9)) < LockKey::Network(NetworkId(1)));
        assert!(LockKey::Network(NetworkId(9)) < LockKey::Ip(IpAddressId(1)));
    }
}
