//! Per-order serialization for the lifecycle service.

use std::sync::Arc;

use common::OrderId;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per order, created on demand and dropped when unused.
///
/// The lifecycle holds an order's lock from its status write until the
/// notice for that write has been handed to the observer, so notices for
/// one order leave in commit order.
#[derive(Clone, Default)]
pub(crate) struct OrderLocks {
    locks: Arc<DashMap<OrderId, Arc<Mutex<()>>>>,
}

impl OrderLocks {
    pub(crate) async fn acquire(&self, id: OrderId) -> OrderLockGuard {
        let lock = self.locks.entry(id).or_default().clone();
        let guard = lock.lock_owned().await;
        OrderLockGuard {
            id,
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

pub(crate) struct OrderLockGuard {
    id: OrderId,
    locks: Arc<DashMap<OrderId, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for OrderLockGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Only the map's own handle left: nobody holds or waits on it.
        self.locks
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
