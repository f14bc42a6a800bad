use crate::state::{PerformanceSnapshot, TemperatureSnapshot};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

pub type TemperatureStore = SnapshotStore<TemperatureSnapshot>;
pub type PerformanceStore = SnapshotStore<PerformanceSnapshot>;

pub struct SnapshotStore<T> {
    slot: watch::Sender<Arc<T>>,
    published: AtomicU64,
}

impl<T: Default> SnapshotStore<T> {
    pub fn new() -> Self {
        let (slot, _) = watch::channel(Arc::new(T::default()));
        Self {
            slot,
            published: AtomicU64::new(0),
        }
    }
}

impl<T: Default> Default for SnapshotStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SnapshotStore<T> {
    pub fn publish(&self, snapshot: T) -> Arc<T> {
        let snapshot = Arc::new(snapshot);
        // send_replace succeeds without receivers, unlike send.
        self.slot.send_replace(snapshot.clone());
        self.published.fetch_add(1, Ordering::Release);
        snapshot
    }

    pub fn read(&self) -> Arc<T> {
        self.slot.borrow().clone()
    }

    pub fn version(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }
}
