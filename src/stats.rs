//! Collection counters exposed through the API surface's `get_stats`/
//! `get_count` (spec §6). Grounded on `util/stats.rs`'s counter-vector shape,
//! narrowed to the handful of per-collection totals this collector reports.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Snapshot of one completed collection, as returned by `get_stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollectionReport {
    pub collections: u64,
    pub collected: u64,
    pub uncollectable: u64,
}

/// Running totals plus the most recent per-collection report, mirroring
/// `gc.get_stats()`'s per-generation dicts collapsed to this collector's
/// single generation.
pub struct GcStats {
    collections: AtomicU64,
    collected: AtomicU64,
    uncollectable: AtomicU64,
    live_objects: AtomicUsize,
    last: Mutex<CollectionReport>,
}

impl GcStats {
    pub fn new() -> Self {
        GcStats {
            collections: AtomicU64::new(0),
            collected: AtomicU64::new(0),
            uncollectable: AtomicU64::new(0),
            live_objects: AtomicUsize::new(0),
            last: Mutex::new(CollectionReport::default()),
        }
    }

    /// Record the outcome of a just-finished collection. Spec §4.G step 18.
    pub fn record_collection(&self, collected: u64, uncollectable: u64, live_objects: usize) {
        self.collections.fetch_add(1, Ordering::Relaxed);
        self.collected.fetch_add(collected, Ordering::Relaxed);
        self.uncollectable.fetch_add(uncollectable, Ordering::Relaxed);
        self.live_objects.store(live_objects, Ordering::Relaxed);
        *self.last.lock().unwrap() = CollectionReport {
            collections: 1,
            collected,
            uncollectable,
        };
    }

    pub fn get_count(&self) -> usize {
        self.live_objects.load(Ordering::Relaxed)
    }

    pub fn get_stats(&self) -> CollectionReport {
        CollectionReport {
            collections: self.collections.load(Ordering::Relaxed),
            collected: self.collected.load(Ordering::Relaxed),
            uncollectable: self.uncollectable.load(Ordering::Relaxed),
        }
    }

    pub fn last_collection(&self) -> CollectionReport {
        *self.last.lock().unwrap()
    }
}

impl Default for GcStats {
    fn default() -> Self {
        Self::new()
    }
}
