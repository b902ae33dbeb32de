//! Snapshot store shared between the refresh loop and the query path.
//!
//! The lock guards only the reference to the current [`Snapshot`]. Readers
//! clone the `Arc` and release the lock before touching any records, so a
//! lookup observes either the old or the new snapshot in full.

use hickory_proto::rr::{LowerName, Record};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

use crate::metrics;
use crate::snapshot::Snapshot;

/// Thread-safe holder of the live snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    inner: Arc<RwLock<StoreInner>>,
}

#[derive(Debug)]
struct StoreInner {
    current: Arc<Snapshot>,

    /// Incremented on every install; 0 until the first one.
    generation: u64,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore {
    /// Create a store holding an empty, not-ready snapshot.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner {
                current: Arc::new(Snapshot::empty()),
                generation: 0,
            })),
        }
    }

    /// Install `snapshot` as the current one. Returns its generation.
    ///
    /// The previous snapshot is dropped once the last in-flight reader
    /// releases it.
    pub fn replace(&self, snapshot: Snapshot) -> u64 {
        let names = snapshot.name_count();
        let records = snapshot.record_count();
        let snapshot = Arc::new(snapshot);

        let generation = {
            let mut inner = self.inner.write();
            inner.current = snapshot;
            inner.generation += 1;
            inner.generation
        };

        info!(generation, names, records, "installed snapshot");
        metrics::record_snapshot(names, records, generation);
        generation
    }

    /// The current snapshot.
    pub fn current(&self) -> Arc<Snapshot> {
        self.inner.read().current.clone()
    }

    /// Records for `name` in the current snapshot; empty if absent.
    pub fn lookup(&self, name: &LowerName) -> Vec<Record> {
        let snapshot = self.current();
        snapshot.get(name).map(<[Record]>::to_vec).unwrap_or_default()
    }

    /// Whether `name` exists in the current snapshot.
    pub fn contains(&self, name: &LowerName) -> bool {
        self.current().contains(name)
    }

    /// Generation of the current snapshot.
    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    /// True once the first snapshot has been installed.
    pub fn is_ready(&self) -> bool {
        self.generation() > 0
    }

    /// Emit current state metrics.
    pub fn emit_metrics(&self) {
        let (snapshot, generation) = {
            let inner = self.inner.read();
            (inner.current.clone(), inner.generation)
        };
        metrics::record_snapshot(snapshot.name_count(), snapshot.record_count(), generation);
        metrics::record_ready_state(generation > 0);
    }
}
