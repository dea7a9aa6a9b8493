//! Collector that never reclaims anything.

use super::GarbageCollector;
use crate::error::CoreResult;
use std::sync::atomic::{AtomicU64, Ordering};
use tessera_storage::{CommitId, ItemPointer, VersionStore};

/// A collector that drops every notification (null object).
///
/// Use for benchmarking baselines and tests that inspect superseded
/// versions after the fact.
#[derive(Debug, Default)]
pub struct NoOpGc {
    notifications: AtomicU64,
}

impl NoOpGc {
    /// Creates a new no-op collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how many end-of-transaction notifications arrived.
    pub fn notifications(&self) -> u64 {
        self.notifications.load(Ordering::Relaxed)
    }
}

impl GarbageCollector for NoOpGc {
    fn recycle_old_version(&self, _location: ItemPointer, _end_commit_id: CommitId) {}

    fn recycle_invalid_version(&self, _location: ItemPointer) {}

    fn notify_end_of_transaction(&self, _commit_id: Option<CommitId>) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
    }

    fn collect(
        &self,
        _store: &VersionStore,
        _safe_point: CommitId,
        _now: CommitId,
    ) -> CoreResult<usize> {
        Ok(0)
    }

    fn pending(&self) -> usize {
        0
    }
}
