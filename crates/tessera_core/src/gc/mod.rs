//! Garbage collection of superseded and dead versions.
//!
//! The transaction manager never reclaims memory itself. It hands every
//! version that stops being the newest one to a [`GarbageCollector`] and
//! reports the end of each transaction; the collector decides when a slot is
//! unreachable for every running reader and recycles it in the version store.

mod noop;
mod vacuum;
mod worker;

pub use noop::NoOpGc;
pub use vacuum::VacuumGc;
pub use worker::GcWorker;

use crate::config::GcMode;
use crate::error::CoreResult;
use std::fmt;
use std::sync::Arc;
use tessera_storage::{CommitId, ItemPointer, VersionStore};

/// Collector interface consumed by the transaction manager.
///
/// Implementations:
/// - [`NoOpGc`]: forgets everything, slots are never reused
/// - [`VacuumGc`]: two-phase unlink-then-reclaim collector
pub trait GarbageCollector: Send + Sync + fmt::Debug {
    /// A committed transaction closed `location`'s interval at `end_commit_id`.
    ///
    /// The slot still sits in its version chain and may be read by any
    /// snapshot older than `end_commit_id`.
    fn recycle_old_version(&self, location: ItemPointer, end_commit_id: CommitId);

    /// `location` was never visible to anyone but its writer: an aborted
    /// insert or update, or an insert deleted by the same transaction.
    fn recycle_invalid_version(&self, location: ItemPointer);

    /// A committed delete published the tombstone at `location` at
    /// `delete_commit_id`.
    ///
    /// Snapshots at or after `delete_commit_id` read the row as deleted
    /// whether or not the tombstone is still there, so it may go once no
    /// older snapshot runs.
    fn recycle_tombstone(&self, location: ItemPointer, delete_commit_id: CommitId) {
        self.recycle_old_version(location, delete_commit_id);
    }

    /// Called exactly once per commit or abort; `None` if nothing was written.
    fn notify_end_of_transaction(&self, commit_id: Option<CommitId>);

    /// Runs one collection pass.
    ///
    /// `safe_point` is the oldest snapshot any running transaction may read
    /// at; `now` is the current commit id. Returns the number of slots
    /// returned to the store's free lists.
    fn collect(&self, store: &VersionStore, safe_point: CommitId, now: CommitId)
        -> CoreResult<usize>;

    /// Returns the number of slots queued but not yet reclaimed.
    fn pending(&self) -> usize;
}

/// Creates the collector for `mode`.
pub fn create_gc(mode: GcMode) -> Arc<dyn GarbageCollector> {
    match mode {
        GcMode::Off => Arc::new(NoOpGc::new()),
        GcMode::Vacuum => Arc::new(VacuumGc::new()),
    }
}
