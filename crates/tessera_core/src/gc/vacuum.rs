//! Two-phase vacuum collector.
//!
//! Superseded versions go through two queues:
//!
//! 1. **Unlink.** Once a candidate's end commit id is at or below the safe
//!    point, no running snapshot can see it. The collector detaches it from
//!    its chain by clearing the newer version's `next` link (a tagged CAS,
//!    so a link that was already re-pointed is left alone) and stamps the
//!    candidate with the current commit id.
//! 2. **Reclaim.** A stamped slot may still be under a reader that entered
//!    the chain before the unlink. Once the safe point passes the stamp,
//!    every such reader has finished, and the slot is reset and returned to
//!    its tile group's free list.
//!
//! Each pass reclaims first and unlinks second, so a slot always survives
//! at least one full pass between the two phases.

use super::GarbageCollector;
use crate::error::CoreResult;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tessera_storage::{CommitId, ItemPointer, TaggedPointer, VersionStore};
use tracing::{debug, trace};

/// Upper bound on unlink candidates examined per pass.
const MAX_ATTEMPT_COUNT: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Candidate {
    location: ItemPointer,
    end_commit_id: CommitId,
}

/// Two-phase unlink-then-reclaim collector.
#[derive(Debug, Default)]
pub struct VacuumGc {
    unlink_queue: Mutex<VecDeque<Candidate>>,
    reclaim_map: Mutex<BTreeMap<CommitId, Vec<TaggedPointer>>>,
    notifications: AtomicU64,
    max_commit_id: AtomicU64,
    reclaimed: AtomicU64,
}

impl VacuumGc {
    /// Creates an idle collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how many end-of-transaction notifications arrived.
    pub fn notifications(&self) -> u64 {
        self.notifications.load(Ordering::Relaxed)
    }

    /// Returns the largest commit id reported by a finished transaction.
    pub fn max_commit_id(&self) -> CommitId {
        CommitId::new(self.max_commit_id.load(Ordering::Relaxed))
    }

    /// Returns the total number of slots reclaimed.
    pub fn reclaimed(&self) -> u64 {
        self.reclaimed.load(Ordering::Relaxed)
    }

    fn reclaim(&self, store: &VersionStore, safe_point: CommitId) -> CoreResult<usize> {
        let mut count = 0;
        let mut reclaim_map = self.reclaim_map.lock();
        while let Some(entry) = reclaim_map.first_entry() {
            if *entry.key() >= safe_point {
                break;
            }
            for tagged in entry.remove() {
                let slot = store.slot(tagged.pointer())?;
                if slot.generation() != tagged.generation() {
                    continue;
                }
                store.recycle_slot(tagged.pointer())?;
                count += 1;
            }
        }
        trace!(count, %safe_point, "reclaimed version slots");
        Ok(count)
    }

    fn unlink(&self, store: &VersionStore, safe_point: CommitId, now: CommitId) -> CoreResult<usize> {
        let mut garbage = Vec::new();
        let mut retry = Vec::new();
        {
            let mut queue = self.unlink_queue.lock();
            for _ in 0..MAX_ATTEMPT_COUNT {
                let Some(candidate) = queue.pop_front() else {
                    break;
                };
                if candidate.end_commit_id <= safe_point {
                    garbage.push(candidate);
                } else {
                    retry.push(candidate);
                }
            }
            queue.extend(retry);
        }

        let mut stamped = Vec::with_capacity(garbage.len());
        for candidate in garbage {
            let slot = store.slot(candidate.location)?;
            let tagged = slot.tagged();
            let newer = slot.prev_tagged();
            if !newer.is_null() {
                let newer_slot = store.slot(newer.pointer())?;
                if newer_slot.generation() == newer.generation() {
                    newer_slot.compare_and_clear_next(tagged);
                }
            }
            stamped.push(tagged);
        }

        let count = stamped.len();
        if count > 0 {
            self.reclaim_map
                .lock()
                .entry(now)
                .or_default()
                .extend(stamped);
        }
        trace!(count, %safe_point, "unlinked versions");
        Ok(count)
    }
}

impl GarbageCollector for VacuumGc {
    fn recycle_old_version(&self, location: ItemPointer, end_commit_id: CommitId) {
        trace!(%location, %end_commit_id, "queued superseded version");
        self.unlink_queue.lock().push_back(Candidate {
            location,
            end_commit_id,
        });
    }

    fn recycle_invalid_version(&self, location: ItemPointer) {
        trace!(%location, "queued invalid version");
        self.unlink_queue.lock().push_back(Candidate {
            location,
            end_commit_id: CommitId::INVALID,
        });
    }

    fn notify_end_of_transaction(&self, commit_id: Option<CommitId>) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
        if let Some(commit_id) = commit_id {
            self.max_commit_id
                .fetch_max(commit_id.as_u64(), Ordering::Relaxed);
        }
    }

    fn collect(
        &self,
        store: &VersionStore,
        safe_point: CommitId,
        now: CommitId,
    ) -> CoreResult<usize> {
        let reclaimed = self.reclaim(store, safe_point)?;
        let unlinked = self.unlink(store, safe_point, now)?;
        self.reclaimed.fetch_add(reclaimed as u64, Ordering::Relaxed);
        if reclaimed > 0 || unlinked > 0 {
            debug!(reclaimed, unlinked, %safe_point, "vacuum pass");
        }
        Ok(reclaimed)
    }

    fn pending(&self) -> usize {
        let unlinking = self.unlink_queue.lock().len();
        let reclaiming: usize = self.reclaim_map.lock().values().map(Vec::len).sum();
        unlinking + reclaiming
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_storage::TxnId;

    /// Builds `old <- new` with `old` closed at `end`.
    fn superseded_pair(store: &VersionStore, end: u64) -> (ItemPointer, ItemPointer) {
        let old = store.allocate_slot().unwrap();
        let new = store.allocate_slot().unwrap();
        let old_slot = store.slot(old).unwrap();
        let new_slot = store.slot(new).unwrap();

        old_slot.set_owner(TxnId::UNLOCKED);
        old_slot.set_begin_commit_id(CommitId::new(1));
        old_slot.set_end_commit_id(CommitId::new(end));
        old_slot.set_prev_pointer(new).unwrap();

        new_slot.set_owner(TxnId::UNLOCKED);
        new_slot.set_begin_commit_id(CommitId::new(end));
        new_slot.set_end_commit_id(CommitId::INFINITY);
        new_slot.set_next_pointer(old).unwrap();
        (old, new)
    }

    #[test]
    fn version_survives_until_safe_point_passes_end() {
        let store = VersionStore::default();
        let gc = VacuumGc::new();
        let (old, new) = superseded_pair(&store, 5);
        gc.recycle_old_version(old, CommitId::new(5));

        // A snapshot at 4 may still read the old version.
        let reclaimed = gc.collect(&store, CommitId::new(4), CommitId::new(6)).unwrap();
        assert_eq!(reclaimed, 0);
        assert_eq!(store.slot(new).unwrap().next_pointer(), old);
        assert_eq!(gc.pending(), 1);
    }

    #[test]
    fn unlink_then_reclaim() {
        let store = VersionStore::default();
        let gc = VacuumGc::new();
        let (old, new) = superseded_pair(&store, 5);
        gc.recycle_old_version(old, CommitId::new(5));

        // First pass unlinks and stamps with 6.
        assert_eq!(gc.collect(&store, CommitId::new(5), CommitId::new(6)).unwrap(), 0);
        assert!(store.slot(new).unwrap().next_pointer().is_null());
        assert!(!store.slot(old).unwrap().is_virgin());

        // The stamp holds while a reader that began at 6 may be running.
        assert_eq!(gc.collect(&store, CommitId::new(6), CommitId::new(6)).unwrap(), 0);

        assert_eq!(gc.collect(&store, CommitId::new(7), CommitId::new(7)).unwrap(), 1);
        let slot = store.slot(old).unwrap();
        assert!(slot.is_virgin());
        assert_eq!(slot.generation(), 1);
        assert_eq!(gc.pending(), 0);
        assert_eq!(gc.reclaimed(), 1);
    }

    #[test]
    fn invalid_versions_skip_the_end_check() {
        let store = VersionStore::default();
        let gc = VacuumGc::new();
        let location = store.allocate_slot().unwrap();
        gc.recycle_invalid_version(location);

        gc.collect(&store, CommitId::new(1), CommitId::new(3)).unwrap();
        assert_eq!(gc.collect(&store, CommitId::new(4), CommitId::new(4)).unwrap(), 1);
        assert_eq!(store.allocate_slot().unwrap(), location);
    }

    #[test]
    fn tombstone_is_reclaimed_with_the_version_it_closed() {
        let store = VersionStore::default();
        let gc = VacuumGc::new();
        let (old, tombstone) = superseded_pair(&store, 5);
        let tombstone_slot = store.slot(tombstone).unwrap();
        tombstone_slot.set_owner(TxnId::INVALID);
        tombstone_slot.set_end_commit_id(CommitId::INVALID);
        let id = store.allocate_indirection(tombstone).unwrap();

        gc.recycle_old_version(old, CommitId::new(5));
        gc.recycle_tombstone(tombstone, CommitId::new(5));
        assert_eq!(gc.collect(&store, CommitId::new(4), CommitId::new(6)).unwrap(), 0);
        assert_eq!(gc.pending(), 2);

        gc.collect(&store, CommitId::new(6), CommitId::new(6)).unwrap();
        assert_eq!(gc.collect(&store, CommitId::new(7), CommitId::new(7)).unwrap(), 2);
        assert!(store.slot(tombstone).unwrap().is_virgin());
        assert!(store.versions(id).unwrap().is_empty());
    }

    #[test]
    fn relinked_newer_version_is_left_alone() {
        let store = VersionStore::default();
        let gc = VacuumGc::new();
        let (old, new) = superseded_pair(&store, 5);
        let other = store.allocate_slot().unwrap();
        store.slot(new).unwrap().set_next_pointer(other).unwrap();

        gc.recycle_old_version(old, CommitId::new(5));
        gc.collect(&store, CommitId::new(9), CommitId::new(9)).unwrap();

        assert_eq!(store.slot(new).unwrap().next_pointer(), other);
    }

    #[test]
    fn notifications_track_max_commit_id() {
        let gc = VacuumGc::new();
        gc.notify_end_of_transaction(Some(CommitId::new(8)));
        gc.notify_end_of_transaction(None);
        gc.notify_end_of_transaction(Some(CommitId::new(5)));
        assert_eq!(gc.notifications(), 3);
        assert_eq!(gc.max_commit_id(), CommitId::new(8));
    }
}
