//! Optimistic transaction manager.

use crate::config::{Config, IsolationLevel};
use crate::error::{CoreError, CoreResult};
use crate::gc::{create_gc, GarbageCollector};
use crate::stats::TxnStats;
use crate::transaction::dependency::DependencyState;
use crate::transaction::state::{RwType, Transaction, TxnResult};
use crate::wal::{LogManager, LogRecord, NoOpLogManager};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{fence, AtomicU64, Ordering};
use std::sync::Arc;
use tessera_storage::{
    CommitId, IndirectionId, ItemPointer, SlotRef, TxnId, VersionStore,
};
use tracing::{debug, trace, warn};

/// What a transaction sees when it looks at one version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// The version is not part of the transaction's snapshot.
    Invisible,
    /// The version is the one the transaction must read.
    Visible,
    /// The row is deleted as of the transaction's snapshot.
    Deleted,
}

#[derive(Debug)]
struct RunningTxn {
    begin_cid: CommitId,
    dependency: Option<Arc<DependencyState>>,
}

/// Manages optimistic multi-version transactions.
///
/// The transaction manager provides:
/// - Snapshot reads against `[begin, end)` visibility intervals
/// - Tuple ownership via compare-and-swap on the slot owner field, no locks
/// - Read/write set validation at commit against a fresh commit id
/// - Two-phase publish of new versions, separated by full fences
/// - Rollback that re-points index entries before unlocking
///
/// Every transaction-id and commit-id counter is an atomic owned by the
/// manager; create one manager per version store and share it by `Arc`.
///
/// ## Commit ids
///
/// The commit counter holds the last commit id drawn. A transaction's
/// snapshot is the counter's value at begin; every commit or abort draws
/// the next value, so each id is handed out exactly once.
#[derive(Debug)]
pub struct TransactionManager {
    config: Config,
    store: Arc<VersionStore>,
    gc: Arc<dyn GarbageCollector>,
    log: Arc<dyn LogManager>,
    /// Next transaction ID.
    next_txn_id: AtomicU64,
    /// Last commit id drawn.
    commit_id: AtomicU64,
    /// Running transactions: snapshot and dependency state.
    running: RwLock<HashMap<TxnId, RunningTxn>>,
    stats: TxnStats,
}

impl TransactionManager {
    /// Creates a transaction manager with a fresh version store.
    pub fn new(config: Config) -> Self {
        Self::with_state(config, TxnId::FIRST.as_u64(), 1)
    }

    /// Creates a transaction manager whose counters resume at the given values.
    ///
    /// The first transaction gets id `next_txn_id` and snapshot
    /// `current_commit_id`; the first commit draws `current_commit_id + 1`.
    pub fn with_state(config: Config, next_txn_id: u64, current_commit_id: u64) -> Self {
        let store = Arc::new(VersionStore::new(config.store_config()));
        let gc = create_gc(config.gc_mode);
        Self {
            config,
            store,
            gc,
            log: Arc::new(NoOpLogManager::new()),
            next_txn_id: AtomicU64::new(next_txn_id.max(TxnId::FIRST.as_u64())),
            commit_id: AtomicU64::new(current_commit_id),
            running: RwLock::new(HashMap::new()),
            stats: TxnStats::new(),
        }
    }

    /// Creates a transaction manager over existing collaborators.
    pub fn with_components(
        config: Config,
        store: Arc<VersionStore>,
        gc: Arc<dyn GarbageCollector>,
        log: Arc<dyn LogManager>,
    ) -> Self {
        Self {
            store,
            gc,
            log,
            ..Self::new(config)
        }
    }

    /// Replaces the log manager.
    #[must_use]
    pub fn with_log_manager(mut self, log: Arc<dyn LogManager>) -> Self {
        self.log = log;
        self
    }

    /// Replaces the garbage collector.
    #[must_use]
    pub fn with_garbage_collector(mut self, gc: Arc<dyn GarbageCollector>) -> Self {
        self.gc = gc;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the isolation level of every transaction this manager starts.
    pub fn isolation(&self) -> IsolationLevel {
        self.config.isolation
    }

    /// Returns the version store.
    pub fn store(&self) -> &Arc<VersionStore> {
        &self.store
    }

    /// Returns the garbage collector.
    pub fn garbage_collector(&self) -> &Arc<dyn GarbageCollector> {
        &self.gc
    }

    /// Returns the statistics counters.
    pub fn stats(&self) -> &TxnStats {
        &self.stats
    }

    /// Returns the last commit id drawn.
    pub fn current_commit_id(&self) -> CommitId {
        CommitId::new(self.commit_id.load(Ordering::SeqCst))
    }

    /// Returns the oldest snapshot any running transaction reads at.
    ///
    /// With nothing running this is the current commit id.
    pub fn oldest_active_commit_id(&self) -> CommitId {
        let running = self.running.read();
        running
            .values()
            .map(|txn| txn.begin_cid)
            .min()
            .unwrap_or_else(|| self.current_commit_id())
    }

    /// Returns the number of running transactions.
    pub fn active_count(&self) -> usize {
        self.running.read().len()
    }

    fn next_commit_id(&self) -> CommitId {
        CommitId::new(self.commit_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Begins a new transaction.
    pub fn begin(&self) -> Transaction {
        self.begin_inner(false)
    }

    /// Begins a transaction that may only read.
    ///
    /// Writes and ownership-acquiring reads are rejected with
    /// [`CoreError::InvalidOperation`].
    pub fn begin_read_only(&self) -> Transaction {
        self.begin_inner(true)
    }

    fn begin_inner(&self, read_only: bool) -> Transaction {
        let txn_id = TxnId::new(self.next_txn_id.fetch_add(1, Ordering::SeqCst));

        // Snapshot and registration happen under one lock so the collector
        // never computes a safe point that misses this transaction.
        let txn = {
            let mut running = self.running.write();
            let begin_cid = self.current_commit_id();
            let txn = Transaction::new(txn_id, begin_cid, self.config.isolation, read_only);
            running.insert(
                txn_id,
                RunningTxn {
                    begin_cid,
                    dependency: txn.dependency().cloned(),
                },
            );
            txn
        };

        self.stats.record_start();
        debug!(txn = %txn_id, begin = %txn.begin_commit_id(), read_only, "begin transaction");
        txn
    }

    // === Ownership ===

    /// Returns true if `txn` owns the slot at `location`.
    pub fn is_owner(&self, txn: &Transaction, location: ItemPointer) -> CoreResult<bool> {
        Ok(self.store.slot(location)?.owner() == txn.id())
    }

    /// Returns true if the slot at `location` is a stable, open chain head.
    pub fn is_ownable(&self, location: ItemPointer) -> CoreResult<bool> {
        Ok(Self::ownable(&self.store.slot(location)?))
    }

    fn ownable(slot: &SlotRef<'_>) -> bool {
        slot.owner() == TxnId::UNLOCKED && slot.end_commit_id() == CommitId::INFINITY
    }

    /// Takes ownership of the slot at `location` for `txn`.
    ///
    /// On success the slot is tracked as an owned read, released at commit or
    /// abort. Returns false and sets the transaction's result to
    /// [`TxnResult::Failure`] if another transaction got there first or the
    /// version stopped being the chain head.
    pub fn acquire_ownership(
        &self,
        txn: &mut Transaction,
        location: ItemPointer,
    ) -> CoreResult<bool> {
        txn.ensure_active()?;
        let slot = self.store.slot(location)?;
        if !self.acquire_slot(txn, &slot) {
            return Ok(false);
        }
        txn.record_read_own(location);
        Ok(true)
    }

    fn acquire_slot(&self, txn: &mut Transaction, slot: &SlotRef<'_>) -> bool {
        if !slot.compare_and_set_owner(TxnId::UNLOCKED, txn.id()) {
            trace!(txn = %txn.id(), location = %slot.location(), owner = %slot.owner(), "ownership CAS lost");
            self.conflict(txn);
            return false;
        }
        // A committer may have closed the version between the caller's
        // ownable check and our CAS.
        if slot.end_commit_id() != CommitId::INFINITY {
            slot.compare_and_set_owner(txn.id(), TxnId::UNLOCKED);
            warn!(txn = %txn.id(), location = %slot.location(), "acquired a version that is no longer the chain head");
            self.conflict(txn);
            return false;
        }
        true
    }

    fn conflict(&self, txn: &mut Transaction) {
        txn.set_result(TxnResult::Failure);
        self.stats.record_ownership_conflict();
    }

    /// Gives up ownership of a slot `txn` acquired but did not write.
    pub fn yield_ownership(&self, txn: &mut Transaction, location: ItemPointer) -> CoreResult<()> {
        txn.ensure_active()?;
        let slot = self.store.slot(location)?;
        assert!(
            slot.owner() == txn.id(),
            "{} yields slot {location} owned by {}",
            txn.id(),
            slot.owner()
        );
        assert!(
            matches!(txn.rw_type(location), None | Some(RwType::Read | RwType::ReadOwn)),
            "{} yields slot {location} it already wrote",
            txn.id()
        );
        slot.set_owner(TxnId::UNLOCKED);
        txn.release_read_own(location);
        trace!(txn = %txn.id(), %location, "yielded ownership");
        Ok(())
    }

    // === Visibility ===

    /// Classifies the version at `location` for `txn`'s snapshot.
    pub fn is_visible(&self, txn: &Transaction, location: ItemPointer) -> CoreResult<Visibility> {
        let slot = self.store.slot(location)?;
        Ok(self.visibility_of(txn, &slot))
    }

    fn visibility_of(&self, txn: &Transaction, slot: &SlotRef<'_>) -> Visibility {
        let owner = slot.owner();
        let begin = slot.begin_commit_id();
        let end = slot.end_commit_id();

        if owner == txn.id() {
            if begin == CommitId::INFINITY {
                return if end == CommitId::INVALID {
                    Visibility::Deleted
                } else {
                    Visibility::Visible
                };
            }
            // An older version this transaction holds is hidden behind its
            // own newer version, if it made one.
            let newer = slot.prev_pointer();
            let superseded = !newer.is_null()
                && self
                    .store
                    .slot(newer)
                    .is_ok_and(|newer| newer.owner() == txn.id());
            return if superseded {
                Visibility::Invisible
            } else {
                Visibility::Visible
            };
        }

        if owner == TxnId::INVALID {
            // Dead slot, or a published tombstone.
            if end == CommitId::INVALID
                && begin != CommitId::INFINITY
                && begin <= txn.begin_commit_id()
            {
                return Visibility::Deleted;
            }
            return Visibility::Invisible;
        }

        if begin == CommitId::INFINITY {
            // Another transaction's uncommitted version.
            return Visibility::Invisible;
        }

        if CommitId::within(txn.begin_commit_id(), begin, end) {
            Visibility::Visible
        } else {
            Visibility::Invisible
        }
    }

    /// Walks the chain behind `indirection` and returns the version `txn` must read.
    ///
    /// Returns `None` if the row does not exist or is deleted in `txn`'s snapshot.
    pub fn visible_version(
        &self,
        txn: &Transaction,
        indirection: IndirectionId,
    ) -> CoreResult<Option<ItemPointer>> {
        let mut outcome = Visibility::Invisible;
        let found = self.store.traverse(indirection, |_, slot| {
            outcome = self.visibility_of(txn, slot);
            outcome != Visibility::Invisible
        })?;
        Ok(found.filter(|_| outcome == Visibility::Visible))
    }

    // === Reads and writes ===

    /// Records a read of the version at `location`.
    ///
    /// With `acquire_ownership` the read also takes ownership of the version
    /// (select for update). Returns false if that fails; the caller must abort.
    pub fn perform_read(
        &self,
        txn: &mut Transaction,
        location: ItemPointer,
        acquire_ownership: bool,
    ) -> CoreResult<bool> {
        txn.ensure_active()?;

        if txn.is_declared_read_only() {
            if acquire_ownership {
                return Err(CoreError::invalid_operation(format!(
                    "{} was declared read-only and cannot acquire {location}",
                    txn.id()
                )));
            }
            txn.record_read(location);
            return Ok(true);
        }

        let slot = self.store.slot(location)?;
        let owner = slot.owner();
        if owner == txn.id() {
            // Already tracked by the operation that took ownership.
            return Ok(true);
        }

        if acquire_ownership {
            if !Self::ownable(&slot) {
                trace!(txn = %txn.id(), %location, %owner, "slot not ownable");
                self.conflict(txn);
                return Ok(false);
            }
            if !self.acquire_slot(txn, &slot) {
                return Ok(false);
            }
            txn.record_read_own(location);
            trace!(txn = %txn.id(), %location, "read with ownership");
            return Ok(true);
        }

        if owner.is_live() {
            self.register_dependency(txn, owner);
        }
        txn.record_read(location);
        trace!(txn = %txn.id(), %location, "read");
        Ok(true)
    }

    fn register_dependency(&self, txn: &mut Transaction, owner: TxnId) {
        let Some(dependency) = txn.dependency().cloned() else {
            return;
        };
        if txn.check_dependency(owner) {
            return;
        }
        let owner_dependency = self
            .running
            .read()
            .get(&owner)
            .and_then(|running| running.dependency.clone());
        if let Some(owner_dependency) = owner_dependency {
            if owner_dependency.register_dependency(txn.id(), &dependency) {
                txn.record_dependency(owner);
                trace!(txn = %txn.id(), %owner, "registered commit dependency");
            }
        }
    }

    /// Claims the virgin slot at `location` as a new row reachable from `indirection`.
    ///
    /// # Panics
    ///
    /// Panics if the slot is not virgin.
    pub fn perform_insert(
        &self,
        txn: &mut Transaction,
        location: ItemPointer,
        indirection: IndirectionId,
    ) -> CoreResult<()> {
        txn.ensure_writable()?;
        let slot = self.store.slot(location)?;
        assert!(slot.is_virgin(), "insert into non-virgin slot {location}");

        slot.set_owner(txn.id());
        slot.set_indirection(indirection);
        txn.record_insert(location);
        trace!(txn = %txn.id(), %location, %indirection, "insert");
        Ok(())
    }

    /// Installs the virgin slot `new` as the successor of the owned version `old`.
    ///
    /// Returns false if the index entry no longer pointed at `old`; `new` is
    /// then handed to the collector and the caller must abort.
    ///
    /// # Panics
    ///
    /// Panics if `txn` does not own `old`, if `old` is one of `txn`'s own
    /// unpublished versions, or if `new` is not virgin.
    pub fn perform_update(
        &self,
        txn: &mut Transaction,
        old: ItemPointer,
        new: ItemPointer,
    ) -> CoreResult<bool> {
        self.install_successor(txn, old, new, false)
    }

    /// Like [`perform_update`](Self::perform_update), but `new` is a tombstone.
    pub fn perform_delete(
        &self,
        txn: &mut Transaction,
        old: ItemPointer,
        new: ItemPointer,
    ) -> CoreResult<bool> {
        self.install_successor(txn, old, new, true)
    }

    fn install_successor(
        &self,
        txn: &mut Transaction,
        old: ItemPointer,
        new: ItemPointer,
        tombstone: bool,
    ) -> CoreResult<bool> {
        txn.ensure_writable()?;
        let old_slot = self.store.slot(old)?;
        let new_slot = self.store.slot(new)?;
        assert!(
            old_slot.owner() == txn.id(),
            "{} writes slot {old} owned by {}",
            txn.id(),
            old_slot.owner()
        );
        assert!(
            old_slot.begin_commit_id() != CommitId::INFINITY,
            "slot {old} is an unpublished version; write it in place"
        );
        assert!(new_slot.is_virgin(), "new version in non-virgin slot {new}");

        new_slot.set_owner(txn.id());
        new_slot.set_indirection(old_slot.indirection());
        if tombstone {
            new_slot.set_end_commit_id(CommitId::INVALID);
        }
        new_slot.set_next_pointer(old)?;
        old_slot.set_prev_pointer(new)?;

        if !new_slot.compare_and_set_indirection(old, new)? {
            old_slot.set_prev_pointer(ItemPointer::NULL)?;
            new_slot.set_next_pointer(ItemPointer::NULL)?;
            new_slot.set_indirection(IndirectionId::NONE);
            new_slot.set_end_commit_id(CommitId::INFINITY);
            new_slot.set_owner(TxnId::INVALID);
            self.gc.recycle_invalid_version(new);
            warn!(txn = %txn.id(), %old, %new, "index entry no longer points at the updated version");
            txn.set_result(TxnResult::Failure);
            return Ok(false);
        }

        if tombstone {
            txn.record_delete(old);
            trace!(txn = %txn.id(), %old, %new, "delete");
        } else {
            txn.record_update(old);
            trace!(txn = %txn.id(), %old, %new, "update");
        }
        Ok(true)
    }

    /// Records an in-place update of a version `txn` created itself.
    ///
    /// # Panics
    ///
    /// Panics if `location` is not an unpublished version owned by `txn`.
    pub fn perform_local_update(&self, txn: &mut Transaction, location: ItemPointer) -> CoreResult<()> {
        txn.ensure_writable()?;
        let slot = self.own_unpublished(txn, location)?;
        let older = slot.next_pointer();
        if !older.is_null() {
            txn.record_update(older);
        }
        trace!(txn = %txn.id(), %location, "local update");
        Ok(())
    }

    /// Turns a version `txn` created itself into a tombstone.
    ///
    /// If the version is a fresh insert, its entry collapses into
    /// [`RwType::InsertThenDelete`].
    ///
    /// # Panics
    ///
    /// Panics if `location` is not an unpublished version owned by `txn`.
    pub fn perform_local_delete(&self, txn: &mut Transaction, location: ItemPointer) -> CoreResult<()> {
        txn.ensure_writable()?;
        let slot = self.own_unpublished(txn, location)?;
        slot.set_end_commit_id(CommitId::INVALID);
        let older = slot.next_pointer();
        if older.is_null() {
            txn.record_delete(location);
        } else {
            txn.record_delete(older);
        }
        trace!(txn = %txn.id(), %location, "local delete");
        Ok(())
    }

    fn own_unpublished(&self, txn: &Transaction, location: ItemPointer) -> CoreResult<SlotRef<'_>> {
        let slot = self.store.slot(location)?;
        assert!(
            slot.owner() == txn.id(),
            "{} writes slot {location} owned by {}",
            txn.id(),
            slot.owner()
        );
        assert!(
            slot.begin_commit_id() == CommitId::INFINITY,
            "slot {location} is published; install a new version instead"
        );
        Ok(slot)
    }

    // === Commit and abort ===

    /// Validates and publishes `txn`.
    ///
    /// Returns [`TxnResult::Success`] if every write is now visible at the
    /// transaction's end commit id, or [`TxnResult::Aborted`] if validation
    /// failed and the transaction was rolled back instead.
    pub fn commit(&self, txn: &mut Transaction) -> CoreResult<TxnResult> {
        txn.ensure_active()?;

        if txn.result() == TxnResult::Failure {
            debug!(txn = %txn.id(), "commit of a failed transaction; aborting");
            return self.abort_inner(txn);
        }

        if let Some(dependency) = txn.dependency() {
            if !dependency.is_resolved() {
                debug!(
                    txn = %txn.id(),
                    cascading = dependency.is_cascading_abort(),
                    pending = dependency.pending(),
                    "dependency unresolved at commit"
                );
                self.stats.record_cascading_abort();
                return self.abort_inner(txn);
            }
        }

        if txn.is_read_only() {
            return self.commit_read_only(txn);
        }

        let end_cid = self.next_commit_id();
        let entries: Vec<_> = txn.read_write_set().collect();

        for &(location, rw) in &entries {
            if matches!(rw, RwType::Insert | RwType::InsertThenDelete) {
                continue;
            }
            let slot = self.store.slot(location)?;
            let owner = slot.owner();
            if owner == txn.id() {
                continue;
            }
            if owner == TxnId::UNLOCKED
                && CommitId::within(end_cid, slot.begin_commit_id(), slot.end_commit_id())
            {
                continue;
            }
            debug!(txn = %txn.id(), %location, ?rw, %owner, %end_cid, "validation failed");
            self.stats.record_validation_abort();
            return self.roll_back(txn, end_cid);
        }

        let txn_id = txn.id();
        self.log.log(LogRecord::BeginTransaction {
            txn_id,
            commit_id: end_cid,
        });

        for (location, rw) in entries {
            let slot = self.store.slot(location)?;
            match rw {
                RwType::Read => {}
                RwType::ReadOwn => {
                    slot.compare_and_set_owner(txn_id, TxnId::UNLOCKED);
                }
                RwType::Update | RwType::Delete => {
                    let new = slot.prev_pointer();
                    let new_slot = self.store.slot(new)?;
                    let tombstone = rw == RwType::Delete;

                    if !tombstone {
                        new_slot.set_end_commit_id(CommitId::INFINITY);
                    }
                    new_slot.set_begin_commit_id(end_cid);
                    fence(Ordering::SeqCst);
                    slot.set_end_commit_id(end_cid);
                    fence(Ordering::SeqCst);
                    new_slot.set_owner(if tombstone {
                        TxnId::INVALID
                    } else {
                        TxnId::UNLOCKED
                    });
                    slot.set_owner(TxnId::UNLOCKED);

                    self.log.log(if tombstone {
                        LogRecord::Delete {
                            txn_id,
                            old: location,
                            new,
                        }
                    } else {
                        LogRecord::Update {
                            txn_id,
                            old: location,
                            new,
                        }
                    });
                    self.gc.recycle_old_version(location, end_cid);
                    if tombstone {
                        self.gc.recycle_tombstone(new, end_cid);
                    }
                }
                RwType::Insert => {
                    slot.set_end_commit_id(CommitId::INFINITY);
                    slot.set_begin_commit_id(end_cid);
                    fence(Ordering::SeqCst);
                    slot.set_owner(TxnId::UNLOCKED);
                    self.log.log(LogRecord::Insert { txn_id, location });
                }
                RwType::InsertThenDelete => {
                    slot.set_begin_commit_id(CommitId::INFINITY);
                    slot.set_end_commit_id(CommitId::INFINITY);
                    fence(Ordering::SeqCst);
                    slot.set_owner(TxnId::INVALID);
                    self.gc.recycle_invalid_version(location);
                }
            }
        }

        self.log.log(LogRecord::CommitTransaction {
            txn_id,
            commit_id: end_cid,
        });
        self.finish(txn, Some(end_cid), false);
        self.stats.record_commit(false);
        debug!(txn = %txn_id, %end_cid, "committed");
        Ok(TxnResult::Success)
    }

    fn commit_read_only(&self, txn: &mut Transaction) -> CoreResult<TxnResult> {
        let begin_cid = txn.begin_commit_id();
        let reads: Vec<_> = txn.read_write_set().map(|(location, _)| location).collect();
        for location in reads {
            let slot = self.store.slot(location)?;
            let stable = slot.owner() == TxnId::UNLOCKED
                && CommitId::within(begin_cid, slot.begin_commit_id(), slot.end_commit_id());
            if !stable {
                debug!(txn = %txn.id(), %location, "read validation failed");
                self.stats.record_read_abort();
                return self.abort_inner(txn);
            }
        }

        self.finish(txn, None, false);
        self.stats.record_commit(true);
        debug!(txn = %txn.id(), "committed read-only");
        Ok(TxnResult::Success)
    }

    /// Rolls back `txn`, leaving every touched row as it was before.
    pub fn abort(&self, txn: &mut Transaction) -> CoreResult<TxnResult> {
        txn.ensure_active()?;
        self.abort_inner(txn)
    }

    fn abort_inner(&self, txn: &mut Transaction) -> CoreResult<TxnResult> {
        let abort_cid = self.next_commit_id();
        self.roll_back(txn, abort_cid)
    }

    /// Undoes every write of `txn` and finishes it at `abort_cid`, an id
    /// the caller already drew for this transaction.
    fn roll_back(&self, txn: &mut Transaction, abort_cid: CommitId) -> CoreResult<TxnResult> {
        let txn_id = txn.id();
        let entries: Vec<_> = txn.read_write_set().collect();

        for (location, rw) in entries {
            let slot = self.store.slot(location)?;
            match rw {
                RwType::Read => {}
                RwType::ReadOwn => {
                    slot.compare_and_set_owner(txn_id, TxnId::UNLOCKED);
                }
                RwType::Update | RwType::Delete => {
                    let new = slot.prev_pointer();
                    let new_slot = self.store.slot(new)?;

                    new_slot.set_begin_commit_id(CommitId::INFINITY);
                    new_slot.set_end_commit_id(CommitId::INFINITY);
                    new_slot.set_owner(TxnId::INVALID);
                    fence(Ordering::SeqCst);
                    slot.set_end_commit_id(CommitId::INFINITY);

                    // Readers must be sent to the old version before it
                    // stops pointing at the new one.
                    if !new_slot.compare_and_set_indirection(new, location)? {
                        warn!(txn = %txn_id, %location, %new, "index entry did not point at the aborted version");
                    }
                    slot.set_prev_pointer(ItemPointer::NULL)?;
                    fence(Ordering::SeqCst);
                    slot.set_owner(TxnId::UNLOCKED);

                    // Still linked from the chain; only the collector may unlink it.
                    self.gc.recycle_invalid_version(new);
                }
                RwType::Insert | RwType::InsertThenDelete => {
                    slot.set_begin_commit_id(CommitId::INFINITY);
                    slot.set_end_commit_id(CommitId::INFINITY);
                    fence(Ordering::SeqCst);
                    slot.set_owner(TxnId::INVALID);
                    self.gc.recycle_invalid_version(location);
                }
            }
        }

        self.finish(txn, Some(abort_cid), true);
        self.stats.record_abort();
        debug!(txn = %txn_id, %abort_cid, "aborted");
        Ok(TxnResult::Aborted)
    }

    fn finish(&self, txn: &mut Transaction, commit_id: Option<CommitId>, aborted: bool) {
        self.gc.notify_end_of_transaction(commit_id);
        self.stats.record_gc_notification();

        self.running.write().remove(&txn.id());
        if let Some(dependency) = txn.dependency() {
            let released = dependency.finish(aborted);
            if released > 0 {
                trace!(txn = %txn.id(), released, aborted, "released dependents");
            }
        }

        if aborted {
            txn.mark_aborted();
        } else {
            txn.mark_committed(commit_id);
        }
    }

    // === Garbage collection ===

    /// Runs one garbage collection pass and returns the number of slots reclaimed.
    pub fn collect_garbage(&self) -> CoreResult<usize> {
        let (safe_point, now) = {
            let running = self.running.read();
            let now = self.current_commit_id();
            let safe_point = running
                .values()
                .map(|txn| txn.begin_cid)
                .min()
                .unwrap_or_else(|| now.next());
            (safe_point, now)
        };
        let reclaimed = self.gc.collect(&self.store, safe_point, now)?;
        self.stats.record_reclaimed(reclaimed as u64);
        Ok(reclaimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcMode;
    use crate::wal::MemoryLogManager;
    use std::sync::Barrier;
    use std::thread;

    fn create_manager() -> TransactionManager {
        TransactionManager::new(Config::new().gc_mode(GcMode::Off))
    }

    fn insert_row(manager: &TransactionManager, txn: &mut Transaction) -> (ItemPointer, IndirectionId) {
        let store = manager.store();
        let location = store.allocate_slot().unwrap();
        let indirection = store.allocate_indirection(location).unwrap();
        manager.perform_insert(txn, location, indirection).unwrap();
        (location, indirection)
    }

    fn committed_row(manager: &TransactionManager) -> (ItemPointer, IndirectionId) {
        let mut txn = manager.begin();
        let row = insert_row(manager, &mut txn);
        assert_eq!(manager.commit(&mut txn).unwrap(), TxnResult::Success);
        row
    }

    fn update_row(
        manager: &TransactionManager,
        txn: &mut Transaction,
        indirection: IndirectionId,
    ) -> (ItemPointer, ItemPointer) {
        let old = manager.visible_version(txn, indirection).unwrap().unwrap();
        assert!(manager.perform_read(txn, old, true).unwrap());
        let new = manager.store().allocate_slot().unwrap();
        assert!(manager.perform_update(txn, old, new).unwrap());
        (old, new)
    }

    /// Draws commit ids with empty aborts until the counter reaches `cid`.
    fn advance_to(manager: &TransactionManager, cid: u64) {
        while manager.current_commit_id() < CommitId::new(cid) {
            let mut txn = manager.begin();
            manager.abort(&mut txn).unwrap();
        }
    }

    #[test]
    fn begin_creates_transaction() {
        let manager = TransactionManager::with_state(Config::default(), 7, 10);
        let txn = manager.begin();
        assert_eq!(txn.id(), TxnId::new(7));
        assert_eq!(txn.begin_commit_id(), CommitId::new(10));
        assert!(txn.is_active());
        assert_eq!(manager.active_count(), 1);
        assert_eq!(manager.oldest_active_commit_id(), CommitId::new(10));
    }

    #[test]
    fn insert_commit_publishes_version() {
        let manager = TransactionManager::with_state(Config::new().gc_mode(GcMode::Off), 2, 10);
        let mut t1 = manager.begin();
        let (x, _) = insert_row(&manager, &mut t1);

        let slot = manager.store().slot(x).unwrap();
        assert_eq!(slot.owner(), t1.id());
        assert_eq!(slot.begin_commit_id(), CommitId::INFINITY);
        assert_eq!(slot.end_commit_id(), CommitId::INFINITY);

        assert_eq!(manager.commit(&mut t1).unwrap(), TxnResult::Success);
        assert_eq!(t1.end_commit_id(), Some(CommitId::new(11)));
        assert_eq!(slot.begin_commit_id(), CommitId::new(11));
        assert_eq!(slot.end_commit_id(), CommitId::INFINITY);
        assert_eq!(slot.owner(), TxnId::UNLOCKED);
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn snapshot_reads_see_interval_owner() {
        let manager = TransactionManager::with_state(Config::new().gc_mode(GcMode::Off), 2, 10);
        let (x, indirection) = committed_row(&manager);

        advance_to(&manager, 15);
        let mut t3 = manager.begin();
        let (_, x2) = update_row(&manager, &mut t3, indirection);

        advance_to(&manager, 18);
        let t4 = manager.begin();
        advance_to(&manager, 19);
        assert_eq!(manager.commit(&mut t3).unwrap(), TxnResult::Success);
        assert_eq!(t3.end_commit_id(), Some(CommitId::new(20)));
        advance_to(&manager, 21);
        let t5 = manager.begin();

        let old = manager.store().slot(x).unwrap();
        assert_eq!(old.begin_commit_id(), CommitId::new(11));
        assert_eq!(old.end_commit_id(), CommitId::new(20));
        let new = manager.store().slot(x2).unwrap();
        assert_eq!(new.begin_commit_id(), CommitId::new(20));
        assert_eq!(new.end_commit_id(), CommitId::INFINITY);

        assert_eq!(manager.visible_version(&t4, indirection).unwrap(), Some(x));
        assert_eq!(manager.visible_version(&t5, indirection).unwrap(), Some(x2));
    }

    #[test]
    fn writer_sees_its_own_version() {
        let manager = create_manager();
        let (x, indirection) = committed_row(&manager);
        let reader = manager.begin();

        let mut writer = manager.begin();
        let (_, x2) = update_row(&manager, &mut writer, indirection);

        assert_eq!(manager.visible_version(&writer, indirection).unwrap(), Some(x2));
        assert_eq!(manager.is_visible(&writer, x).unwrap(), Visibility::Invisible);
        assert_eq!(manager.visible_version(&reader, indirection).unwrap(), Some(x));
    }

    #[test]
    fn ownership_race_has_single_winner() {
        let manager = Arc::new(create_manager());
        let (x, _) = committed_row(&manager);
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let mut txn = manager.begin();
                    barrier.wait();
                    let acquired = manager.perform_read(&mut txn, x, true).unwrap();
                    let result = txn.result();
                    barrier.wait();
                    if acquired {
                        manager.commit(&mut txn).unwrap();
                    } else {
                        manager.abort(&mut txn).unwrap();
                    }
                    (acquired, result)
                })
            })
            .collect();

        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(outcomes.iter().filter(|(won, _)| *won).count(), 1);
        let (_, loser_result) = outcomes.iter().find(|(won, _)| !*won).unwrap();
        assert_eq!(*loser_result, TxnResult::Failure);
        assert_eq!(manager.stats().ownership_conflicts(), 1);
        assert_eq!(manager.store().slot(x).unwrap().owner(), TxnId::UNLOCKED);
    }

    #[test]
    fn acquire_rejects_closed_version() {
        let manager = create_manager();
        let (x, indirection) = committed_row(&manager);

        let mut writer = manager.begin();
        update_row(&manager, &mut writer, indirection);
        manager.commit(&mut writer).unwrap();

        let mut late = manager.begin();
        assert!(!manager.is_ownable(x).unwrap());
        assert!(!manager.acquire_ownership(&mut late, x).unwrap());
        assert_eq!(late.result(), TxnResult::Failure);
        assert_eq!(manager.store().slot(x).unwrap().owner(), TxnId::UNLOCKED);
        assert_eq!(manager.commit(&mut late).unwrap(), TxnResult::Aborted);
    }

    #[test]
    fn abort_restores_update() {
        let manager = create_manager();
        let (y, indirection) = committed_row(&manager);

        let mut t8 = manager.begin();
        let (_, y2) = update_row(&manager, &mut t8, indirection);
        assert_eq!(manager.abort(&mut t8).unwrap(), TxnResult::Aborted);

        let old = manager.store().slot(y).unwrap();
        let new = manager.store().slot(y2).unwrap();
        assert_eq!(old.end_commit_id(), CommitId::INFINITY);
        assert_eq!(old.owner(), TxnId::UNLOCKED);
        assert!(old.prev_pointer().is_null());
        assert_eq!(new.owner(), TxnId::INVALID);
        assert_eq!(new.begin_commit_id(), CommitId::INFINITY);
        assert_eq!(
            manager.store().indirection_head(indirection).unwrap().pointer(),
            y
        );

        let reader = manager.begin();
        assert_eq!(manager.visible_version(&reader, indirection).unwrap(), Some(y));
    }

    #[test]
    fn delete_commit_leaves_tombstone() {
        let manager = create_manager();
        let (x, indirection) = committed_row(&manager);
        let before = manager.begin();

        let mut deleter = manager.begin();
        assert!(manager.perform_read(&mut deleter, x, true).unwrap());
        let tombstone = manager.store().allocate_slot().unwrap();
        assert!(manager.perform_delete(&mut deleter, x, tombstone).unwrap());
        assert_eq!(deleter.rw_type(x), Some(RwType::Delete));
        assert_eq!(manager.is_visible(&deleter, tombstone).unwrap(), Visibility::Deleted);
        manager.commit(&mut deleter).unwrap();
        let cid = deleter.end_commit_id().unwrap();

        let slot = manager.store().slot(tombstone).unwrap();
        assert_eq!(slot.begin_commit_id(), cid);
        assert_eq!(slot.end_commit_id(), CommitId::INVALID);
        assert_eq!(slot.owner(), TxnId::INVALID);
        assert_eq!(manager.store().slot(x).unwrap().end_commit_id(), cid);

        let after = manager.begin();
        assert_eq!(manager.visible_version(&after, indirection).unwrap(), None);
        assert_eq!(manager.is_visible(&after, tombstone).unwrap(), Visibility::Deleted);
        assert_eq!(manager.visible_version(&before, indirection).unwrap(), Some(x));
    }

    #[test]
    fn insert_then_delete_leaves_nothing() {
        let manager = create_manager();
        let mut txn = manager.begin();
        let (x, indirection) = insert_row(&manager, &mut txn);
        manager.perform_local_update(&mut txn, x).unwrap();
        manager.perform_local_delete(&mut txn, x).unwrap();
        assert_eq!(txn.rw_type(x), Some(RwType::InsertThenDelete));

        assert_eq!(manager.commit(&mut txn).unwrap(), TxnResult::Success);
        assert!(manager.store().slot(x).unwrap().is_virgin());

        let reader = manager.begin();
        assert_eq!(manager.visible_version(&reader, indirection).unwrap(), None);
    }

    #[test]
    fn local_delete_after_update_becomes_delete() {
        let manager = create_manager();
        let (x, indirection) = committed_row(&manager);
        let mut txn = manager.begin();
        let (_, x2) = update_row(&manager, &mut txn, indirection);

        manager.perform_local_delete(&mut txn, x2).unwrap();
        assert_eq!(txn.rw_type(x), Some(RwType::Delete));
        manager.commit(&mut txn).unwrap();

        let reader = manager.begin();
        assert_eq!(manager.visible_version(&reader, indirection).unwrap(), None);
    }

    #[test]
    fn read_validation_aborts_reader_of_owned_version() {
        let manager = create_manager();
        let (x, _) = committed_row(&manager);

        let mut reader = manager.begin();
        assert!(manager.perform_read(&mut reader, x, false).unwrap());

        // A writer takes the version and still holds it when the reader commits.
        let mut writer = manager.begin();
        assert!(manager.acquire_ownership(&mut writer, x).unwrap());

        assert_eq!(manager.commit(&mut reader).unwrap(), TxnResult::Aborted);
        assert_eq!(manager.stats().read_aborts(), 1);
        assert_eq!(manager.stats().validation_aborts(), 0);
        assert_eq!(manager.store().slot(x).unwrap().owner(), writer.id());

        assert_eq!(manager.commit(&mut writer).unwrap(), TxnResult::Success);
    }

    #[test]
    fn closed_version_still_validates_at_snapshot() {
        let manager = create_manager();
        let (x, indirection) = committed_row(&manager);

        let mut reader = manager.begin();
        assert!(manager.perform_read(&mut reader, x, false).unwrap());

        let mut writer = manager.begin();
        update_row(&manager, &mut writer, indirection);
        manager.commit(&mut writer).unwrap();

        assert_eq!(manager.commit(&mut reader).unwrap(), TxnResult::Success);
        assert_eq!(manager.stats().read_aborts(), 0);
    }

    #[test]
    fn reader_validates_against_end_commit_id() {
        let manager = create_manager();
        let (x, indirection) = committed_row(&manager);
        let (other, _) = committed_row(&manager);

        let mut txn = manager.begin();
        assert!(manager.perform_read(&mut txn, x, false).unwrap());
        assert!(manager.perform_read(&mut txn, other, true).unwrap());

        let mut writer = manager.begin();
        update_row(&manager, &mut writer, indirection);
        manager.commit(&mut writer).unwrap();

        let before = manager.current_commit_id();
        assert_eq!(manager.commit(&mut txn).unwrap(), TxnResult::Aborted);
        assert_eq!(manager.store().slot(other).unwrap().owner(), TxnId::UNLOCKED);
        assert_eq!(manager.stats().validation_aborts(), 1);
        assert_eq!(manager.stats().read_aborts(), 0);
        // The failed commit spends exactly one commit id.
        assert_eq!(manager.current_commit_id(), before.next());
    }

    #[test]
    fn yield_releases_ownership() {
        let manager = create_manager();
        let (x, _) = committed_row(&manager);

        let mut txn = manager.begin();
        assert!(manager.perform_read(&mut txn, x, true).unwrap());
        assert!(manager.is_owner(&txn, x).unwrap());
        manager.yield_ownership(&mut txn, x).unwrap();
        assert_eq!(txn.rw_type(x), Some(RwType::Read));

        let mut other = manager.begin();
        assert!(manager.acquire_ownership(&mut other, x).unwrap());
        manager.abort(&mut other).unwrap();
        assert_eq!(manager.commit(&mut txn).unwrap(), TxnResult::Success);
    }

    #[test]
    fn commit_twice_is_an_error() {
        let manager = create_manager();
        let mut txn = manager.begin();
        manager.commit(&mut txn).unwrap();
        assert!(matches!(
            manager.commit(&mut txn),
            Err(CoreError::TransactionNotActive { .. })
        ));
        assert!(manager.abort(&mut txn).is_err());
    }

    #[test]
    fn declared_read_only_rejects_writes() {
        let manager = create_manager();
        let (x, _) = committed_row(&manager);
        let mut txn = manager.begin_read_only();

        assert!(manager.perform_read(&mut txn, x, false).unwrap());
        assert!(manager.perform_read(&mut txn, x, true).is_err());
        let slot = manager.store().allocate_slot().unwrap();
        let indirection = manager.store().allocate_indirection(slot).unwrap();
        assert!(matches!(
            manager.perform_insert(&mut txn, slot, indirection),
            Err(CoreError::InvalidOperation { .. })
        ));
        assert_eq!(manager.commit(&mut txn).unwrap(), TxnResult::Success);
    }

    #[test]
    #[should_panic(expected = "non-virgin")]
    fn insert_into_used_slot_panics() {
        let manager = create_manager();
        let (x, indirection) = committed_row(&manager);
        let mut txn = manager.begin();
        manager.perform_insert(&mut txn, x, indirection).unwrap();
    }

    #[test]
    #[should_panic(expected = "owned by")]
    fn update_without_ownership_panics() {
        let manager = create_manager();
        let (x, _) = committed_row(&manager);
        let mut txn = manager.begin();
        let new = manager.store().allocate_slot().unwrap();
        let _ = manager.perform_update(&mut txn, x, new);
    }

    #[test]
    fn every_finish_notifies_gc_once() {
        let manager = create_manager();
        committed_row(&manager);
        let mut aborted = manager.begin();
        manager.abort(&mut aborted).unwrap();
        let mut read_only = manager.begin();
        manager.commit(&mut read_only).unwrap();

        assert_eq!(manager.stats().gc_notifications(), 3);
        assert_eq!(manager.stats().transactions_started(), 3);
    }

    #[test]
    fn commit_logs_publish_steps_in_order() {
        let log = Arc::new(MemoryLogManager::new());
        let manager = create_manager().with_log_manager(log.clone());
        let (x, indirection) = committed_row(&manager);

        let mut txn = manager.begin();
        let (_, x2) = update_row(&manager, &mut txn, indirection);
        manager.commit(&mut txn).unwrap();
        let cid = txn.end_commit_id().unwrap();

        assert_eq!(
            log.records_for(txn.id()),
            vec![
                LogRecord::BeginTransaction {
                    txn_id: txn.id(),
                    commit_id: cid
                },
                LogRecord::Update {
                    txn_id: txn.id(),
                    old: x,
                    new: x2
                },
                LogRecord::CommitTransaction {
                    txn_id: txn.id(),
                    commit_id: cid
                },
            ]
        );
    }

    #[test]
    fn aborted_owner_cascades_to_reader() {
        let manager =
            TransactionManager::new(Config::new().isolation(IsolationLevel::OptimisticWithDependencyTracking));
        let (x, _) = committed_row(&manager);

        let mut owner = manager.begin();
        assert!(manager.perform_read(&mut owner, x, true).unwrap());

        let mut reader = manager.begin();
        assert!(manager.perform_read(&mut reader, x, false).unwrap());
        assert!(reader.check_dependency(owner.id()));

        manager.abort(&mut owner).unwrap();
        assert!(reader.is_cascading_abort());
        assert_eq!(manager.commit(&mut reader).unwrap(), TxnResult::Aborted);
        assert_eq!(manager.stats().cascading_aborts(), 1);
    }

    #[test]
    fn committed_owner_releases_reader() {
        let manager =
            TransactionManager::new(Config::new().isolation(IsolationLevel::OptimisticWithDependencyTracking));
        let (x, _) = committed_row(&manager);

        let mut owner = manager.begin();
        assert!(manager.perform_read(&mut owner, x, true).unwrap());
        let mut reader = manager.begin();
        assert!(manager.perform_read(&mut reader, x, false).unwrap());

        // Still pending: the reader may not commit ahead of its owner.
        let dependency = reader.dependency().unwrap();
        assert_eq!(dependency.pending(), 1);

        manager.commit(&mut owner).unwrap();
        assert_eq!(dependency.pending(), 0);
        assert_eq!(manager.commit(&mut reader).unwrap(), TxnResult::Success);
    }

    #[test]
    fn collect_garbage_reclaims_superseded_version() {
        let manager = TransactionManager::new(Config::default());
        let (x, indirection) = committed_row(&manager);

        let mut writer = manager.begin();
        let (_, x2) = update_row(&manager, &mut writer, indirection);
        // A snapshot from before the update pins the old version.
        let mut pinned = manager.begin();
        manager.commit(&mut writer).unwrap();

        assert_eq!(manager.collect_garbage().unwrap(), 0);
        assert_eq!(manager.collect_garbage().unwrap(), 0);
        assert_eq!(manager.visible_version(&pinned, indirection).unwrap(), Some(x));
        manager.commit(&mut pinned).unwrap();

        // Unlink, then reclaim on the following pass.
        assert_eq!(manager.collect_garbage().unwrap(), 0);
        assert!(manager.store().slot(x2).unwrap().next_pointer().is_null());
        assert_eq!(manager.collect_garbage().unwrap(), 1);
        assert!(manager.store().slot(x).unwrap().is_virgin());
        assert_eq!(manager.stats().versions_reclaimed(), 1);

        let reader = manager.begin();
        assert_eq!(manager.visible_version(&reader, indirection).unwrap(), Some(x2));
    }

    #[test]
    fn deleted_rows_return_their_slots() {
        let manager = TransactionManager::new(Config::default());
        for _ in 0..20 {
            let (x, indirection) = committed_row(&manager);
            let mut deleter = manager.begin();
            assert!(manager.perform_read(&mut deleter, x, true).unwrap());
            let tombstone = manager.store().allocate_slot().unwrap();
            assert!(manager.perform_delete(&mut deleter, x, tombstone).unwrap());
            assert_eq!(manager.commit(&mut deleter).unwrap(), TxnResult::Success);

            manager.collect_garbage().unwrap();
            assert_eq!(manager.collect_garbage().unwrap(), 2);
            assert!(manager.store().versions(indirection).unwrap().is_empty());
        }

        let group = manager.store().resolve(0).unwrap();
        assert_eq!(group.allocated_count(), 2);
        assert_eq!(group.free_count(), 2);
        assert_eq!(manager.garbage_collector().pending(), 0);
        assert_eq!(manager.stats().versions_reclaimed(), 40);
    }
}
