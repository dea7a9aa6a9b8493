//! Transaction state.

use crate::config::IsolationLevel;
use crate::error::{CoreError, CoreResult};
use crate::transaction::dependency::DependencyState;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tessera_storage::{CommitId, ItemPointer, TxnId};

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been aborted.
    Aborted,
}

/// Outcome reported to the execution engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnResult {
    /// No conflict so far, or the commit succeeded.
    Success,
    /// An ownership acquisition failed; the caller must abort.
    Failure,
    /// The transaction was rolled back.
    Aborted,
}

impl TxnResult {
    /// Returns true for [`TxnResult::Success`].
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for TxnResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Failure => f.write_str("failure"),
            Self::Aborted => f.write_str("aborted"),
        }
    }
}

/// How a transaction touched a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RwType {
    /// Snapshot read; validated at commit.
    Read,
    /// Read that holds ownership of the slot (select for update).
    ReadOwn,
    /// Slot inserted by this transaction.
    Insert,
    /// Older version superseded by a new version of this transaction.
    Update,
    /// Older version superseded by a tombstone of this transaction.
    Delete,
    /// Slot inserted and deleted by this transaction; never externally visible.
    InsertThenDelete,
}

impl RwType {
    /// Returns true for every entry that commit or abort must install or undo.
    pub const fn is_write(self) -> bool {
        !matches!(self, Self::Read)
    }
}

/// An active transaction.
///
/// A transaction is mutated only by the thread that runs it. Everything
/// other threads need to see about it lives in the version store (slot
/// owner fields) or in its shared [`DependencyState`].
#[derive(Debug)]
pub struct Transaction {
    id: TxnId,
    begin_cid: CommitId,
    end_cid: Option<CommitId>,
    rw_set: HashMap<ItemPointer, RwType>,
    result: TxnResult,
    state: TransactionState,
    declared_read_only: bool,
    isolation: IsolationLevel,
    dependency: Option<Arc<DependencyState>>,
    /// Owners this transaction already registered on.
    depends_on: HashSet<TxnId>,
}

impl Transaction {
    /// Creates a new transaction.
    pub(crate) fn new(
        id: TxnId,
        begin_cid: CommitId,
        isolation: IsolationLevel,
        declared_read_only: bool,
    ) -> Self {
        let dependency = isolation
            .tracks_dependencies()
            .then(|| Arc::new(DependencyState::new()));
        Self {
            id,
            begin_cid,
            end_cid: None,
            rw_set: HashMap::new(),
            result: TxnResult::Success,
            state: TransactionState::Active,
            declared_read_only,
            isolation,
            dependency,
            depends_on: HashSet::new(),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Returns the snapshot commit id.
    #[must_use]
    pub fn begin_commit_id(&self) -> CommitId {
        self.begin_cid
    }

    /// Returns the commit id drawn at commit, if the transaction wrote.
    #[must_use]
    pub fn end_commit_id(&self) -> Option<CommitId> {
        self.end_cid
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Returns the current result.
    #[must_use]
    pub fn result(&self) -> TxnResult {
        self.result
    }

    /// Returns the isolation level the transaction runs under.
    #[must_use]
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Returns true if the transaction was started with `begin_read_only`.
    #[must_use]
    pub fn is_declared_read_only(&self) -> bool {
        self.declared_read_only
    }

    /// Returns true if the read/write set holds no write-class entry.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        !self.rw_set.values().any(|rw| rw.is_write())
    }

    /// Returns true if the transaction inserted, updated or deleted anything.
    #[must_use]
    pub fn is_written(&self) -> bool {
        self.rw_set
            .values()
            .any(|rw| !matches!(rw, RwType::Read | RwType::ReadOwn))
    }

    /// Returns the number of rows this transaction inserted and did not delete again.
    #[must_use]
    pub fn insert_count(&self) -> usize {
        self.rw_set
            .values()
            .filter(|rw| **rw == RwType::Insert)
            .count()
    }

    /// Returns how this transaction touched `location`, if at all.
    #[must_use]
    pub fn rw_type(&self, location: ItemPointer) -> Option<RwType> {
        self.rw_set.get(&location).copied()
    }

    /// Returns the read/write set.
    pub fn read_write_set(&self) -> impl Iterator<Item = (ItemPointer, RwType)> + '_ {
        self.rw_set.iter().map(|(location, rw)| (*location, *rw))
    }

    /// Returns the number of tracked slots.
    #[must_use]
    pub fn rw_set_len(&self) -> usize {
        self.rw_set.len()
    }

    /// Returns the shared dependency state, if dependencies are tracked.
    pub fn dependency(&self) -> Option<&Arc<DependencyState>> {
        self.dependency.as_ref()
    }

    /// Returns true if a transaction this one depends on aborted.
    #[must_use]
    pub fn is_cascading_abort(&self) -> bool {
        self.dependency
            .as_ref()
            .is_some_and(|dependency| dependency.is_cascading_abort())
    }

    /// Returns true if this transaction already registered on `owner`.
    #[must_use]
    pub fn check_dependency(&self, owner: TxnId) -> bool {
        self.depends_on.contains(&owner)
    }

    /// Remembers that this transaction registered on `owner`.
    ///
    /// Returns false if it already had.
    pub(crate) fn record_dependency(&mut self, owner: TxnId) -> bool {
        self.depends_on.insert(owner)
    }

    /// Records a snapshot read. Never downgrades an existing entry.
    pub(crate) fn record_read(&mut self, location: ItemPointer) {
        self.rw_set.entry(location).or_insert(RwType::Read);
    }

    /// Records a read that took ownership of the slot.
    pub(crate) fn record_read_own(&mut self, location: ItemPointer) {
        match self.rw_set.get(&location) {
            None | Some(RwType::Read) => {
                self.rw_set.insert(location, RwType::ReadOwn);
            }
            Some(_) => {}
        }
    }

    /// Turns an owned read back into a plain read after ownership was yielded.
    pub(crate) fn release_read_own(&mut self, location: ItemPointer) {
        if let Some(rw) = self.rw_set.get_mut(&location) {
            if *rw == RwType::ReadOwn {
                *rw = RwType::Read;
            }
        }
    }

    /// Records a freshly inserted slot.
    pub(crate) fn record_insert(&mut self, location: ItemPointer) {
        let previous = self.rw_set.insert(location, RwType::Insert);
        assert!(
            previous.is_none(),
            "insert into slot {location} already tracked as {previous:?}"
        );
    }

    /// Records that the version at `location` was superseded by an update.
    pub(crate) fn record_update(&mut self, location: ItemPointer) {
        match self.rw_set.get(&location).copied() {
            None | Some(RwType::Read | RwType::ReadOwn) => {
                self.rw_set.insert(location, RwType::Update);
            }
            Some(RwType::Update | RwType::Insert) => {}
            Some(rw @ (RwType::Delete | RwType::InsertThenDelete)) => {
                panic!("update of slot {location} after it was deleted ({rw:?})")
            }
        }
    }

    /// Records that the version at `location` was deleted.
    ///
    /// Deleting a slot this transaction inserted collapses the entry into
    /// [`RwType::InsertThenDelete`].
    pub(crate) fn record_delete(&mut self, location: ItemPointer) {
        let collapsed = match self.rw_set.get(&location).copied() {
            Some(RwType::Insert) => RwType::InsertThenDelete,
            Some(RwType::InsertThenDelete) => RwType::InsertThenDelete,
            None | Some(RwType::Read | RwType::ReadOwn | RwType::Update | RwType::Delete) => {
                RwType::Delete
            }
        };
        self.rw_set.insert(location, collapsed);
    }

    pub(crate) fn set_result(&mut self, result: TxnResult) {
        self.result = result;
    }

    pub(crate) fn mark_committed(&mut self, end_cid: Option<CommitId>) {
        self.end_cid = end_cid;
        self.result = TxnResult::Success;
        self.state = TransactionState::Committed;
    }

    pub(crate) fn mark_aborted(&mut self) {
        self.result = TxnResult::Aborted;
        self.state = TransactionState::Aborted;
    }

    /// Ensures the transaction is active.
    pub(crate) fn ensure_active(&self) -> CoreResult<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::Committed | TransactionState::Aborted => {
                Err(CoreError::transaction_not_active(self.id))
            }
        }
    }

    /// Ensures the transaction may write.
    pub(crate) fn ensure_writable(&self) -> CoreResult<()> {
        self.ensure_active()?;
        if self.declared_read_only {
            return Err(CoreError::invalid_operation(format!(
                "{} was declared read-only",
                self.id
            )));
        }
        Ok(())
    }
}
