//! Test fixtures and table helpers.
//!
//! [`Table`] is the smallest execution engine that exercises every
//! transaction manager operation: a key/value table whose primary index maps
//! each key to the index entries (indirections) of its version chains, with
//! payloads stored next to the version store by slot address.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tessera_core::{Config, CoreResult, Transaction, TransactionManager, TxnResult};
use tessera_storage::{CommitId, IndirectionId, ItemPointer, TxnId};

/// Primary key of a [`Table`] row.
pub type Key = u64;

/// Outcome of a table write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write is part of the transaction.
    Applied,
    /// No row with that key is visible.
    NotFound,
    /// A row with that key is already visible.
    Duplicate,
    /// Another transaction holds the row; the caller must abort.
    Conflict,
}

impl WriteOutcome {
    /// Returns true if the write was applied.
    #[must_use]
    pub fn applied(self) -> bool {
        self == Self::Applied
    }

    /// Returns true if the transaction must abort.
    #[must_use]
    pub fn is_conflict(self) -> bool {
        self == Self::Conflict
    }
}

/// A key/value table driven by a [`TransactionManager`].
///
/// A key maps to a list of index entries, newest last. A new entry is only
/// added once every older one is deleted, so older snapshots keep finding
/// the rows they saw.
#[derive(Debug)]
pub struct Table {
    manager: Arc<TransactionManager>,
    index: RwLock<BTreeMap<Key, Vec<IndirectionId>>>,
    payloads: RwLock<HashMap<ItemPointer, Vec<u8>>>,
}

impl Table {
    /// Creates an empty table over a fresh manager.
    pub fn new(config: Config) -> Self {
        Self::with_manager(Arc::new(TransactionManager::new(config)))
    }

    /// Creates an empty table over an existing manager.
    pub fn with_manager(manager: Arc<TransactionManager>) -> Self {
        Self {
            manager,
            index: RwLock::new(BTreeMap::new()),
            payloads: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the transaction manager.
    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    /// Begins a transaction.
    pub fn begin(&self) -> Transaction {
        self.manager.begin()
    }

    /// Returns the index entries for `key`, newest last.
    pub fn indirections(&self, key: Key) -> Vec<IndirectionId> {
        self.index.read().get(&key).cloned().unwrap_or_default()
    }

    /// Returns the keys that ever held a row.
    pub fn keys(&self) -> Vec<Key> {
        self.index.read().keys().copied().collect()
    }

    /// Returns the payload stored for the version at `location`.
    pub fn payload(&self, location: ItemPointer) -> Option<Vec<u8>> {
        self.payloads.read().get(&location).cloned()
    }

    /// Returns the version of `key` that `txn` must read, without recording a read.
    pub fn locate(&self, txn: &Transaction, key: Key) -> CoreResult<Option<ItemPointer>> {
        for indirection in self.indirections(key).into_iter().rev() {
            if let Some(location) = self.manager.visible_version(txn, indirection)? {
                return Ok(Some(location));
            }
        }
        Ok(None)
    }

    /// Reads `key`.
    pub fn get(&self, txn: &mut Transaction, key: Key) -> CoreResult<Option<Vec<u8>>> {
        let Some(location) = self.locate(txn, key)? else {
            return Ok(None);
        };
        self.manager.perform_read(txn, location, false)?;
        Ok(self.payload(location))
    }

    /// Reads `key` and takes ownership of its version (select for update).
    ///
    /// Returns `Ok(Err(outcome))` if the row is missing or held by another
    /// transaction.
    pub fn get_for_update(
        &self,
        txn: &mut Transaction,
        key: Key,
    ) -> CoreResult<Result<Vec<u8>, WriteOutcome>> {
        let Some(location) = self.locate(txn, key)? else {
            return Ok(Err(WriteOutcome::NotFound));
        };
        if !self.manager.perform_read(txn, location, true)? {
            return Ok(Err(WriteOutcome::Conflict));
        }
        Ok(Ok(self.payload(location).unwrap_or_default()))
    }

    /// Inserts a new row.
    pub fn insert(&self, txn: &mut Transaction, key: Key, value: Vec<u8>) -> CoreResult<WriteOutcome> {
        let store = self.manager.store();
        let mut index = self.index.write();
        let rows = index.entry(key).or_default();

        for &indirection in rows.iter() {
            if self.manager.visible_version(txn, indirection)?.is_some() {
                return Ok(WriteOutcome::Duplicate);
            }
        }
        if let Some(&newest) = rows.last() {
            if let Some(owner) = self.head_owner(newest)? {
                // Only a tombstone, a dead version or our own delete may be
                // shadowed by a new row.
                if owner != TxnId::INVALID && owner != txn.id() {
                    return Ok(WriteOutcome::Conflict);
                }
            }
        }

        let location = store.allocate_slot()?;
        self.payloads.write().insert(location, value);
        let indirection = store.allocate_indirection(location)?;
        self.manager.perform_insert(txn, location, indirection)?;
        rows.push(indirection);
        Ok(WriteOutcome::Applied)
    }

    /// Replaces the value of `key`.
    pub fn update(&self, txn: &mut Transaction, key: Key, value: Vec<u8>) -> CoreResult<WriteOutcome> {
        let Some(location) = self.locate(txn, key)? else {
            return Ok(WriteOutcome::NotFound);
        };
        if self.is_own_version(txn, location)? {
            self.payloads.write().insert(location, value);
            self.manager.perform_local_update(txn, location)?;
            return Ok(WriteOutcome::Applied);
        }

        if !self.manager.perform_read(txn, location, true)? {
            return Ok(WriteOutcome::Conflict);
        }
        let new = self.manager.store().allocate_slot()?;
        self.payloads.write().insert(new, value);
        if !self.manager.perform_update(txn, location, new)? {
            return Ok(WriteOutcome::Conflict);
        }
        Ok(WriteOutcome::Applied)
    }

    /// Deletes `key`.
    pub fn delete(&self, txn: &mut Transaction, key: Key) -> CoreResult<WriteOutcome> {
        let Some(location) = self.locate(txn, key)? else {
            return Ok(WriteOutcome::NotFound);
        };
        if self.is_own_version(txn, location)? {
            self.manager.perform_local_delete(txn, location)?;
            return Ok(WriteOutcome::Applied);
        }

        if !self.manager.perform_read(txn, location, true)? {
            return Ok(WriteOutcome::Conflict);
        }
        let tombstone = self.manager.store().allocate_slot()?;
        if !self.manager.perform_delete(txn, location, tombstone)? {
            return Ok(WriteOutcome::Conflict);
        }
        Ok(WriteOutcome::Applied)
    }

    /// Reads every row visible to `txn`, in key order.
    pub fn scan(&self, txn: &mut Transaction) -> CoreResult<Vec<(Key, Vec<u8>)>> {
        let mut rows = Vec::new();
        for key in self.keys() {
            if let Some(value) = self.get(txn, key)? {
                rows.push((key, value));
            }
        }
        Ok(rows)
    }

    /// Runs `body` in a new transaction and commits it.
    ///
    /// `body` returns `Ok(None)` to request an abort. Returns `Ok(None)` if
    /// the transaction aborted for any reason other than an error.
    pub fn execute<R, F>(&self, body: F) -> CoreResult<Option<R>>
    where
        F: FnOnce(&Self, &mut Transaction) -> CoreResult<Option<R>>,
    {
        let mut txn = self.begin();
        match body(self, &mut txn) {
            Ok(Some(value)) => match self.manager.commit(&mut txn)? {
                TxnResult::Success => Ok(Some(value)),
                TxnResult::Failure | TxnResult::Aborted => Ok(None),
            },
            Ok(None) => {
                self.manager.abort(&mut txn)?;
                Ok(None)
            }
            Err(err) => {
                if txn.is_active() {
                    self.manager.abort(&mut txn)?;
                }
                Err(err)
            }
        }
    }

    /// Like [`execute`](Self::execute), retrying aborted attempts.
    ///
    /// Returns the result and the number of aborted attempts, or `None` if
    /// every attempt aborted.
    pub fn execute_with_retry<R, F>(&self, max_attempts: usize, mut body: F) -> CoreResult<(Option<R>, usize)>
    where
        F: FnMut(&Self, &mut Transaction) -> CoreResult<Option<R>>,
    {
        let mut aborted = 0;
        for _ in 0..max_attempts {
            if let Some(value) = self.execute(&mut body)? {
                return Ok((Some(value), aborted));
            }
            aborted += 1;
        }
        Ok((None, aborted))
    }

    fn is_own_version(&self, txn: &Transaction, location: ItemPointer) -> CoreResult<bool> {
        let slot = self.manager.store().slot(location)?;
        Ok(slot.owner() == txn.id() && slot.begin_commit_id() == CommitId::INFINITY)
    }

    /// Returns the owner of the chain head, or `None` if the entry is dangling.
    fn head_owner(&self, indirection: IndirectionId) -> CoreResult<Option<TxnId>> {
        let store = self.manager.store();
        let head = store.indirection_head(indirection)?;
        if head.is_null() {
            return Ok(None);
        }
        let slot = store.slot(head.pointer())?;
        if slot.generation() != head.generation() {
            return Ok(None);
        }
        Ok(Some(slot.owner()))
    }
}

/// Encodes an account balance as a row value.
pub fn encode_balance(balance: u64) -> Vec<u8> {
    balance.to_le_bytes().to_vec()
}

/// Decodes a row value written by [`encode_balance`]; malformed values read as zero.
pub fn decode_balance(value: &[u8]) -> u64 {
    <[u8; 8]>::try_from(value)
        .map(u64::from_le_bytes)
        .unwrap_or(0)
}

/// Runs a test with a fresh table using the default configuration.
pub fn with_temp_table<F, R>(f: F) -> R
where
    F: FnOnce(&Table) -> R,
{
    let table = Table::new(Config::default());
    f(&table)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates a table holding keys `0..rows`, each with balance `initial`.
    pub fn populated_table(config: Config, rows: u64, initial: u64) -> Table {
        let table = Table::new(config);
        for key in 0..rows {
            let inserted = table
                .execute(|table, txn| {
                    Ok(table
                        .insert(txn, key, encode_balance(initial))?
                        .applied()
                        .then_some(()))
                })
                .expect("insert failed");
            assert!(inserted.is_some(), "populating key {key} aborted");
        }
        table
    }

    /// Sums the balances visible to a fresh snapshot.
    pub fn total_balance(table: &Table) -> CoreResult<u64> {
        let mut txn = table.begin();
        let total = table
            .scan(&mut txn)?
            .iter()
            .map(|(_, value)| decode_balance(value))
            .sum();
        table.manager().commit(&mut txn)?;
        Ok(total)
    }
}
