//! Durability hooks.
//!
//! The transaction manager emits a [`LogRecord`] at each publish step of a
//! writing commit: one `BeginTransaction`, one record per installed write,
//! then `CommitTransaction`. What a [`LogManager`] does with them (nothing,
//! buffer them, persist them) is its own business.

mod memory;
mod noop;

pub use memory::MemoryLogManager;
pub use noop::NoOpLogManager;

use std::fmt;
use tessera_storage::{CommitId, ItemPointer, TxnId};

/// A durability event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// A writing transaction starts publishing.
    BeginTransaction {
        /// Committing transaction.
        txn_id: TxnId,
        /// Commit id its versions are published at.
        commit_id: CommitId,
    },
    /// A new row version became visible.
    Insert {
        /// Committing transaction.
        txn_id: TxnId,
        /// Inserted slot.
        location: ItemPointer,
    },
    /// An old version was superseded by a new one.
    Update {
        /// Committing transaction.
        txn_id: TxnId,
        /// Superseded version.
        old: ItemPointer,
        /// Replacement version.
        new: ItemPointer,
    },
    /// An old version was superseded by a tombstone.
    Delete {
        /// Committing transaction.
        txn_id: TxnId,
        /// Deleted version.
        old: ItemPointer,
        /// Tombstone version.
        new: ItemPointer,
    },
    /// Every write of the transaction is published.
    CommitTransaction {
        /// Committed transaction.
        txn_id: TxnId,
        /// Its commit id.
        commit_id: CommitId,
    },
}

impl LogRecord {
    /// Returns the transaction the record belongs to.
    pub fn txn_id(&self) -> TxnId {
        match self {
            Self::BeginTransaction { txn_id, .. }
            | Self::Insert { txn_id, .. }
            | Self::Update { txn_id, .. }
            | Self::Delete { txn_id, .. }
            | Self::CommitTransaction { txn_id, .. } => *txn_id,
        }
    }
}

/// Receiver of [`LogRecord`]s.
///
/// Implementations:
/// - [`NoOpLogManager`]: drops every record
/// - [`MemoryLogManager`]: keeps records in arrival order
pub trait LogManager: Send + Sync + fmt::Debug {
    /// Accepts one record. Called on the committing thread, in publish order.
    fn log(&self, record: LogRecord);

    /// Whether records are kept at all.
    fn is_enabled(&self) -> bool;
}
