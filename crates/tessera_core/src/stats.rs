//! Transaction manager statistics.
//!
//! # Usage
//!
//! ```rust
//! use tessera_core::{Config, TransactionManager};
//!
//! let manager = TransactionManager::new(Config::default());
//! let mut txn = manager.begin();
//! manager.commit(&mut txn).unwrap();
//!
//! let stats = manager.stats().snapshot();
//! assert_eq!(stats.transactions_committed, 1);
//! assert_eq!(stats.read_only_commits, 1);
//! ```

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Transaction manager counters.
///
/// All counters are atomic and can be read while transactions are running.
#[derive(Debug, Default)]
pub struct TxnStats {
    transactions_started: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_aborted: AtomicU64,
    read_only_commits: AtomicU64,
    /// Read-only transactions aborted by read validation.
    read_aborts: AtomicU64,
    /// Read-write transactions aborted by commit-time validation.
    validation_aborts: AtomicU64,
    ownership_conflicts: AtomicU64,
    cascading_aborts: AtomicU64,
    gc_notifications: AtomicU64,
    versions_reclaimed: AtomicU64,
}

impl TxnStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    // === Increment methods (internal use) ===

    pub(crate) fn record_start(&self) {
        self.transactions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self, read_only: bool) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
        if read_only {
            self.read_only_commits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_abort(&self) {
        self.transactions_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_read_abort(&self) {
        self.read_aborts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_validation_abort(&self) {
        self.validation_aborts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_ownership_conflict(&self) {
        self.ownership_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cascading_abort(&self) {
        self.cascading_aborts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_gc_notification(&self) {
        self.gc_notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reclaimed(&self, count: u64) {
        self.versions_reclaimed.fetch_add(count, Ordering::Relaxed);
    }

    // === Getter methods (public API) ===

    /// Returns the number of transactions started.
    pub fn transactions_started(&self) -> u64 {
        self.transactions_started.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions committed.
    pub fn transactions_committed(&self) -> u64 {
        self.transactions_committed.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions aborted.
    pub fn transactions_aborted(&self) -> u64 {
        self.transactions_aborted.load(Ordering::Relaxed)
    }

    /// Returns the number of commits that took the read-only path.
    pub fn read_only_commits(&self) -> u64 {
        self.read_only_commits.load(Ordering::Relaxed)
    }

    /// Returns the number of read-only transactions that failed validation.
    pub fn read_aborts(&self) -> u64 {
        self.read_aborts.load(Ordering::Relaxed)
    }

    /// Returns the number of read-write transactions that failed validation.
    pub fn validation_aborts(&self) -> u64 {
        self.validation_aborts.load(Ordering::Relaxed)
    }

    /// Returns the number of failed ownership acquisitions.
    pub fn ownership_conflicts(&self) -> u64 {
        self.ownership_conflicts.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions aborted by a failed dependency.
    pub fn cascading_aborts(&self) -> u64 {
        self.cascading_aborts.load(Ordering::Relaxed)
    }

    /// Returns the number of end-of-transaction notifications sent to the collector.
    pub fn gc_notifications(&self) -> u64 {
        self.gc_notifications.load(Ordering::Relaxed)
    }

    /// Returns the number of version slots the collector reclaimed.
    pub fn versions_reclaimed(&self) -> u64 {
        self.versions_reclaimed.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            transactions_started: self.transactions_started(),
            transactions_committed: self.transactions_committed(),
            transactions_aborted: self.transactions_aborted(),
            read_only_commits: self.read_only_commits(),
            read_aborts: self.read_aborts(),
            validation_aborts: self.validation_aborts(),
            ownership_conflicts: self.ownership_conflicts(),
            cascading_aborts: self.cascading_aborts(),
            gc_notifications: self.gc_notifications(),
            versions_reclaimed: self.versions_reclaimed(),
        }
    }
}

/// A point-in-time copy of [`TxnStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Transactions started.
    pub transactions_started: u64,
    /// Transactions committed.
    pub transactions_committed: u64,
    /// Transactions aborted.
    pub transactions_aborted: u64,
    /// Commits that took the read-only path.
    pub read_only_commits: u64,
    /// Read-only transactions that failed validation.
    pub read_aborts: u64,
    /// Read-write transactions that failed validation.
    pub validation_aborts: u64,
    /// Failed ownership acquisitions.
    pub ownership_conflicts: u64,
    /// Transactions aborted by a failed dependency.
    pub cascading_aborts: u64,
    /// End-of-transaction notifications sent to the collector.
    pub gc_notifications: u64,
    /// Version slots reclaimed.
    pub versions_reclaimed: u64,
}
