//! # tessera core
//!
//! Optimistic MVCC transaction manager for tessera.
//!
//! This crate provides:
//! - Transaction lifecycle: begin, read, insert, update, delete, commit, abort
//! - Snapshot visibility over the version chains of [`tessera_storage`]
//! - Optional commit-dependency tracking with cascading aborts
//! - Garbage collection of superseded versions
//! - Durability hooks for a write-ahead log
//!
//! ## Example
//!
//! ```rust
//! use tessera_core::{Config, TransactionManager, TxnResult};
//!
//! let manager = TransactionManager::new(Config::default());
//! let store = manager.store();
//!
//! let mut txn = manager.begin();
//! let location = store.allocate_slot().unwrap();
//! let row = store.allocate_indirection(location).unwrap();
//! manager.perform_insert(&mut txn, location, row).unwrap();
//! assert_eq!(manager.commit(&mut txn).unwrap(), TxnResult::Success);
//!
//! let reader = manager.begin();
//! assert_eq!(manager.visible_version(&reader, row).unwrap(), Some(location));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
pub mod gc;
mod stats;
pub mod transaction;
pub mod wal;

pub use config::{Config, GcMode, IsolationLevel};
pub use error::{CoreError, CoreResult};
pub use gc::{create_gc, GarbageCollector, GcWorker, NoOpGc, VacuumGc};
pub use stats::{StatsSnapshot, TxnStats};
pub use transaction::{
    DependencyState, RwType, Transaction, TransactionManager, TransactionState, TxnResult,
    Visibility,
};
pub use wal::{LogManager, LogRecord, MemoryLogManager, NoOpLogManager};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use tessera_storage::{
    CommitId, IndirectionId, ItemPointer, StorageError, TaggedPointer, TxnId, VersionStore,
};
