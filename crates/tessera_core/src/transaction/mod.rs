//! Optimistic multi-version transactions.
//!
//! tessera transactions run without locks until commit:
//! - **Reads** pick the version whose `[begin, end)` interval holds the
//!   transaction's snapshot and record it in the read/write set
//! - **Writes** take ownership of the chain head by compare-and-swap and
//!   link a new version in front of it
//! - **Commit** validates the read/write set against a fresh commit id and
//!   publishes every write at that id
//! - **Abort** puts every touched chain back the way it was

mod dependency;
mod manager;
mod state;

pub use dependency::DependencyState;
pub use manager::{TransactionManager, Visibility};
pub use state::{RwType, Transaction, TransactionState, TxnResult};
