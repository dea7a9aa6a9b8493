//! # tessera testkit
//!
//! Test utilities for tessera.
//!
//! This crate provides:
//! - A minimal execution engine ([`Table`]) that drives the transaction
//!   manager the way a query executor would
//! - Property-based test generators using proptest
//! - Concurrent stress workloads
//!
//! ## Usage
//!
//! ```rust
//! use tessera_testkit::prelude::*;
//!
//! with_temp_table(|table| {
//!     let inserted = table.execute(|table, txn| {
//!         Ok(table.insert(txn, 1, b"one".to_vec())?.applied().then_some(()))
//!     });
//!     assert!(inserted.unwrap().is_some());
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
