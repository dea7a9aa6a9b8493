//! # tessera storage
//!
//! Version store primitives for tessera.
//!
//! This crate owns the memory that every transaction reads and mutates:
//! fixed-size tile groups of per-slot MVCC headers, addressed by
//! [`ItemPointer`]. Each header field is an atomic and is reachable only
//! through accessor methods on [`SlotRef`], so no raw pointer ever crosses a
//! thread boundary.
//!
//! ## Slot states
//!
//! | owner | begin | end | meaning |
//! |---|---|---|---|
//! | `INVALID` | `INFINITY` | `INFINITY` | empty (virgin) slot |
//! | live txn | committed | any | old version locked for update/delete |
//! | live txn | `INFINITY` | `INFINITY` | new version not yet installed |
//! | live txn | `INFINITY` | `INVALID` | new tombstone not yet installed |
//! | `UNLOCKED` | committed | committed/`INFINITY` | stable, published version |
//!
//! ## Chain links
//!
//! Version-chain links and index entries are stored as [`TaggedPointer`]s
//! carrying the target slot's generation. The garbage collector bumps the
//! generation whenever it recycles a slot, so a compare-and-swap or a chain
//! traversal can never act on a slot that was reclaimed and reused under the
//! same `(tile_group_id, offset)` identity.
//!
//! ## Example
//!
//! ```rust
//! use tessera_storage::{CommitId, StoreConfig, TxnId, VersionStore};
//!
//! let store = VersionStore::new(StoreConfig::default());
//! let location = store.allocate_slot().unwrap();
//! let slot = store.slot(location).unwrap();
//!
//! assert!(slot.is_virgin());
//! slot.set_owner(TxnId::new(7));
//! assert!(slot.compare_and_set_owner(TxnId::new(7), TxnId::UNLOCKED));
//! assert_eq!(slot.end_commit_id(), CommitId::INFINITY);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod ids;
mod indirection;
mod pointer;
mod store;
mod tile_group;

pub use error::{StorageError, StorageResult};
pub use ids::{CommitId, TxnId};
pub use indirection::{IndirectionId, IndirectionTable};
pub use pointer::{ItemPointer, TaggedPointer};
pub use store::{SlotRef, StoreConfig, VersionStore};
pub use tile_group::{TileGroupHeader, TupleHeader};
