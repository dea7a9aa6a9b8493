//! Index indirection entries.
//!
//! An index never stores a version's address directly. It stores an
//! [`IndirectionId`], and the entry behind that id always holds the tagged
//! address of the newest version of the logical row. Writers re-point the
//! entry with a single compare-and-swap when they install or roll back a
//! version.

use crate::error::{StorageError, StorageResult};
use crate::pointer::TaggedPointer;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

const CHUNK_SIZE: usize = 1024;

/// Handle to one index entry in the [`IndirectionTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndirectionId(pub u64);

impl IndirectionId {
    /// No index entry.
    pub const NONE: Self = Self(u64::MAX);

    /// Creates an indirection id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true for [`IndirectionId::NONE`].
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == u64::MAX
    }
}

impl fmt::Display for IndirectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str("ind:none")
        } else {
            write!(f, "ind:{}", self.0)
        }
    }
}

/// Append-only arena of index entries, each a single atomic tagged pointer.
#[derive(Debug, Default)]
pub struct IndirectionTable {
    chunks: RwLock<Vec<Box<[AtomicU64]>>>,
    len: AtomicU64,
}

impl IndirectionTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a new entry pointing at `head`.
    pub fn allocate(&self, head: TaggedPointer) -> IndirectionId {
        let id = self.len.fetch_add(1, Ordering::AcqRel);
        let chunk_index = id as usize / CHUNK_SIZE;

        if self.chunks.read().len() <= chunk_index {
            let mut chunks = self.chunks.write();
            while chunks.len() <= chunk_index {
                let chunk = (0..CHUNK_SIZE)
                    .map(|_| AtomicU64::new(TaggedPointer::NULL.into_raw()))
                    .collect();
                chunks.push(chunk);
            }
        }

        self.with_cell(IndirectionId(id), |cell| {
            cell.store(head.into_raw(), Ordering::Release);
        })
        .expect("freshly allocated indirection cell must exist");
        IndirectionId(id)
    }

    /// Returns the chain head the entry currently points at.
    pub fn head(&self, id: IndirectionId) -> StorageResult<TaggedPointer> {
        self.with_cell(id, |cell| TaggedPointer::from_raw(cell.load(Ordering::Acquire)))
    }

    /// Re-points the entry from `expected` to `new`; false if it no longer holds `expected`.
    pub fn compare_and_set(
        &self,
        id: IndirectionId,
        expected: TaggedPointer,
        new: TaggedPointer,
    ) -> StorageResult<bool> {
        self.with_cell(id, |cell| {
            cell.compare_exchange(
                expected.into_raw(),
                new.into_raw(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        })
    }

    /// Returns the number of allocated entries.
    pub fn len(&self) -> u64 {
        self.len.load(Ordering::Acquire)
    }

    /// Returns true if no entry has been allocated.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_cell<R>(&self, id: IndirectionId, f: impl FnOnce(&AtomicU64) -> R) -> StorageResult<R> {
        if id.is_none() || id.0 >= self.len() {
            return Err(StorageError::UnknownIndirection(id.0));
        }
        let chunks = self.chunks.read();
        let index = id.0 as usize;
        chunks
            .get(index / CHUNK_SIZE)
            .and_then(|chunk| chunk.get(index % CHUNK_SIZE))
            .map(f)
            .ok_or(StorageError::UnknownIndirection(id.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pointer::ItemPointer;

    #[test]
    fn allocate_and_read_head() {
        let table = IndirectionTable::new();
        let head = TaggedPointer::new(ItemPointer::new(0, 1), 0);
        let id = table.allocate(head);
        assert_eq!(table.head(id).unwrap(), head);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn compare_and_set_requires_expected_tag() {
        let table = IndirectionTable::new();
        let location = ItemPointer::new(0, 1);
        let id = table.allocate(TaggedPointer::new(location, 0));
        let new_head = TaggedPointer::new(ItemPointer::new(0, 2), 0);

        // Same address, different generation: must not match.
        let stale = TaggedPointer::new(location, 1);
        assert!(!table.compare_and_set(id, stale, new_head).unwrap());

        assert!(table
            .compare_and_set(id, TaggedPointer::new(location, 0), new_head)
            .unwrap());
        assert_eq!(table.head(id).unwrap(), new_head);
    }

    #[test]
    fn grows_past_one_chunk() {
        let table = IndirectionTable::new();
        let mut last = IndirectionId::NONE;
        for i in 0..(CHUNK_SIZE as u16 + 10) {
            last = table.allocate(TaggedPointer::new(ItemPointer::new(1, i), 0));
        }
        assert_eq!(
            table.head(last).unwrap().pointer(),
            ItemPointer::new(1, CHUNK_SIZE as u16 + 9)
        );
    }

    #[test]
    fn unknown_id_is_an_error() {
        let table = IndirectionTable::new();
        assert!(matches!(
            table.head(IndirectionId::new(3)),
            Err(StorageError::UnknownIndirection(3))
        ));
        assert!(table.head(IndirectionId::NONE).is_err());
    }
}
