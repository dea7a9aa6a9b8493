//! Tile group headers: the per-slot MVCC metadata arena.

use crate::ids::{CommitId, TxnId};
use crate::indirection::IndirectionId;
use crate::pointer::TaggedPointer;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, Ordering};

/// MVCC metadata of one tuple slot.
///
/// Every field is an atomic. Loads use `Acquire`, stores use `Release`; the
/// transaction manager adds full fences where its publish protocol needs
/// cross-field ordering.
#[derive(Debug)]
#[repr(align(64))]
pub struct TupleHeader {
    owner: AtomicU64,
    begin: AtomicU64,
    end: AtomicU64,
    next: AtomicU64,
    prev: AtomicU64,
    indirection: AtomicU64,
    generation: AtomicU16,
}

impl TupleHeader {
    fn empty() -> Self {
        Self {
            owner: AtomicU64::new(TxnId::INVALID.as_u64()),
            begin: AtomicU64::new(CommitId::INFINITY.as_u64()),
            end: AtomicU64::new(CommitId::INFINITY.as_u64()),
            next: AtomicU64::new(TaggedPointer::NULL.into_raw()),
            prev: AtomicU64::new(TaggedPointer::NULL.into_raw()),
            indirection: AtomicU64::new(IndirectionId::NONE.as_u64()),
            generation: AtomicU16::new(0),
        }
    }

    /// Returns the owning transaction.
    #[inline]
    pub fn owner(&self) -> TxnId {
        TxnId::new(self.owner.load(Ordering::Acquire))
    }

    /// Overwrites the owner unconditionally.
    #[inline]
    pub fn set_owner(&self, owner: TxnId) {
        self.owner.store(owner.as_u64(), Ordering::Release);
    }

    /// Swaps the owner from `expected` to `new`; false if someone else got there first.
    #[inline]
    pub fn compare_and_set_owner(&self, expected: TxnId, new: TxnId) -> bool {
        self.owner
            .compare_exchange(
                expected.as_u64(),
                new.as_u64(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Returns the begin of the visibility interval.
    #[inline]
    pub fn begin_commit_id(&self) -> CommitId {
        CommitId::new(self.begin.load(Ordering::Acquire))
    }

    /// Sets the begin of the visibility interval.
    #[inline]
    pub fn set_begin_commit_id(&self, cid: CommitId) {
        self.begin.store(cid.as_u64(), Ordering::Release);
    }

    /// Returns the (exclusive) end of the visibility interval.
    #[inline]
    pub fn end_commit_id(&self) -> CommitId {
        CommitId::new(self.end.load(Ordering::Acquire))
    }

    /// Sets the end of the visibility interval.
    #[inline]
    pub fn set_end_commit_id(&self, cid: CommitId) {
        self.end.store(cid.as_u64(), Ordering::Release);
    }

    /// Returns the link to the next (older) version.
    #[inline]
    pub fn next(&self) -> TaggedPointer {
        TaggedPointer::from_raw(self.next.load(Ordering::Acquire))
    }

    /// Sets the link to the next (older) version.
    #[inline]
    pub fn set_next(&self, link: TaggedPointer) {
        self.next.store(link.into_raw(), Ordering::Release);
    }

    /// Swaps the next link only if it still holds `expected`.
    #[inline]
    pub fn compare_and_set_next(&self, expected: TaggedPointer, new: TaggedPointer) -> bool {
        self.next
            .compare_exchange(
                expected.into_raw(),
                new.into_raw(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Returns the link to the previous (newer) version.
    #[inline]
    pub fn prev(&self) -> TaggedPointer {
        TaggedPointer::from_raw(self.prev.load(Ordering::Acquire))
    }

    /// Sets the link to the previous (newer) version.
    #[inline]
    pub fn set_prev(&self, link: TaggedPointer) {
        self.prev.store(link.into_raw(), Ordering::Release);
    }

    /// Returns the index entry this version is reachable from.
    #[inline]
    pub fn indirection(&self) -> IndirectionId {
        IndirectionId::new(self.indirection.load(Ordering::Acquire))
    }

    /// Records the index entry this version is reachable from.
    #[inline]
    pub fn set_indirection(&self, id: IndirectionId) {
        self.indirection.store(id.as_u64(), Ordering::Release);
    }

    /// Returns the slot's recycle generation.
    #[inline]
    pub fn generation(&self) -> u16 {
        self.generation.load(Ordering::Acquire)
    }

    /// Returns the slot to the empty state and bumps its generation.
    ///
    /// The generation is bumped first so that any tagged pointer still
    /// naming the old incarnation stops matching before the fields change.
    pub(crate) fn reset(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.set_owner(TxnId::INVALID);
        self.set_begin_commit_id(CommitId::INFINITY);
        self.set_end_commit_id(CommitId::INFINITY);
        self.set_next(TaggedPointer::NULL);
        self.set_prev(TaggedPointer::NULL);
        self.set_indirection(IndirectionId::NONE);
    }
}

/// Header of one tile group: a fixed array of [`TupleHeader`]s plus slot
/// allocation state.
#[derive(Debug)]
pub struct TileGroupHeader {
    id: u32,
    slots: Box<[TupleHeader]>,
    next_slot: AtomicU32,
    free_slots: Mutex<Vec<u16>>,
    recycled: AtomicU64,
}

impl TileGroupHeader {
    /// Creates a tile group with `capacity` empty slots.
    pub fn new(id: u32, capacity: u16) -> Self {
        let slots = (0..capacity).map(|_| TupleHeader::empty()).collect();
        Self {
            id,
            slots,
            next_slot: AtomicU32::new(0),
            free_slots: Mutex::new(Vec::new()),
            recycled: AtomicU64::new(0),
        }
    }

    /// Returns the tile group id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Returns the number of slots.
    pub fn capacity(&self) -> u16 {
        self.slots.len() as u16
    }

    /// Returns the header at `offset`, if it exists.
    #[inline]
    pub fn header(&self, offset: u16) -> Option<&TupleHeader> {
        self.slots.get(offset as usize)
    }

    /// Hands out an empty slot: a recycled one if available, else a fresh one.
    pub fn allocate(&self) -> Option<u16> {
        if let Some(offset) = self.free_slots.lock().pop() {
            return Some(offset);
        }
        let capacity = self.slots.len() as u32;
        if self.next_slot.load(Ordering::Relaxed) >= capacity {
            return None;
        }
        let offset = self.next_slot.fetch_add(1, Ordering::Relaxed);
        if offset >= capacity {
            None
        } else {
            Some(offset as u16)
        }
    }

    /// Resets the slot at `offset` and makes it available to [`allocate`](Self::allocate).
    pub(crate) fn recycle(&self, offset: u16) {
        if let Some(header) = self.header(offset) {
            header.reset();
            self.recycled.fetch_add(1, Ordering::Relaxed);
            self.free_slots.lock().push(offset);
        }
    }

    /// Returns how many slots have been handed out from the bump allocator.
    pub fn allocated_count(&self) -> u16 {
        self.next_slot.load(Ordering::Relaxed).min(self.slots.len() as u32) as u16
    }

    /// Returns how many recycled slots wait in the free list.
    pub fn free_count(&self) -> usize {
        self.free_slots.lock().len()
    }

    /// Returns how many times a slot of this tile group was recycled.
    pub fn recycled_count(&self) -> u64 {
        self.recycled.load(Ordering::Relaxed)
    }
}
