//! The version store: tile-group catalog, slot accessors and chain traversal.

use crate::error::{StorageError, StorageResult};
use crate::ids::{CommitId, TxnId};
use crate::indirection::{IndirectionId, IndirectionTable};
use crate::pointer::{ItemPointer, TaggedPointer};
use crate::tile_group::{TileGroupHeader, TupleHeader};
use parking_lot::RwLock;
use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;

/// Sizing knobs for the version store.
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    /// Number of tuple slots in each tile group.
    pub tuples_per_tile_group: u16,
    /// Upper bound on the number of tile groups.
    pub max_tile_groups: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            tuples_per_tile_group: 1000,
            max_tile_groups: 1 << 20,
        }
    }
}

/// Arena of tile groups plus the index indirection table.
///
/// Also serves as the catalog: [`VersionStore::resolve`] turns a tile group
/// id into its header, and [`VersionStore::slot`] turns an [`ItemPointer`]
/// into a [`SlotRef`] exposing the slot's accessors.
#[derive(Debug)]
pub struct VersionStore {
    config: StoreConfig,
    tile_groups: RwLock<Vec<Arc<TileGroupHeader>>>,
    indirections: IndirectionTable,
}

impl VersionStore {
    /// Creates an empty store.
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            tile_groups: RwLock::new(Vec::new()),
            indirections: IndirectionTable::new(),
        }
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the header of tile group `tile_group_id`.
    pub fn resolve(&self, tile_group_id: u32) -> StorageResult<Arc<TileGroupHeader>> {
        self.tile_groups
            .read()
            .get(tile_group_id as usize)
            .cloned()
            .ok_or(StorageError::UnknownTileGroup(tile_group_id))
    }

    /// Returns the number of tile groups.
    pub fn tile_group_count(&self) -> u32 {
        self.tile_groups.read().len() as u32
    }

    /// Returns an accessor for the slot at `location`.
    pub fn slot(&self, location: ItemPointer) -> StorageResult<SlotRef<'_>> {
        let group = self.resolve(location.tile_group_id)?;
        if group.header(location.offset).is_none() {
            return Err(StorageError::SlotOutOfRange {
                tile_group_id: location.tile_group_id,
                offset: location.offset,
                capacity: group.capacity(),
            });
        }
        Ok(SlotRef {
            store: self,
            group,
            location,
        })
    }

    /// Hands out an empty slot, adding a tile group when all are full.
    pub fn allocate_slot(&self) -> StorageResult<ItemPointer> {
        {
            let groups = self.tile_groups.read();
            for group in groups.iter().rev() {
                if let Some(offset) = group.allocate() {
                    return Ok(ItemPointer::new(group.id(), offset));
                }
            }
        }

        let mut groups = self.tile_groups.write();
        // Another thread may have grown the catalog while we waited.
        if let Some(group) = groups.last() {
            if let Some(offset) = group.allocate() {
                return Ok(ItemPointer::new(group.id(), offset));
            }
        }
        let tile_groups = groups.len() as u32;
        if tile_groups >= self.config.max_tile_groups {
            return Err(StorageError::Exhausted { tile_groups });
        }
        let group = Arc::new(TileGroupHeader::new(
            tile_groups,
            self.config.tuples_per_tile_group,
        ));
        let offset = group.allocate().ok_or(StorageError::Exhausted { tile_groups })?;
        groups.push(group);
        Ok(ItemPointer::new(tile_groups, offset))
    }

    /// Resets the slot at `location` to the empty state and returns it to
    /// its tile group's free list. Only the garbage collector calls this.
    pub fn recycle_slot(&self, location: ItemPointer) -> StorageResult<()> {
        let slot = self.slot(location)?;
        slot.group.recycle(location.offset);
        Ok(())
    }

    /// Returns `location` tagged with its slot's current generation.
    pub fn tag(&self, location: ItemPointer) -> StorageResult<TaggedPointer> {
        if location.is_null() {
            return Ok(TaggedPointer::NULL);
        }
        Ok(self.slot(location)?.tagged())
    }

    /// Returns the indirection table.
    pub fn indirections(&self) -> &IndirectionTable {
        &self.indirections
    }

    /// Allocates an index entry whose chain head is `head`.
    pub fn allocate_indirection(&self, head: ItemPointer) -> StorageResult<IndirectionId> {
        let tagged = self.tag(head)?;
        Ok(self.indirections.allocate(tagged))
    }

    /// Returns the chain head behind index entry `id`.
    pub fn indirection_head(&self, id: IndirectionId) -> StorageResult<TaggedPointer> {
        self.indirections.head(id)
    }

    /// Walks the version chain behind `id` from newest to oldest.
    ///
    /// `visit` is called with each version and its depth (0 for the head)
    /// and returns true to stop at it.
    /// Every field `visit` reads is validated against the slot's generation
    /// afterwards; if the slot was recycled under the walker, the walk
    /// restarts from the index entry. A head whose generation no longer
    /// matches a stable index entry means the entry dangles, and the walk
    /// returns `None`.
    pub fn traverse<F>(&self, id: IndirectionId, visit: F) -> StorageResult<Option<ItemPointer>>
    where
        F: FnMut(usize, &SlotRef<'_>) -> bool,
    {
        Ok(match self.walk(id, visit)? {
            Walk::Hit(location) => Some(location),
            Walk::Exhausted | Walk::Dangling => None,
        })
    }

    /// Returns every version reachable from `id`, newest first.
    ///
    /// A dangling index entry has no versions.
    pub fn versions(&self, id: IndirectionId) -> StorageResult<Vec<ItemPointer>> {
        let mut chain = Vec::new();
        let walk = self.walk(id, |depth, slot| {
            chain.truncate(depth);
            chain.push(slot.location());
            false
        })?;
        if walk == Walk::Dangling {
            chain.clear();
        }
        Ok(chain)
    }

    fn walk<F>(&self, id: IndirectionId, mut visit: F) -> StorageResult<Walk>
    where
        F: FnMut(usize, &SlotRef<'_>) -> bool,
    {
        'restart: loop {
            let head = self.indirection_head(id)?;
            let mut current = head;
            let mut depth = 0;
            while !current.is_null() {
                let slot = self.slot(current.pointer())?;
                let hit = visit(depth, &slot);
                let next = slot.next_tagged();
                fence(Ordering::Acquire);
                if slot.generation() != current.generation() {
                    if current == head && self.indirection_head(id)? == head {
                        return Ok(Walk::Dangling);
                    }
                    continue 'restart;
                }
                if hit {
                    return Ok(Walk::Hit(current.pointer()));
                }
                current = next;
                depth += 1;
            }
            return Ok(Walk::Exhausted);
        }
    }
}

/// How a chain walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Walk {
    Hit(ItemPointer),
    Exhausted,
    Dangling,
}

impl Default for VersionStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

/// Accessor for one tuple slot.
///
/// Wraps the slot's [`TupleHeader`] with typed getters, setters and the two
/// compare-and-swap operations the transaction manager relies on: owner
/// acquisition and index re-pointing.
#[derive(Debug, Clone)]
pub struct SlotRef<'a> {
    store: &'a VersionStore,
    group: Arc<TileGroupHeader>,
    location: ItemPointer,
}

impl SlotRef<'_> {
    #[inline]
    fn header(&self) -> &TupleHeader {
        self.group
            .header(self.location.offset)
            .expect("slot offset validated when the accessor was built")
    }

    /// Returns the slot's address.
    pub fn location(&self) -> ItemPointer {
        self.location
    }

    /// Returns the slot's recycle generation.
    pub fn generation(&self) -> u16 {
        self.header().generation()
    }

    /// Returns the slot's address tagged with its current generation.
    pub fn tagged(&self) -> TaggedPointer {
        TaggedPointer::new(self.location, self.generation())
    }

    /// Returns true if the slot is empty: no owner, interval `[INFINITY, INFINITY)`.
    pub fn is_virgin(&self) -> bool {
        self.owner() == TxnId::INVALID
            && self.begin_commit_id() == CommitId::INFINITY
            && self.end_commit_id() == CommitId::INFINITY
    }

    /// Returns the owning transaction.
    pub fn owner(&self) -> TxnId {
        self.header().owner()
    }

    /// Sets the owner unconditionally.
    pub fn set_owner(&self, owner: TxnId) {
        self.header().set_owner(owner);
    }

    /// Swaps the owner from `expected` to `new` atomically.
    pub fn compare_and_set_owner(&self, expected: TxnId, new: TxnId) -> bool {
        self.header().compare_and_set_owner(expected, new)
    }

    /// Returns the begin of the visibility interval.
    pub fn begin_commit_id(&self) -> CommitId {
        self.header().begin_commit_id()
    }

    /// Sets the begin of the visibility interval.
    pub fn set_begin_commit_id(&self, cid: CommitId) {
        self.header().set_begin_commit_id(cid);
    }

    /// Returns the end of the visibility interval.
    pub fn end_commit_id(&self) -> CommitId {
        self.header().end_commit_id()
    }

    /// Sets the end of the visibility interval.
    pub fn set_end_commit_id(&self, cid: CommitId) {
        self.header().set_end_commit_id(cid);
    }

    /// Returns the next (older) version's address.
    pub fn next_pointer(&self) -> ItemPointer {
        self.header().next().pointer()
    }

    /// Returns the next (older) version's tagged link.
    pub fn next_tagged(&self) -> TaggedPointer {
        self.header().next()
    }

    /// Links this version to an older one, tagged with the target's generation.
    pub fn set_next_pointer(&self, next: ItemPointer) -> StorageResult<()> {
        let tagged = self.store.tag(next)?;
        self.header().set_next(tagged);
        Ok(())
    }

    /// Clears the next link only if it still holds `expected`.
    pub fn compare_and_clear_next(&self, expected: TaggedPointer) -> bool {
        self.header()
            .compare_and_set_next(expected, TaggedPointer::NULL)
    }

    /// Returns the previous (newer) version's address.
    pub fn prev_pointer(&self) -> ItemPointer {
        self.header().prev().pointer()
    }

    /// Returns the previous (newer) version's tagged link.
    pub fn prev_tagged(&self) -> TaggedPointer {
        self.header().prev()
    }

    /// Links this version to a newer one, tagged with the target's generation.
    pub fn set_prev_pointer(&self, prev: ItemPointer) -> StorageResult<()> {
        let tagged = self.store.tag(prev)?;
        self.header().set_prev(tagged);
        Ok(())
    }

    /// Returns the index entry this version hangs off.
    pub fn indirection(&self) -> IndirectionId {
        self.header().indirection()
    }

    /// Records the index entry this version hangs off.
    pub fn set_indirection(&self, id: IndirectionId) {
        self.header().set_indirection(id);
    }

    /// Re-points this slot's index entry from `expected_target` to `new_target`.
    ///
    /// Returns `Ok(false)` if the slot has no index entry or the entry no
    /// longer points at `expected_target`'s current incarnation.
    pub fn compare_and_set_indirection(
        &self,
        expected_target: ItemPointer,
        new_target: ItemPointer,
    ) -> StorageResult<bool> {
        let id = self.indirection();
        if id.is_none() {
            return Ok(false);
        }
        let expected = self.store.tag(expected_target)?;
        let new = self.store.tag(new_target)?;
        self.store.indirections.compare_and_set(id, expected, new)
    }
}
