//! Slot addresses and generation-tagged links.

use std::fmt;

/// Address of one tuple slot: `(tile_group_id, offset)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemPointer {
    /// Tile group holding the slot.
    pub tile_group_id: u32,
    /// Slot offset inside the tile group.
    pub offset: u16,
}

impl ItemPointer {
    /// The null pointer; terminates version chains.
    pub const NULL: Self = Self {
        tile_group_id: u32::MAX,
        offset: u16::MAX,
    };

    /// Creates a pointer to `offset` in tile group `tile_group_id`.
    #[must_use]
    pub const fn new(tile_group_id: u32, offset: u16) -> Self {
        Self {
            tile_group_id,
            offset,
        }
    }

    /// Returns true for [`ItemPointer::NULL`].
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.tile_group_id == u32::MAX && self.offset == u16::MAX
    }
}

impl fmt::Display for ItemPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("(null)")
        } else {
            write!(f, "({}, {})", self.tile_group_id, self.offset)
        }
    }
}

/// An [`ItemPointer`] paired with the generation of the slot it names.
///
/// Packed into a single `u64` (`tile_group_id:32 | offset:16 | generation:16`)
/// so it can live in an `AtomicU64` and be swapped with one CAS. Two tagged
/// pointers to the same address but different generations compare unequal,
/// which is what defeats ABA after the collector recycles a slot.
///
/// The tag is 16 bits wide: a stale pointer is only mistaken for a live one
/// if its slot was recycled a multiple of 65 536 times in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaggedPointer(u64);

impl TaggedPointer {
    /// The null link.
    pub const NULL: Self = Self(u64::MAX);

    /// Tags `pointer` with `generation`.
    #[must_use]
    pub const fn new(pointer: ItemPointer, generation: u16) -> Self {
        if pointer.is_null() {
            return Self::NULL;
        }
        Self(((pointer.tile_group_id as u64) << 32) | ((pointer.offset as u64) << 16) | generation as u64)
    }

    /// Rebuilds a tagged pointer from its packed form.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the packed form.
    #[must_use]
    pub const fn into_raw(self) -> u64 {
        self.0
    }

    /// Returns the untagged address.
    #[must_use]
    pub const fn pointer(self) -> ItemPointer {
        if self.is_null() {
            return ItemPointer::NULL;
        }
        ItemPointer {
            tile_group_id: (self.0 >> 32) as u32,
            offset: ((self.0 >> 16) & 0xFFFF) as u16,
        }
    }

    /// Returns the generation tag.
    #[must_use]
    pub const fn generation(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    /// Returns true for [`TaggedPointer::NULL`].
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u64::MAX
    }
}

impl fmt::Display for TaggedPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("(null)")
        } else {
            write!(f, "{}@g{}", self.pointer(), self.generation())
        }
    }
}
