//! Error types for version store operations.

use thiserror::Error;

/// Result type for version store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while resolving or allocating tuple slots.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No tile group is registered under this id.
    #[error("unknown tile group {0}")]
    UnknownTileGroup(u32),

    /// The offset lies outside the tile group's slot array.
    #[error("slot offset {offset} out of range for tile group {tile_group_id} ({capacity} slots)")]
    SlotOutOfRange {
        /// Tile group that was addressed.
        tile_group_id: u32,
        /// Requested slot offset.
        offset: u16,
        /// Number of slots in the tile group.
        capacity: u16,
    },

    /// No index entry is registered under this id.
    #[error("unknown indirection entry {0}")]
    UnknownIndirection(u64),

    /// Every tile group is full and the catalog may not grow any further.
    #[error("version store exhausted: {tile_groups} tile groups in use")]
    Exhausted {
        /// Number of tile groups currently allocated.
        tile_groups: u32,
    },
}
