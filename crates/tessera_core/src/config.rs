//! Transaction manager configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tessera_storage::StoreConfig;

/// Concurrency control flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IsolationLevel {
    /// Plain optimistic concurrency control: validate the read/write set at commit.
    #[default]
    BasicOptimistic,
    /// Optimistic concurrency control plus commit dependencies on the owners
    /// of uncommitted versions a transaction read; an aborting owner cascades.
    OptimisticWithDependencyTracking,
}

impl IsolationLevel {
    /// Returns true if transactions carry dependency state.
    pub const fn tracks_dependencies(self) -> bool {
        matches!(self, Self::OptimisticWithDependencyTracking)
    }
}

/// Garbage collection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GcMode {
    /// Superseded versions are never reclaimed.
    Off,
    /// Two-phase unlink-then-reclaim collector.
    #[default]
    Vacuum,
}

/// Configuration for a [`TransactionManager`](crate::TransactionManager).
#[derive(Debug, Clone)]
pub struct Config {
    /// Concurrency control flavour for every transaction of this manager.
    pub isolation: IsolationLevel,

    /// Garbage collection strategy.
    pub gc_mode: GcMode,

    /// Period of the background garbage collection worker.
    pub gc_interval: Duration,

    /// Number of tuple slots per tile group.
    pub tuples_per_tile_group: u16,

    /// Maximum number of tile groups the version store may allocate.
    pub max_tile_groups: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            isolation: IsolationLevel::BasicOptimistic,
            gc_mode: GcMode::Vacuum,
            gc_interval: Duration::from_millis(10),
            tuples_per_tile_group: 1000,
            max_tile_groups: 1 << 20,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the isolation level.
    #[must_use]
    pub const fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    /// Sets the garbage collection strategy.
    #[must_use]
    pub const fn gc_mode(mut self, mode: GcMode) -> Self {
        self.gc_mode = mode;
        self
    }

    /// Sets the background garbage collection period.
    #[must_use]
    pub const fn gc_interval(mut self, interval: Duration) -> Self {
        self.gc_interval = interval;
        self
    }

    /// Sets the number of slots per tile group.
    #[must_use]
    pub const fn tuples_per_tile_group(mut self, tuples: u16) -> Self {
        self.tuples_per_tile_group = tuples;
        self
    }

    /// Sets the tile group limit.
    #[must_use]
    pub const fn max_tile_groups(mut self, max: u32) -> Self {
        self.max_tile_groups = max;
        self
    }

    /// Returns the version store part of this configuration.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            tuples_per_tile_group: self.tuples_per_tile_group,
            max_tile_groups: self.max_tile_groups,
        }
    }
}
