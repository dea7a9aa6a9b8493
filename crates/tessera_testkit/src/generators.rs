//! Property-based test generators using proptest.
//!
//! Provides strategies for generating table workloads.

use crate::fixtures::{Key, Table, WriteOutcome};
use proptest::prelude::*;
use tessera_core::{CoreResult, IsolationLevel, Transaction};

/// Strategy for generating keys from a small space, so operations collide.
pub fn key_strategy(max_key: Key) -> impl Strategy<Value = Key> {
    0..max_key
}

/// Strategy for generating row values (arbitrary bytes).
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..64)
}

/// Strategy for choosing an isolation level.
pub fn isolation_strategy() -> impl Strategy<Value = IsolationLevel> {
    prop_oneof![
        Just(IsolationLevel::BasicOptimistic),
        Just(IsolationLevel::OptimisticWithDependencyTracking),
    ]
}

/// One table operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableOperation {
    /// Insert a row
    Insert {
        /// Row key
        key: Key,
        /// Row value
        value: Vec<u8>,
    },
    /// Replace a row's value
    Update {
        /// Row key
        key: Key,
        /// New value
        value: Vec<u8>,
    },
    /// Delete a row
    Delete {
        /// Row key
        key: Key,
    },
    /// Read a row
    Get {
        /// Row key
        key: Key,
    },
}

impl TableOperation {
    /// Returns the key the operation touches.
    pub fn key(&self) -> Key {
        match self {
            Self::Insert { key, .. }
            | Self::Update { key, .. }
            | Self::Delete { key }
            | Self::Get { key } => *key,
        }
    }

    /// Applies the operation inside `txn`.
    ///
    /// Reads report [`WriteOutcome::Applied`] if the row exists and
    /// [`WriteOutcome::NotFound`] otherwise.
    pub fn apply(&self, table: &Table, txn: &mut Transaction) -> CoreResult<WriteOutcome> {
        match self {
            Self::Insert { key, value } => table.insert(txn, *key, value.clone()),
            Self::Update { key, value } => table.update(txn, *key, value.clone()),
            Self::Delete { key } => table.delete(txn, *key),
            Self::Get { key } => Ok(match table.get(txn, *key)? {
                Some(_) => WriteOutcome::Applied,
                None => WriteOutcome::NotFound,
            }),
        }
    }
}

/// Strategy for generating table operations over keys `0..max_key`.
pub fn table_operation_strategy(max_key: Key) -> impl Strategy<Value = TableOperation> {
    prop_oneof![
        3 => (key_strategy(max_key), value_strategy())
            .prop_map(|(key, value)| TableOperation::Insert { key, value }),
        2 => (key_strategy(max_key), value_strategy())
            .prop_map(|(key, value)| TableOperation::Update { key, value }),
        1 => key_strategy(max_key).prop_map(|key| TableOperation::Delete { key }),
        2 => key_strategy(max_key).prop_map(|key| TableOperation::Get { key }),
    ]
}

/// Strategy for generating one transaction's worth of operations.
pub fn transaction_strategy(
    max_key: Key,
    max_ops: usize,
) -> impl Strategy<Value = Vec<TableOperation>> {
    prop::collection::vec(table_operation_strategy(max_key), 1..max_ops)
}

/// Strategy for generating a history: transactions, each flagged commit or abort.
pub fn history_strategy(
    max_key: Key,
    max_txns: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<(Vec<TableOperation>, bool)>> {
    prop::collection::vec(
        (transaction_strategy(max_key, max_ops), prop::bool::weighted(0.75)),
        1..max_txns,
    )
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn operations_stay_in_key_space(op in table_operation_strategy(8)) {
            prop_assert!(op.key() < 8);
        }

        #[test]
        fn transactions_are_not_empty(ops in transaction_strategy(8, 6)) {
            prop_assert!(!ops.is_empty());
            prop_assert!(ops.len() < 6);
        }
    }
}
