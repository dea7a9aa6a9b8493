//! Error types for tessera core.

use tessera_storage::TxnId;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in tessera core operations.
///
/// Concurrency conflicts are not errors: a failed ownership acquisition or a
/// failed validation is reported through [`TxnResult`](crate::TxnResult) and
/// the boolean returned by the `perform_*` calls.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Version store error.
    #[error("storage error: {0}")]
    Storage(#[from] tessera_storage::StorageError),

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// The transaction has already committed or aborted.
    #[error("transaction {txn_id} is no longer active")]
    TransactionNotActive {
        /// The finished transaction.
        txn_id: TxnId,
    },
}

impl CoreError {
    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a transaction not active error.
    pub fn transaction_not_active(txn_id: TxnId) -> Self {
        Self::TransactionNotActive { txn_id }
    }
}
