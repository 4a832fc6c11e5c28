//! Error types for store operations.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A local transaction handle is not known to the store.
    #[error("unknown local transaction: handle {handle}")]
    UnknownTransaction {
        /// The unrecognized handle value.
        handle: u64,
    },

    /// A local transaction was already committed or rolled back.
    #[error("local transaction is closed: handle {handle}")]
    TransactionClosed {
        /// The handle of the closed transaction.
        handle: u64,
    },

    /// An access crossed the key-group a local transaction is scoped to.
    #[error("key [{key}] is outside key-group [{group}]")]
    GroupMismatch {
        /// The key-group root the transaction was begun on.
        group: String,
        /// The offending key.
        key: String,
    },

    /// The key-group was modified by another committer since `begin`.
    #[error("commit conflict on key-group [{group}]")]
    Conflict {
        /// The contended key-group root.
        group: String,
    },

    /// A key component is malformed.
    #[error("invalid key: {message}")]
    InvalidKey {
        /// Description of the problem.
        message: String,
    },

    /// An injected fault fired (test stores only).
    #[error("store fault: {message}")]
    Fault {
        /// Description of the injected fault.
        message: String,
    },
}

impl StoreError {
    /// Creates an invalid key error.
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Creates an injected fault error.
    pub fn fault(message: impl Into<String>) -> Self {
        Self::Fault {
            message: message.into(),
        }
    }

    /// Returns `true` if this error is a key-group commit conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
