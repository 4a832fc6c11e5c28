//! Error types for the transaction engine.

use crate::log::LogEntry;
use crate::types::{Operation, TransactionId};
use crosstx_store::StoreError;
use thiserror::Error;

/// Result type for transaction operations.
pub type TxResult<T> = Result<T, TxError>;

/// Errors that can occur in transaction operations.
#[derive(Debug, Error)]
pub enum TxError {
    /// Backing store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// An argument is malformed.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// An operation violated the required predecessor within its key-group.
    #[error("operation {to} is not allowed after {}", from.map_or("no operation".to_owned(), |op| op.to_string()))]
    IllegalSequence {
        /// The operation already staged for the key-group, if any.
        from: Option<Operation>,
        /// The rejected operation.
        to: Operation,
    },

    /// A create targeted a key that already holds a record.
    #[error("record already exists at [{key}]")]
    RecordExists {
        /// The occupied key.
        key: String,
    },

    /// The key-group is held by another in-flight transaction.
    ///
    /// Retryable: the caller should back off and retry the operation.
    #[error("key [{key}] is being modified under another transaction")]
    ConcurrentModification {
        /// The contended key.
        key: String,
    },

    /// Operation not permitted in the current transaction state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// A persisted lock or write-ahead log record failed to decode.
    #[error("write-ahead log corruption: {message}")]
    WalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Recovery replay failed partway; consistency needs manual repair.
    #[error(transparent)]
    Indoubt(#[from] Box<IndoubtError>),
}

impl TxError {
    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a WAL corruption error.
    pub fn wal_corruption(message: impl Into<String>) -> Self {
        Self::WalCorruption {
            message: message.into(),
        }
    }

    /// Creates an illegal operation-sequence error.
    pub fn illegal_sequence(from: Option<Operation>, to: Operation) -> Self {
        Self::IllegalSequence { from, to }
    }

    /// Creates a retryable concurrent-modification error for `key`.
    pub fn concurrent_modification(key: impl Into<String>) -> Self {
        Self::ConcurrentModification { key: key.into() }
    }

    /// Returns `true` if the caller may retry after backing off.
    ///
    /// Covers contention surfaced by this crate and optimistic commit
    /// conflicts surfaced by the backing store; both mean another writer
    /// won the key-group, not that the operation itself is invalid.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConcurrentModification { .. } => true,
            Self::Store(source) => source.is_conflict(),
            _ => false,
        }
    }
}

/// Report of a transaction whose recovery replay failed partway.
///
/// Carries everything an operator needs to repair storage by hand: the
/// transaction id, the full ordered log with subject snapshots, and how many
/// entries were already rolled forward before the failure.
#[derive(Debug, Error)]
#[error(
    "indoubt transaction [{id}]: {committed} of {} logged operations rolled forward; \
     manual recovery required",
    log.len()
)]
pub struct IndoubtError {
    /// The failed transaction's id.
    pub id: TransactionId,
    /// The transaction's full ordered log.
    pub log: Vec<LogEntry>,
    /// Number of entries successfully rolled forward before the failure.
    pub committed: usize,
    /// The replay failure itself.
    #[source]
    pub source: StoreError,
}

impl IndoubtError {
    /// Wraps the report into a [`TxError`].
    #[must_use]
    pub fn into_error(self) -> TxError {
        TxError::Indoubt(Box::new(self))
    }
}
