//! Core type definitions for the transaction engine.

use crate::error::{TxError, TxResult};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a global transaction.
///
/// Transaction ids are random UUIDs. The id doubles as the name of the
/// transaction's lock records and of its write-ahead log marker record.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Creates a new random transaction id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses a transaction id from its string form.
    ///
    /// # Errors
    ///
    /// Returns [`TxError::InvalidArgument`] if the string is not a UUID.
    pub fn parse(s: &str) -> TxResult<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| TxError::invalid_argument(format!("malformed transaction id [{s}]")))
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({})", self.0)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operation recorded in a transaction's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Operation {
    /// A point read.
    Read = 1,
    /// Creation of a record that must not already exist.
    Create = 2,
    /// Replacement of a previously read record.
    Update = 3,
    /// Deletion of a previously read record.
    Delete = 4,
}

impl Operation {
    /// Converts a byte to an operation.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Read),
            2 => Some(Self::Create),
            3 => Some(Self::Update),
            4 => Some(Self::Delete),
            _ => None,
        }
    }

    /// Converts the operation to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Returns `true` if the operation mutates its key-group.
    #[must_use]
    pub const fn is_mutating(self) -> bool {
        !matches!(self, Self::Read)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Read => "READ",
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// Commit-protocol state of a log entry.
///
/// State only moves forward: `Pending` → `Prepared` → `Committed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogState {
    /// Recorded but not yet prepared.
    Pending,
    /// Locked and durably logged.
    Prepared,
    /// Applied to its key-group.
    Committed,
}

impl LogState {
    /// Checks that a transition to `next` moves forward.
    ///
    /// # Errors
    ///
    /// Returns [`TxError::InvalidOperation`] on a backward transition.
    pub fn ensure_advances_to(self, next: LogState) -> TxResult<()> {
        if next >= self {
            Ok(())
        } else {
            Err(TxError::invalid_operation(format!(
                "log state cannot move from {self:?} back to {next:?}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_ids_are_unique() {
        assert_ne!(TransactionId::new(), TransactionId::new());
    }

    #[test]
    fn transaction_id_parse_roundtrip() {
        let id = TransactionId::new();
        assert_eq!(TransactionId::parse(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn transaction_id_parse_rejects_garbage() {
        assert!(TransactionId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn operation_byte_roundtrip() {
        for op in [
            Operation::Read,
            Operation::Create,
            Operation::Update,
            Operation::Delete,
        ] {
            assert_eq!(Operation::from_byte(op.as_byte()), Some(op));
        }
        assert_eq!(Operation::from_byte(0), None);
        assert_eq!(Operation::from_byte(9), None);
    }

    #[test]
    fn only_read_is_non_mutating() {
        assert!(!Operation::Read.is_mutating());
        assert!(Operation::Create.is_mutating());
        assert!(Operation::Update.is_mutating());
        assert!(Operation::Delete.is_mutating());
    }

    #[test]
    fn log_state_moves_forward_only() {
        assert!(LogState::Pending
            .ensure_advances_to(LogState::Prepared)
            .is_ok());
        assert!(LogState::Prepared
            .ensure_advances_to(LogState::Committed)
            .is_ok());
        assert!(LogState::Committed
            .ensure_advances_to(LogState::Pending)
            .is_err());
    }
}
