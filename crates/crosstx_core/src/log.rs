//! Transaction log entries.

use crate::error::TxResult;
use crate::types::{LogState, Operation};
use crosstx_store::{Key, Record};

/// One logged operation of a global transaction.
///
/// Entries carry a snapshot of the affected record (the subject) so the
/// operation can be re-applied during recovery without consulting the
/// process that logged it.
#[derive(Debug, Clone)]
pub struct LogEntry {
    sequence: u64,
    operation: Operation,
    subject: Record,
    state: LogState,
}

impl LogEntry {
    /// Creates a new entry in the `Pending` state.
    ///
    /// Sequence numbers start at 1 and are unique and increasing within a
    /// transaction; [`crate::GlobalTransaction::append`] assigns them.
    #[must_use]
    pub fn new(sequence: u64, operation: Operation, subject: Record) -> Self {
        Self {
            sequence,
            operation,
            subject,
            state: LogState::Pending,
        }
    }

    /// Reconstructs an entry from the write-ahead log.
    pub(crate) fn restore(
        sequence: u64,
        operation: Operation,
        subject: Record,
        state: LogState,
    ) -> Self {
        Self {
            sequence,
            operation,
            subject,
            state,
        }
    }

    /// Returns the entry's sequence number.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns the logged operation.
    #[must_use]
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Returns the affected record snapshot.
    #[must_use]
    pub fn subject(&self) -> &Record {
        &self.subject
    }

    /// Returns the key-group the entry belongs to.
    #[must_use]
    pub fn group(&self) -> Key {
        self.subject.key.group()
    }

    /// Returns the entry's commit-protocol state.
    #[must_use]
    pub fn state(&self) -> LogState {
        self.state
    }

    /// Returns `true` if the entry mutates its key-group.
    #[must_use]
    pub fn is_mutating(&self) -> bool {
        self.operation.is_mutating()
    }

    /// Advances the entry's state.
    ///
    /// # Errors
    ///
    /// Returns [`crate::TxError::InvalidOperation`] if the transition would
    /// move backward.
    pub fn advance(&mut self, state: LogState) -> TxResult<()> {
        self.state.ensure_advances_to(state)?;
        self.state = state;
        Ok(())
    }
}
