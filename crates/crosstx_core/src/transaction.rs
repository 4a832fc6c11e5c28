//! Global transaction state.

use crate::log::LogEntry;
use crate::types::{Operation, TransactionId};
use crosstx_store::{Key, Record};

/// A global transaction: a unique id and an ordered log of operations
/// across possibly many key-groups.
///
/// The transaction itself is plain data. The commit protocol lives in
/// [`crate::Coordinator`]; durability lives in the write-ahead log
/// encoding.
#[derive(Debug)]
pub struct GlobalTransaction {
    id: TransactionId,
    log: Vec<LogEntry>,
}

impl GlobalTransaction {
    /// Creates a new transaction with a fresh id and an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: TransactionId::new(),
            log: Vec::new(),
        }
    }

    /// Reconstructs a transaction from a decoded write-ahead log.
    pub(crate) fn restore(id: TransactionId, log: Vec<LogEntry>) -> Self {
        Self { id, log }
    }

    /// Returns the transaction id.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the ordered log.
    #[must_use]
    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    /// Appends an operation, assigning the next sequence number.
    ///
    /// Returns the index of the new entry.
    pub fn append(&mut self, operation: Operation, subject: Record) -> usize {
        let sequence = self.log.len() as u64 + 1;
        self.log.push(LogEntry::new(sequence, operation, subject));
        self.log.len() - 1
    }

    /// Returns a mutable reference to the entry at `index`.
    pub(crate) fn entry_mut(&mut self, index: usize) -> &mut LogEntry {
        &mut self.log[index]
    }

    /// Returns the indices of mutating entries, in log order.
    #[must_use]
    pub fn mutating_indices(&self) -> Vec<usize> {
        self.log
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_mutating())
            .map(|(i, _)| i)
            .collect()
    }

    /// Returns the distinct key-groups touched by mutating entries, in
    /// first-appearance order.
    ///
    /// The commit protocol is chosen by the number of distinct groups, not
    /// by the number of mutating entries.
    #[must_use]
    pub fn mutated_groups(&self) -> Vec<Key> {
        let mut groups: Vec<Key> = Vec::new();
        for entry in self.log.iter().filter(|e| e.is_mutating()) {
            let group = entry.group();
            if !groups.contains(&group) {
                groups.push(group);
            }
        }
        groups
    }

    /// Returns the index of the anchor entry: the last mutating entry,
    /// whose key-group hosts the write-ahead log.
    #[must_use]
    pub fn anchor_index(&self) -> Option<usize> {
        self.log.iter().rposition(LogEntry::is_mutating)
    }
}

impl Default for GlobalTransaction {
    fn default() -> Self {
        Self::new()
    }
}
