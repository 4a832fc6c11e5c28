//! Store records.

use crate::key::Key;
use std::fmt;

/// A stored record: a key plus an opaque payload.
///
/// The store and the transaction engine both treat the payload as an opaque
/// byte blob; object serialization belongs to an external translation layer.
#[derive(Clone, PartialEq, Eq)]
pub struct Record {
    /// The record's key.
    pub key: Key,
    /// The record's payload bytes.
    pub payload: Vec<u8>,
}

impl Record {
    /// Creates a record from a key and payload.
    #[must_use]
    pub fn new(key: Key, payload: Vec<u8>) -> Self {
        Self { key, payload }
    }

    /// Creates a record with an empty payload (a marker record).
    #[must_use]
    pub fn marker(key: Key) -> Self {
        Self {
            key,
            payload: Vec::new(),
        }
    }

    /// Returns the kind of the record's key.
    #[must_use]
    pub fn kind(&self) -> &str {
        self.key.kind()
    }

    /// Returns `true` if this is a reserved system record.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.key.is_system()
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("key", &self.key)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}
