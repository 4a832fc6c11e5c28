//! Per-key-group locks.

use crate::error::{TxError, TxResult};
use crate::types::TransactionId;
use crosstx_store::{Key, Record};

/// Reserved kind for lock records.
pub const LOCK_KIND: &str = "_lock";

/// A short-lived lock co-located with a key-group.
///
/// Exactly one lock may exist per key-group per in-flight transaction. The
/// lock names the owning transaction (its id is also the record's name) and
/// references the key of the transaction's write-ahead log marker, so any
/// reader that finds the lock can locate the durable intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lock {
    id: TransactionId,
    anchor: Key,
    timestamp_millis: u64,
}

impl Lock {
    /// Creates a lock owned by transaction `id`, pointing at the
    /// write-ahead log marker `anchor`, stamped with `timestamp_millis`.
    #[must_use]
    pub fn new(id: TransactionId, anchor: Key, timestamp_millis: u64) -> Self {
        Self {
            id,
            anchor,
            timestamp_millis,
        }
    }

    /// Returns the owning transaction's id.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the key of the owning transaction's write-ahead log marker.
    #[must_use]
    pub fn anchor(&self) -> &Key {
        &self.anchor
    }

    /// Returns the lock's creation time in milliseconds.
    #[must_use]
    pub fn timestamp_millis(&self) -> u64 {
        self.timestamp_millis
    }

    /// Returns the key a lock of transaction `id` occupies under `group`.
    pub fn record_key(group: &Key, id: TransactionId) -> TxResult<Key> {
        Ok(group.group().child(LOCK_KIND, id.to_string())?)
    }

    /// Encodes the lock as a record under the key-group of `group`.
    pub fn to_record(&self, group: &Key) -> TxResult<Record> {
        let key = Self::record_key(group, self.id)?;
        let anchor = self.anchor.encode();
        let mut payload = Vec::with_capacity(4 + anchor.len() + 8);
        payload.extend_from_slice(&(anchor.len() as u32).to_le_bytes());
        payload.extend_from_slice(anchor.as_bytes());
        payload.extend_from_slice(&self.timestamp_millis.to_le_bytes());
        Ok(Record::new(key, payload))
    }

    /// Decodes a lock from its record.
    ///
    /// # Errors
    ///
    /// Returns [`TxError::WalCorruption`] if the record is not a
    /// well-formed lock.
    pub fn from_record(record: &Record) -> TxResult<Self> {
        if record.kind() != LOCK_KIND {
            return Err(TxError::wal_corruption(format!(
                "record [{}] is not a lock",
                record.key
            )));
        }
        let id = TransactionId::parse(record.key.name())
            .map_err(|_| TxError::wal_corruption("lock name is not a transaction id"))?;

        let payload = &record.payload;
        if payload.len() < 4 {
            return Err(TxError::wal_corruption("lock payload truncated"));
        }
        let anchor_len = u32::from_le_bytes(
            payload[0..4]
                .try_into()
                .map_err(|_| TxError::wal_corruption("invalid anchor length"))?,
        ) as usize;
        let expected = 4 + anchor_len + 8;
        if payload.len() != expected {
            return Err(TxError::wal_corruption(format!(
                "lock payload is {} bytes, expected {expected}",
                payload.len()
            )));
        }
        let anchor_text = std::str::from_utf8(&payload[4..4 + anchor_len])
            .map_err(|_| TxError::wal_corruption("anchor key is not UTF-8"))?;
        let anchor = Key::parse(anchor_text)
            .map_err(|_| TxError::wal_corruption("anchor key does not parse"))?;
        let timestamp_millis = u64::from_le_bytes(
            payload[4 + anchor_len..expected]
                .try_into()
                .map_err(|_| TxError::wal_corruption("invalid timestamp"))?,
        );

        Ok(Self {
            id,
            anchor,
            timestamp_millis,
        })
    }
}
