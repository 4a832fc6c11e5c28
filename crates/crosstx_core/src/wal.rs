//! Write-ahead log encoding.
//!
//! A transaction's durable intent is persisted as a small record tree under
//! its **anchor** key-group (the group touched by the last mutating log
//! entry):
//!
//! ```text
//! anchor-root / _txn:<transaction-id>            marker, empty payload
//! anchor-root / _txn:<transaction-id> / _log:<sequence>   one per entry
//! ```
//!
//! Each log record's payload is a fixed little-endian layout:
//! operation byte, subject key length and UTF-8 bytes, subject payload
//! length and bytes. While these records exist, the transaction is fully
//! recoverable by any reader.

use crate::error::{TxError, TxResult};
use crate::log::LogEntry;
use crate::transaction::GlobalTransaction;
use crate::types::{LogState, Operation, TransactionId};
use crosstx_store::{Key, Record};

/// Reserved kind for write-ahead log marker records.
pub const TRANSACTION_KIND: &str = "_txn";

/// Reserved kind for write-ahead log entry records.
pub const LOG_KIND: &str = "_log";

/// Maximum size of a subject payload in a log record.
pub const MAX_SUBJECT_SIZE: usize = u32::MAX as usize;

/// Returns the marker key of transaction `id` anchored at `anchor_group`.
pub fn marker_key(anchor_group: &Key, id: TransactionId) -> TxResult<Key> {
    Ok(anchor_group.group().child(TRANSACTION_KIND, id.to_string())?)
}

/// Encodes a transaction's mutating log entries as write-ahead log records
/// rooted at `anchor_group`.
///
/// The first record is the marker; the rest are log records in sequence
/// order.
pub fn encode(transaction: &GlobalTransaction, anchor_group: &Key) -> TxResult<Vec<Record>> {
    let marker = marker_key(anchor_group, transaction.id())?;
    let mut records = vec![Record::marker(marker.clone())];

    for entry in transaction.log().iter().filter(|e| e.is_mutating()) {
        let key = marker.child(LOG_KIND, entry.sequence().to_string())?;
        records.push(Record::new(key, encode_entry(entry)?));
    }

    Ok(records)
}

fn encode_entry(entry: &LogEntry) -> TxResult<Vec<u8>> {
    let subject = entry.subject();
    if subject.payload.len() > MAX_SUBJECT_SIZE {
        return Err(TxError::invalid_argument(format!(
            "subject payload of {} bytes exceeds the {MAX_SUBJECT_SIZE} byte maximum",
            subject.payload.len()
        )));
    }

    let key_text = subject.key.encode();
    let mut buf = Vec::with_capacity(1 + 4 + key_text.len() + 4 + subject.payload.len());
    buf.push(entry.operation().as_byte());
    buf.extend_from_slice(&(key_text.len() as u32).to_le_bytes());
    buf.extend_from_slice(key_text.as_bytes());
    buf.extend_from_slice(&(subject.payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&subject.payload);
    Ok(buf)
}

/// Decodes a transaction from the records found under its marker key.
///
/// `records` may contain unrelated records from the anchor key-group; only
/// descendants of `marker` are considered. Entries come back in sequence
/// order, in the `Prepared` state.
///
/// # Errors
///
/// Returns [`TxError::WalCorruption`] if any log record is malformed.
pub fn decode(marker: &Key, records: &[Record]) -> TxResult<GlobalTransaction> {
    let id = TransactionId::parse(marker.name())
        .map_err(|_| TxError::wal_corruption("marker name is not a transaction id"))?;

    let mut entries: Vec<LogEntry> = Vec::new();
    for record in records {
        if record.kind() != LOG_KIND || !marker.contains(&record.key) {
            continue;
        }
        let sequence: u64 = record.key.name().parse().map_err(|_| {
            TxError::wal_corruption(format!(
                "log record [{}] has a non-numeric sequence",
                record.key
            ))
        })?;
        entries.push(decode_entry(sequence, &record.payload)?);
    }

    entries.sort_by_key(LogEntry::sequence);
    Ok(GlobalTransaction::restore(id, entries))
}

fn decode_entry(sequence: u64, payload: &[u8]) -> TxResult<LogEntry> {
    let mut cursor = 0;

    let read_u32 = |cursor: &mut usize| -> TxResult<usize> {
        if *cursor + 4 > payload.len() {
            return Err(TxError::wal_corruption("unexpected end of log record"));
        }
        let bytes: [u8; 4] = payload[*cursor..*cursor + 4]
            .try_into()
            .map_err(|_| TxError::wal_corruption("invalid length field"))?;
        *cursor += 4;
        Ok(u32::from_le_bytes(bytes) as usize)
    };

    if payload.is_empty() {
        return Err(TxError::wal_corruption("empty log record"));
    }
    let operation = Operation::from_byte(payload[cursor])
        .ok_or_else(|| TxError::wal_corruption("unknown operation byte"))?;
    cursor += 1;

    let key_len = read_u32(&mut cursor)?;
    if cursor + key_len > payload.len() {
        return Err(TxError::wal_corruption("unexpected end of subject key"));
    }
    let key_text = std::str::from_utf8(&payload[cursor..cursor + key_len])
        .map_err(|_| TxError::wal_corruption("subject key is not UTF-8"))?;
    let key =
        Key::parse(key_text).map_err(|_| TxError::wal_corruption("subject key does not parse"))?;
    cursor += key_len;

    let subject_len = read_u32(&mut cursor)?;
    if cursor + subject_len > payload.len() {
        return Err(TxError::wal_corruption("unexpected end of subject payload"));
    }
    let subject = payload[cursor..cursor + subject_len].to_vec();
    cursor += subject_len;

    if cursor != payload.len() {
        return Err(TxError::wal_corruption(format!(
            "trailing bytes in log record: expected {cursor} bytes, got {}",
            payload.len()
        )));
    }

    Ok(LogEntry::restore(
        sequence,
        operation,
        Record::new(key, subject),
        LogState::Prepared,
    ))
}

/// Collects the keys of every write-ahead log record under `marker`,
/// marker included, from a key-group query result.
pub(crate) fn collect_keys(records: &[Record], marker: &Key) -> Vec<Key> {
    records
        .iter()
        .filter(|record| marker.contains(&record.key))
        .map(|record| record.key.clone())
        .collect()
}
