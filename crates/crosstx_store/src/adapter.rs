//! Store trait definition.

use crate::error::StoreResult;
use crate::key::Key;
use crate::record::Record;
use std::fmt;

/// Default deadline for a single store operation, in milliseconds.
///
/// Recovery uses this as the sole liveness bound: a lock older than the
/// deadline whose transaction never reached its write-ahead log is presumed
/// abandoned. It is a process-wide constant, not caller-configurable.
pub const DEFAULT_OPERATION_DEADLINE_MILLIS: u64 = 60_000;

/// Handle to a local transaction scoped to one key-group.
///
/// Handles are opaque tickets issued by [`Store::begin`] and consumed by
/// `commit`/`rollback`. They carry no guard state; the store tracks the
/// transaction's buffered writes and liveness internally.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxnHandle(pub(crate) u64);

impl TxnHandle {
    /// Creates a handle from a raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw handle value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for TxnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxnHandle({})", self.0)
    }
}

/// A key-group-scoped backing store.
///
/// Stores are **opaque record stores** with one atomicity primitive: a local
/// transaction covering a single key-group (a root key and its descendants).
/// The transaction engine composes these into cross-group transactions; the
/// store knows nothing about locks, write-ahead logs, or recovery.
///
/// # Invariants
///
/// - A local transaction begun on group `g` only accepts reads and writes
///   of keys within `g`; anything else fails with `GroupMismatch`.
/// - `commit` applies all writes buffered in the transaction atomically, or
///   none of them. If the group was modified by another committer since
///   `begin`, commit fails with `Conflict` and applies nothing.
/// - `query` returns every record in the key-group, ordered by encoded key.
/// - Implementations must be `Send + Sync`; callers on different threads
///   drive independent local transactions concurrently.
pub trait Store: Send + Sync {
    /// Reads the record at `key` from committed state.
    fn get(&self, key: &Key) -> StoreResult<Option<Record>>;

    /// Reads the record at `key` within a local transaction.
    ///
    /// Sees the transaction's own buffered writes before committed state.
    fn get_in(&self, txn: TxnHandle, key: &Key) -> StoreResult<Option<Record>>;

    /// Buffers a write of `record` in a local transaction.
    ///
    /// Returns the record's key. The write becomes visible at `commit`.
    fn put(&self, txn: TxnHandle, record: Record) -> StoreResult<Key>;

    /// Buffers writes of `records` in a local transaction.
    ///
    /// Returns the records' keys in order.
    fn put_many(&self, txn: TxnHandle, records: Vec<Record>) -> StoreResult<Vec<Key>> {
        let mut keys = Vec::with_capacity(records.len());
        for record in records {
            keys.push(self.put(txn, record)?);
        }
        Ok(keys)
    }

    /// Buffers deletions of `keys` in a local transaction.
    ///
    /// Deleting an absent key is a no-op at commit time.
    fn delete(&self, txn: TxnHandle, keys: &[Key]) -> StoreResult<()>;

    /// Begins a local transaction scoped to the key-group of `group`.
    fn begin(&self, group: &Key) -> StoreResult<TxnHandle>;

    /// Commits a local transaction, applying its buffered writes atomically.
    fn commit(&self, txn: TxnHandle) -> StoreResult<()>;

    /// Rolls back a local transaction, discarding its buffered writes.
    fn rollback(&self, txn: TxnHandle) -> StoreResult<()>;

    /// Returns `true` if the local transaction is still open.
    fn is_active(&self, txn: TxnHandle) -> bool;

    /// Returns every committed record in the key-group of `group`, ordered
    /// by encoded key.
    fn query(&self, group: &Key) -> StoreResult<Vec<Record>>;

    /// Returns the current time in milliseconds.
    fn now_millis(&self) -> u64;

    /// Returns the fixed operation deadline in milliseconds.
    fn operation_deadline_millis(&self) -> u64 {
        DEFAULT_OPERATION_DEADLINE_MILLIS
    }
}
