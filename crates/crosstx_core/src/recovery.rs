//! Reader-driven recovery.
//!
//! Every read passes through [`resolve`] before touching its target key.
//! If the key-group holds a lock left by another transaction, the resolver
//! decides the owner's fate from durable state alone: roll the transaction
//! forward if its write-ahead log survives, clear the orphaned lock if the
//! owner died before logging, or tell the caller to retry if the owner may
//! still be running. No background process exists; an abandoned transaction
//! is repaired by whichever reader trips over it first.

use crate::error::{IndoubtError, TxError, TxResult};
use crate::lock::{Lock, LOCK_KIND};
use crate::transaction::GlobalTransaction;
use crate::types::{LogState, Operation};
use crate::wal;
use crosstx_store::{Key, Record, Store, StoreError};
use tracing::{debug, error, info};

/// Resolves any in-flight transaction holding the key-group of `key`.
///
/// Returns `Ok(())` once the group holds no recoverable intent: either no
/// lock was present, an orphaned lock was cleared, or the owning
/// transaction was rolled forward to completion.
///
/// # Errors
///
/// - [`TxError::ConcurrentModification`] if the owner may legitimately
///   still be finishing (its lock is younger than the operation deadline).
/// - [`TxError::Indoubt`] if roll-forward failed partway; the report
///   carries the transaction id, its full log, and the replayed count.
pub(crate) fn resolve<S: Store>(store: &S, key: &Key) -> TxResult<()> {
    let group = key.group();
    let records = store.query(&group)?;
    let Some(lock_record) = find_lock(&records) else {
        return Ok(());
    };
    let lock = Lock::from_record(lock_record)?;

    let marker = lock.anchor().clone();
    if store.get(&marker)?.is_none() {
        // The owner finished and cleaned up, or died before writing its
        // log. The lock's age against the operation deadline decides which.
        let age = store.now_millis().saturating_sub(lock.timestamp_millis());
        if age <= store.operation_deadline_millis() {
            return Err(TxError::concurrent_modification(key.encode()));
        }
        return clear_orphaned_lock(store, &group, &lock_record.key);
    }

    let anchor_records = store.query(&marker.group())?;
    let transaction = wal::decode(&marker, &anchor_records)?;
    roll_forward(store, &transaction, &marker, &anchor_records)
}

/// Finds a lock record directly under the key-group root.
pub(crate) fn find_lock(records: &[Record]) -> Option<&Record> {
    records
        .iter()
        .find(|record| record.kind() == LOCK_KIND && record.key.depth() == 2)
}

/// Deletes a lock whose owner is presumed dead before prepare completed.
///
/// Idempotent: if a concurrent reader already removed the lock, this is a
/// silent no-op.
fn clear_orphaned_lock<S: Store>(store: &S, group: &Key, lock_key: &Key) -> TxResult<()> {
    let local = store.begin(group)?;
    if store.get_in(local, lock_key)?.is_none() {
        info!(lock = %lock_key, "orphaned lock already cleared by another reader");
        store.rollback(local)?;
        return Ok(());
    }
    store.delete(local, std::slice::from_ref(lock_key))?;
    store.commit(local)?;
    info!(lock = %lock_key, "cleared orphaned lock past the operation deadline");
    Ok(())
}

/// Re-applies every logged operation and releases its lock, anchor last.
///
/// The anchor entry must come last: applying it also deletes the
/// write-ahead log, and no operation can be replayed once the log is gone.
fn roll_forward<S: Store>(
    store: &S,
    transaction: &GlobalTransaction,
    marker: &Key,
    anchor_records: &[Record],
) -> TxResult<()> {
    let anchor_group = marker.group();
    let mut committed = 0;

    for entry in transaction.log().iter().filter(|e| e.group() != anchor_group) {
        let lock_key = Lock::record_key(&entry.group(), transaction.id())?;
        apply_operation(store, entry.operation(), entry.subject(), &lock_key, Vec::new())
            .map_err(|source| indoubt(transaction, committed, source))?;
        committed += 1;
    }

    if let Some(anchor_entry) = transaction
        .log()
        .iter()
        .find(|e| e.group() == anchor_group)
    {
        let lock_key = Lock::record_key(&anchor_group, transaction.id())?;
        let wal_keys = wal::collect_keys(anchor_records, marker);
        apply_operation(
            store,
            anchor_entry.operation(),
            anchor_entry.subject(),
            &lock_key,
            wal_keys,
        )
        .map_err(|source| indoubt(transaction, committed, source))?;
        committed += 1;
    }

    debug!(
        id = %transaction.id(),
        committed,
        "rolled forward an abandoned transaction"
    );
    Ok(())
}

/// Applies one logged operation inside a fresh local transaction on its
/// key-group, deleting the operation's lock and any `extra_deletes`.
///
/// Shared by roll-forward and by the resource manager's commit phase. If
/// the lock is already gone, another actor completed the operation; the
/// application is skipped as already done.
pub(crate) fn apply_operation<S: Store>(
    store: &S,
    operation: Operation,
    subject: &Record,
    lock_key: &Key,
    mut extra_deletes: Vec<Key>,
) -> Result<(), StoreError> {
    let local = store.begin(&subject.key.group())?;

    if store.get_in(local, lock_key)?.is_none() {
        info!(lock = %lock_key, "operation already applied by another transaction");
        store.rollback(local)?;
        return Ok(());
    }

    let mut deletes = vec![lock_key.clone()];
    deletes.append(&mut extra_deletes);

    if operation == Operation::Delete {
        deletes.push(subject.key.clone());
    } else {
        store.put(local, subject.clone())?;
    }

    store.delete(local, &deletes)?;
    store.commit(local)
}

fn indoubt(transaction: &GlobalTransaction, committed: usize, source: StoreError) -> TxError {
    error!(
        id = %transaction.id(),
        committed,
        %source,
        "failed to apply transaction log; storage needs manual recovery"
    );
    let mut log = transaction.log().to_vec();
    for entry in log.iter_mut().take(committed) {
        // Best effort annotation for the operator dump.
        let _ = entry.advance(LogState::Committed);
    }
    IndoubtError {
        id: transaction.id(),
        log,
        committed,
        source,
    }
    .into_error()
}
