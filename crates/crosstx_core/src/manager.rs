//! Per-key-group resource managers.

use crate::error::{TxError, TxResult};
use crate::lock::Lock;
use crate::recovery;
use crate::types::{Operation, TransactionId};
use crate::wal;
use crosstx_store::{Key, Record, Store, TxnHandle};
use std::sync::Arc;

/// Owns one key-group's participation in one global transaction.
///
/// A manager is created on first access to its key-group and holds the
/// group's local backing-store transaction, the single operation it is
/// responsible for, and (after prepare) the lock it wrote. The staged
/// operation follows a strict state machine:
///
/// ```text
/// NONE -> (READ | CREATE) -> [UPDATE | DELETE require a prior READ]
/// ```
///
/// Any call violating the required predecessor fails with
/// [`TxError::IllegalSequence`] and stages nothing.
///
/// The local transaction begins lazily, after any recovery on the group has
/// run, so its snapshot already reflects a repaired group.
pub(crate) struct ResourceManager<S: Store> {
    store: Arc<S>,
    local: Option<TxnHandle>,
    group: Key,
    staged: Option<(Operation, Record)>,
    lock: Option<Lock>,
}

impl<S: Store> ResourceManager<S> {
    /// Creates a manager for the key-group of `group`.
    pub(crate) fn new(store: Arc<S>, group: &Key) -> Self {
        Self {
            store,
            local: None,
            group: group.group(),
            staged: None,
            lock: None,
        }
    }

    /// Returns the key-group this manager owns.
    pub(crate) fn group(&self) -> &Key {
        &self.group
    }

    /// Returns the staged operation, if any.
    pub(crate) fn staged_operation(&self) -> Option<Operation> {
        self.staged.as_ref().map(|(op, _)| *op)
    }

    /// Returns the local transaction handle, if one was begun.
    pub(crate) fn local(&self) -> Option<TxnHandle> {
        self.local
    }

    fn local_txn(&mut self) -> TxResult<TxnHandle> {
        if let Some(local) = self.local {
            return Ok(local);
        }
        let local = self.store.begin(&self.group)?;
        self.local = Some(local);
        Ok(local)
    }

    /// Reads `key` consistently: recovery first, then the read, refusing to
    /// observe a key-group that is locked again by a fresh writer.
    pub(crate) fn get(&mut self, key: &Key) -> TxResult<Option<Record>> {
        if let Some(op) = self.staged_operation() {
            if op != Operation::Read {
                return Err(TxError::illegal_sequence(Some(op), Operation::Read));
            }
        }

        recovery::resolve(self.store.as_ref(), key)?;

        // A fresh writer may have locked the group while recovery ran.
        let records = self.store.query(&self.group)?;
        if recovery::find_lock(&records).is_some() {
            return Err(TxError::concurrent_modification(key.encode()));
        }

        let local = self.local_txn()?;
        let found = self.store.get_in(local, key)?;
        let subject = found
            .clone()
            .unwrap_or_else(|| Record::marker(key.clone()));
        self.staged = Some((Operation::Read, subject));
        Ok(found)
    }

    /// Stages the creation of `record`; the key must be vacant and this
    /// must be the manager's first operation.
    pub(crate) fn create(&mut self, record: Record) -> TxResult<()> {
        if let Some(op) = self.staged_operation() {
            return Err(TxError::illegal_sequence(Some(op), Operation::Create));
        }
        if self.store.get(&record.key)?.is_some() {
            return Err(TxError::RecordExists {
                key: record.key.encode(),
            });
        }
        self.staged = Some((Operation::Create, record));
        Ok(())
    }

    /// Stages an update of `record`; requires a prior read on this
    /// key-group within the transaction.
    pub(crate) fn update(&mut self, record: Record) -> TxResult<()> {
        self.require_read(Operation::Update)?;
        self.staged = Some((Operation::Update, record));
        Ok(())
    }

    /// Stages the deletion of `record`; requires a prior read on this
    /// key-group within the transaction.
    pub(crate) fn delete(&mut self, record: Record) -> TxResult<()> {
        self.require_read(Operation::Delete)?;
        self.staged = Some((Operation::Delete, record));
        Ok(())
    }

    fn require_read(&self, to: Operation) -> TxResult<()> {
        match self.staged_operation() {
            Some(Operation::Read) => Ok(()),
            from => Err(TxError::illegal_sequence(from, to)),
        }
    }

    /// Applies the staged operation directly inside the manager's local
    /// transaction and commits it (the single-phase fast path; no lock or
    /// write-ahead log is created).
    pub(crate) fn commit_single_phase(&mut self) -> TxResult<()> {
        let Some((operation, subject)) = self.staged.clone() else {
            return Err(TxError::invalid_operation("no operation staged"));
        };

        let local = self.local_txn()?;
        if operation == Operation::Delete {
            self.store
                .delete(local, std::slice::from_ref(&subject.key))?;
        } else {
            self.store.put(local, subject)?;
        }
        self.store.commit(local)?;
        Ok(())
    }

    /// Stages write-ahead log `records` into the local transaction, ahead
    /// of this group's prepare.
    pub(crate) fn persist_log(&mut self, records: Vec<Record>) -> TxResult<()> {
        let local = self.local_txn()?;
        self.store.put_many(local, records)?;
        Ok(())
    }

    /// Prepares this key-group: writes a lock referencing the transaction's
    /// write-ahead log marker and commits the local transaction.
    ///
    /// A lock held by another transaction is resolved in place first, so an
    /// abandoned owner does not wedge the group until a reader happens by;
    /// a live owner surfaces as retryable contention.
    pub(crate) fn prepare(&mut self, id: TransactionId, marker: &Key) -> TxResult<()> {
        let records = self.store.query(&self.group)?;
        if let Some(record) = recovery::find_lock(&records) {
            if Lock::from_record(record)?.id() != id {
                recovery::resolve(self.store.as_ref(), &self.group)?;
            }
        }

        let local = self.local_txn()?;
        let lock = Lock::new(id, marker.clone(), self.store.now_millis());
        self.store.put(local, lock.to_record(&self.group)?)?;
        self.store.commit(local)?;
        self.lock = Some(lock);
        Ok(())
    }

    /// Commits this key-group's prepared operation in a fresh local
    /// transaction: verifies the lock still exists (no-op if another actor
    /// already completed it), applies the put or delete, deletes the lock,
    /// and, when this group anchors the write-ahead log, deletes the log
    /// records too.
    pub(crate) fn commit(&mut self) -> TxResult<()> {
        let lock = self
            .lock
            .as_ref()
            .ok_or_else(|| TxError::invalid_operation("key-group is not prepared"))?;
        let (operation, subject) = self
            .staged
            .as_ref()
            .ok_or_else(|| TxError::invalid_operation("no operation staged"))?;

        let lock_key = Lock::record_key(&self.group, lock.id())?;
        let marker = lock.anchor();

        let wal_keys = if marker.group() == self.group {
            wal::collect_keys(&self.store.query(&self.group)?, marker)
        } else {
            Vec::new()
        };

        recovery::apply_operation(self.store.as_ref(), *operation, subject, &lock_key, wal_keys)?;
        Ok(())
    }
}
