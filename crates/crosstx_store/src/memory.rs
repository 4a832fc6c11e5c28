//! In-memory store for testing.

use crate::adapter::{Store, TxnHandle};
use crate::error::{StoreError, StoreResult};
use crate::key::Key;
use crate::record::Record;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

/// An in-memory store.
///
/// Suitable for unit and integration tests of the transaction engine. The
/// store is thread-safe, keeps a manual clock, and can inject one-shot
/// commit faults per key-group to drive crash and recovery scenarios.
///
/// Local transactions buffer their writes and apply them atomically at
/// commit. Each key-group carries a version counter; a commit whose group
/// changed since `begin` fails with [`StoreError::Conflict`], mirroring the
/// optimistic per-group serialization of the real backing store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    committed: BTreeMap<Key, Record>,
    versions: HashMap<Key, u64>,
    txns: HashMap<u64, LocalTxn>,
    next_handle: u64,
    clock_millis: u64,
    commit_faults: HashMap<Key, u64>,
}

#[derive(Debug)]
struct LocalTxn {
    group: Key,
    snapshot_version: u64,
    writes: Vec<(Key, Option<Record>)>,
    active: bool,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the manual clock by `millis`.
    pub fn advance_clock(&self, millis: u64) {
        self.inner.lock().clock_millis += millis;
    }

    /// Arranges for the next local-transaction commit on `group` to fail.
    ///
    /// The fault fires once and is then cleared. The failed transaction is
    /// closed without applying any of its writes.
    pub fn inject_commit_fault(&self, group: &Key) {
        self.inject_commit_fault_after(group, 0);
    }

    /// Arranges for a commit on `group` to fail after `skip` commits on
    /// that group have succeeded.
    pub fn inject_commit_fault_after(&self, group: &Key, skip: u64) {
        self.inner.lock().commit_faults.insert(group.group(), skip);
    }

    /// Returns the number of committed records.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.inner.lock().committed.len()
    }
}

impl Inner {
    fn txn(&self, handle: TxnHandle) -> StoreResult<&LocalTxn> {
        let txn = self
            .txns
            .get(&handle.as_u64())
            .ok_or(StoreError::UnknownTransaction {
                handle: handle.as_u64(),
            })?;
        if !txn.active {
            return Err(StoreError::TransactionClosed {
                handle: handle.as_u64(),
            });
        }
        Ok(txn)
    }

    fn txn_mut(&mut self, handle: TxnHandle) -> StoreResult<&mut LocalTxn> {
        let txn = self
            .txns
            .get_mut(&handle.as_u64())
            .ok_or(StoreError::UnknownTransaction {
                handle: handle.as_u64(),
            })?;
        if !txn.active {
            return Err(StoreError::TransactionClosed {
                handle: handle.as_u64(),
            });
        }
        Ok(txn)
    }

    fn check_group(txn: &LocalTxn, key: &Key) -> StoreResult<()> {
        if txn.group.contains(key) {
            Ok(())
        } else {
            Err(StoreError::GroupMismatch {
                group: txn.group.encode(),
                key: key.encode(),
            })
        }
    }
}

impl Store for InMemoryStore {
    fn get(&self, key: &Key) -> StoreResult<Option<Record>> {
        Ok(self.inner.lock().committed.get(key).cloned())
    }

    fn get_in(&self, txn: TxnHandle, key: &Key) -> StoreResult<Option<Record>> {
        let inner = self.inner.lock();
        let local = inner.txn(txn)?;
        Inner::check_group(local, key)?;

        // The transaction's own buffered writes shadow committed state.
        for (written, record) in local.writes.iter().rev() {
            if written == key {
                return Ok(record.clone());
            }
        }
        Ok(inner.committed.get(key).cloned())
    }

    fn put(&self, txn: TxnHandle, record: Record) -> StoreResult<Key> {
        let mut inner = self.inner.lock();
        let local = inner.txn_mut(txn)?;
        Inner::check_group(local, &record.key)?;
        let key = record.key.clone();
        local.writes.push((key.clone(), Some(record)));
        Ok(key)
    }

    fn delete(&self, txn: TxnHandle, keys: &[Key]) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let local = inner.txn_mut(txn)?;
        for key in keys {
            Inner::check_group(local, key)?;
        }
        for key in keys {
            local.writes.push((key.clone(), None));
        }
        Ok(())
    }

    fn begin(&self, group: &Key) -> StoreResult<TxnHandle> {
        let mut inner = self.inner.lock();
        let group = group.group();
        let snapshot_version = inner.versions.get(&group).copied().unwrap_or(0);
        let handle = inner.next_handle;
        inner.next_handle += 1;
        inner.txns.insert(
            handle,
            LocalTxn {
                group,
                snapshot_version,
                writes: Vec::new(),
                active: true,
            },
        );
        Ok(TxnHandle::new(handle))
    }

    fn commit(&self, txn: TxnHandle) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let local = inner.txn_mut(txn)?;
        local.active = false;
        let group = local.group.clone();
        let snapshot_version = local.snapshot_version;
        let writes = std::mem::take(&mut local.writes);

        match inner.commit_faults.get_mut(&group) {
            Some(0) => {
                inner.commit_faults.remove(&group);
                return Err(StoreError::fault(format!(
                    "injected commit fault on key-group [{group}]"
                )));
            }
            Some(skip) => *skip -= 1,
            None => {}
        }

        let version = inner.versions.get(&group).copied().unwrap_or(0);
        if version != snapshot_version {
            return Err(StoreError::Conflict {
                group: group.encode(),
            });
        }

        if writes.is_empty() {
            return Ok(());
        }
        for (key, write) in writes {
            match write {
                Some(record) => {
                    inner.committed.insert(key, record);
                }
                None => {
                    inner.committed.remove(&key);
                }
            }
        }
        inner.versions.insert(group, version + 1);
        Ok(())
    }

    fn rollback(&self, txn: TxnHandle) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let local = inner.txn_mut(txn)?;
        local.active = false;
        local.writes.clear();
        Ok(())
    }

    fn is_active(&self, txn: TxnHandle) -> bool {
        self.inner
            .lock()
            .txns
            .get(&txn.as_u64())
            .is_some_and(|t| t.active)
    }

    fn query(&self, group: &Key) -> StoreResult<Vec<Record>> {
        let inner = self.inner.lock();
        let group = group.group();
        Ok(inner
            .committed
            .iter()
            .filter(|(key, _)| group.contains(key))
            .map(|(_, record)| record.clone())
            .collect())
    }

    fn now_millis(&self) -> u64 {
        self.inner.lock().clock_millis
    }
}
