//! Commit-protocol coordinator.

use crate::error::{TxError, TxResult};
use crate::log::LogEntry;
use crate::manager::ResourceManager;
use crate::transaction::GlobalTransaction;
use crate::types::{LogState, Operation, TransactionId};
use crate::wal;
use crosstx_store::{Key, Record, Store};
use std::collections::HashMap;
use std::sync::Arc;

/// Drives one global transaction across its key-groups.
///
/// The coordinator owns the transaction's log and one
/// resource manager per touched key-group. Reads and writes append log
/// entries; `commit` analyzes the log and picks a protocol:
///
/// - **No mutating entry**: commit is a no-op.
/// - **One mutated key-group** (single-phase fast path): the operation is
///   applied inside that group's local transaction. No lock or write-ahead
///   log is created; the backing store can already commit one group
///   atomically.
/// - **Several mutated key-groups** (two-phase): the full log is persisted
///   as a write-ahead log under the anchor group (the group of the last
///   mutating entry), every group is locked (prepare), then every group is
///   applied and unlocked (commit). A prepare failure aborts the commit
///   with no real write performed. A commit-phase failure is logged, never
///   raised: the groups left locked are repaired by the next reader.
pub struct Coordinator<S: Store> {
    store: Arc<S>,
    transaction: GlobalTransaction,
    managers: HashMap<Key, ResourceManager<S>>,
    completed: bool,
}

impl<S: Store> Coordinator<S> {
    pub(crate) fn new(store: Arc<S>) -> Self {
        Self {
            store,
            transaction: GlobalTransaction::new(),
            managers: HashMap::new(),
            completed: false,
        }
    }

    /// Returns the transaction id.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.transaction.id()
    }

    /// Returns the transaction's ordered log.
    #[must_use]
    pub fn log(&self) -> &[LogEntry] {
        self.transaction.log()
    }

    /// Reads the record at `key` within this transaction.
    ///
    /// The read is consistent: recovery runs first, and the read fails
    /// with a retryable error if the key-group is locked by another
    /// in-flight transaction.
    pub fn get(&mut self, key: &Key) -> TxResult<Option<Record>> {
        self.ensure_open()?;
        reject_system_key(key)?;

        let found = self.manager_for(key).get(key)?;
        let subject = found
            .clone()
            .unwrap_or_else(|| Record::marker(key.clone()));
        self.transaction.append(Operation::Read, subject);
        tracing::debug!(id = %self.id(), %key, "record read");
        Ok(found)
    }

    /// Stages the creation of `record`; its key must be vacant.
    pub fn put(&mut self, record: Record) -> TxResult<()> {
        self.ensure_open()?;
        reject_system_key(&record.key)?;

        self.manager_for(&record.key).create(record.clone())?;
        let key = record.key.clone();
        self.transaction.append(Operation::Create, record);
        tracing::debug!(id = %self.id(), %key, "record staged for creation");
        Ok(())
    }

    /// Stages an update of `record`; its key-group must have been read
    /// within this transaction first.
    pub fn update(&mut self, record: Record) -> TxResult<()> {
        self.ensure_open()?;
        reject_system_key(&record.key)?;

        let Some(manager) = self.managers.get_mut(&record.key.group()) else {
            return Err(TxError::illegal_sequence(None, Operation::Update));
        };
        manager.update(record.clone())?;
        let key = record.key.clone();
        self.transaction.append(Operation::Update, record);
        tracing::debug!(id = %self.id(), %key, "record staged for update");
        Ok(())
    }

    /// Stages the deletion of `record`; its key-group must have been read
    /// within this transaction first.
    pub fn delete(&mut self, record: Record) -> TxResult<()> {
        self.ensure_open()?;
        reject_system_key(&record.key)?;

        let Some(manager) = self.managers.get_mut(&record.key.group()) else {
            return Err(TxError::illegal_sequence(None, Operation::Delete));
        };
        manager.delete(record.clone())?;
        let key = record.key.clone();
        self.transaction.append(Operation::Delete, record);
        tracing::debug!(id = %self.id(), %key, "record staged for deletion");
        Ok(())
    }

    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// Single-phase application errors and two-phase *prepare* errors are
    /// returned to the caller; no real write has happened and the
    /// transaction may still be rolled back. Two-phase *commit* errors are
    /// not returned: the remaining key-groups stay locked with the
    /// write-ahead log durable, and the next read of any of them completes
    /// the transaction.
    pub fn commit(&mut self) -> TxResult<()> {
        self.ensure_open()?;

        let groups = self.transaction.mutated_groups();
        match groups.len() {
            0 => {
                tracing::debug!(id = %self.id(), "read-only transaction committed");
            }
            1 => self.commit_single_phase(&groups[0])?,
            _ => self.commit_two_phase()?,
        }

        self.release_inactive_managers();
        self.completed = true;
        Ok(())
    }

    fn commit_single_phase(&mut self, group: &Key) -> TxResult<()> {
        tracing::debug!(id = %self.id(), %group, "completion started (single-phase commitment)");
        let manager = self
            .managers
            .get_mut(group)
            .ok_or_else(|| TxError::invalid_operation("no manager for mutated key-group"))?;
        manager.commit_single_phase()?;

        if let Some(index) = self.transaction.anchor_index() {
            self.transaction
                .entry_mut(index)
                .advance(LogState::Committed)?;
        }
        tracing::debug!(id = %self.id(), "transaction committed");
        Ok(())
    }

    fn commit_two_phase(&mut self) -> TxResult<()> {
        tracing::debug!(id = %self.id(), "completion started (two-phase commitment protocol)");

        let id = self.id();
        let mutating = self.transaction.mutating_indices();
        let anchor_index = self
            .transaction
            .anchor_index()
            .ok_or_else(|| TxError::invalid_operation("no mutating entry to commit"))?;
        let anchor_group = self.transaction.log()[anchor_index].group();
        let marker = wal::marker_key(&anchor_group, id)?;

        // Phase 1: preparation. The write-ahead log rides in the anchor
        // group's local transaction, so the log and the anchor's lock
        // become durable together.
        for &index in &mutating {
            let group = self.transaction.log()[index].group();
            if index == anchor_index {
                let records = wal::encode(&self.transaction, &anchor_group)?;
                let manager = self
                    .managers
                    .get_mut(&group)
                    .ok_or_else(|| TxError::invalid_operation("no manager for mutated key-group"))?;
                manager.persist_log(records)?;
            }
            let manager = self
                .managers
                .get_mut(&group)
                .ok_or_else(|| TxError::invalid_operation("no manager for mutated key-group"))?;
            manager.prepare(id, &marker)?;
            self.transaction
                .entry_mut(index)
                .advance(LogState::Prepared)?;
        }
        tracing::debug!(id = %id, "transaction prepared");

        // Phase 2: commitment. Failures degrade, never propagate; the
        // next consistent read of a still-locked group finishes the job.
        for &index in &mutating {
            let group = self.transaction.log()[index].group();
            let manager = self
                .managers
                .get_mut(&group)
                .ok_or_else(|| TxError::invalid_operation("no manager for mutated key-group"))?;
            if let Err(error) = manager.commit() {
                tracing::warn!(
                    id = %id,
                    %group,
                    %error,
                    "commitment failed; consistency will be ensured in read"
                );
                return Ok(());
            }
            self.transaction
                .entry_mut(index)
                .advance(LogState::Committed)?;
        }

        tracing::debug!(id = %id, "transaction committed");
        Ok(())
    }

    /// Rolls back the transaction: every key-group whose local transaction
    /// is still active is rolled back. Locks already written stay behind
    /// as orphans and are cleaned up by future recovery.
    pub fn rollback(&mut self) {
        for manager in self.managers.values() {
            let Some(local) = manager.local() else {
                continue;
            };
            if self.store.is_active(local) {
                if let Err(error) = self.store.rollback(local) {
                    tracing::warn!(
                        id = %self.id(),
                        group = %manager.group(),
                        %error,
                        "rollback failed; consistency will be ensured in read"
                    );
                }
            }
        }
        self.completed = true;
    }

    /// Rolls back local transactions that never took part in commitment
    /// (read-only key-groups), releasing their store-side state.
    fn release_inactive_managers(&self) {
        for manager in self.managers.values() {
            let Some(local) = manager.local() else {
                continue;
            };
            if self.store.is_active(local) {
                let _ = self.store.rollback(local);
            }
        }
    }

    fn manager_for(&mut self, key: &Key) -> &mut ResourceManager<S> {
        self.managers
            .entry(key.group())
            .or_insert_with_key(|group| ResourceManager::new(Arc::clone(&self.store), group))
    }

    fn ensure_open(&self) -> TxResult<()> {
        if self.completed {
            Err(TxError::invalid_operation(
                "transaction already committed or rolled back",
            ))
        } else {
            Ok(())
        }
    }
}

fn reject_system_key(key: &Key) -> TxResult<()> {
    if key.is_system() {
        Err(TxError::invalid_argument(format!(
            "key [{key}] uses a reserved system kind"
        )))
    } else {
        Ok(())
    }
}
