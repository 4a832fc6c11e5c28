//! Entry point for applications.

use crate::coordinator::Coordinator;
use crate::error::{TxError, TxResult};
use crate::recovery;
use crosstx_store::{Key, Record, Store};
use std::sync::Arc;

/// A handle to the transaction engine over one backing store.
///
/// Sessions are cheap to clone and share. Each [`Session::begin`] call
/// yields an independent [`Coordinator`] owning one global transaction;
/// [`Session::get`] serves consistent reads outside any transaction.
pub struct Session<S: Store> {
    store: Arc<S>,
}

impl<S: Store> Session<S> {
    /// Creates a session over `store`.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Starts a new global transaction.
    #[must_use]
    pub fn begin(&self) -> Coordinator<S> {
        Coordinator::new(Arc::clone(&self.store))
    }

    /// Reads the record at `key` consistently, outside any transaction.
    ///
    /// Recovery runs first, so an abandoned transaction holding the
    /// key-group is completed (or cleared) before the value is returned.
    ///
    /// # Errors
    ///
    /// Fails with a retryable [`TxError::ConcurrentModification`] if the
    /// key-group is held by a transaction that may still be running.
    pub fn get(&self, key: &Key) -> TxResult<Option<Record>> {
        if key.is_system() {
            return Err(TxError::invalid_argument(format!(
                "key [{key}] uses a reserved system kind"
            )));
        }

        recovery::resolve(self.store.as_ref(), key)?;

        // A fresh writer may have locked the group while recovery ran.
        let records = self.store.query(&key.group())?;
        if recovery::find_lock(&records).is_some() {
            return Err(TxError::concurrent_modification(key.encode()));
        }

        Ok(self.store.get(key)?)
    }

    /// Returns the backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

impl<S: Store> Clone for Session<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}
