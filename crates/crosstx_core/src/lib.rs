//! # crosstx core
//!
//! Transaction-coordination and crash-recovery engine for key-value stores
//! whose native atomicity is limited to a single key-group.
//!
//! This crate provides:
//! - Global transactions spanning multiple, unrelated key-groups
//! - A commit protocol with a single-phase fast path and a two-phase path
//! - A durable write-ahead log persisted under one anchor key-group
//! - Per-key-group locks for mutual exclusion
//! - Lazy, reader-driven recovery ("consistent read") that rolls abandoned
//!   transactions forward or clears them, with no background process
//!
//! ## Usage
//!
//! ```
//! use crosstx_core::Session;
//! use crosstx_store::{InMemoryStore, Key, Record};
//! use std::sync::Arc;
//!
//! let session = Session::new(Arc::new(InMemoryStore::new()));
//!
//! let alice = Key::root("account", "alice").unwrap();
//! let bob = Key::root("account", "bob").unwrap();
//!
//! let mut txn = session.begin();
//! txn.put(Record::new(alice.clone(), vec![100])).unwrap();
//! txn.put(Record::new(bob.clone(), vec![50])).unwrap();
//! txn.commit().unwrap();
//!
//! assert_eq!(session.get(&alice).unwrap().unwrap().payload, vec![100]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod coordinator;
mod error;
mod lock;
mod log;
mod manager;
mod recovery;
mod session;
mod transaction;
mod types;
mod wal;

pub use coordinator::Coordinator;
pub use error::{IndoubtError, TxError, TxResult};
pub use lock::{Lock, LOCK_KIND};
pub use log::LogEntry;
pub use session::Session;
pub use transaction::GlobalTransaction;
pub use types::{LogState, Operation, TransactionId};
pub use wal::{LOG_KIND, TRANSACTION_KIND};
