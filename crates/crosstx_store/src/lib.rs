//! # crosstx store
//!
//! Backing store contract for the crosstx transaction engine.
//!
//! This crate provides:
//! - [`Key`] - hierarchical keys whose root component identifies a key-group
//! - [`Record`] - an opaque key + payload pair
//! - [`Store`] - the adapter trait the engine drives (point reads/writes,
//!   per-key-group local transactions, group queries, a clock)
//! - [`InMemoryStore`] - a thread-safe in-memory implementation with a
//!   manual clock and fault injection for tests
//!
//! The store is an **opaque record store**. It never interprets payloads;
//! the transaction engine owns all record formats.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod error;
mod key;
mod memory;
mod record;

pub use adapter::{Store, TxnHandle, DEFAULT_OPERATION_DEADLINE_MILLIS};
pub use error::{StoreError, StoreResult};
pub use key::Key;
pub use memory::InMemoryStore;
pub use record::Record;
