//! # Replicant Storage
//!
//! Persistence adapters for Replicant values.
//!
//! Every Replicant is stored as one durable record keyed by
//! `(namespace, name)` holding the serialized JSON value. Stores know nothing
//! about revisions, schemas or subscribers: they load and save values.
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For tests and non-durable deployments
//! - [`FileStore`] - One file per record under a root directory
//! - [`LogStore`] - A single append-only file of keyed rows
//!
//! ## Debounced Writes
//!
//! [`Persister`] sits in front of any store and coalesces rapid saves of the
//! same key into a single write, on a background worker thread. Saves are
//! fire-and-forget: a failed write is logged and retried, and never blocks
//! the in-memory mutation that caused it.
//!
//! ## Example
//!
//! ```rust
//! use replicant_storage::{InMemoryStore, ReplicantStore};
//! use serde_json::json;
//!
//! let store = InMemoryStore::new();
//! store.save("game", "score", &json!(5)).unwrap();
//! assert_eq!(store.load("game", "score").unwrap(), Some(json!(5)));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod log;
mod memory;
mod persister;
mod store;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use log::LogStore;
pub use memory::InMemoryStore;
pub use persister::{Persister, PersisterConfig, PersisterStats};
pub use store::{validate_key, ReplicantStore};
