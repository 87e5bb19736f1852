//! # Replicant Server
//!
//! The authoritative side of Replicant synchronization.
//!
//! This crate provides:
//! - [`Replicant`], one named value with its revision, schema, listeners and
//!   `uninitialized -> loading -> ready` lifecycle
//! - [`Replicator`], the registry of every Replicant in the process; it
//!   applies client mutations, persists them and broadcasts the resulting
//!   operations
//! - [`LocalBridge`], an in-process transport delivering messages between
//!   connections and a [`Replicator`]
//!
//! # Architecture
//!
//! The [`Replicator`] is an explicit object created once at startup and
//! shared by reference. It depends on three injected collaborators:
//! - a [`ReplicantStore`](replicant_storage::ReplicantStore) behind a
//!   debounced [`Persister`](replicant_storage::Persister)
//! - a [`SchemaResolver`](replicant_schema::SchemaResolver)
//! - an [`Outbound`] sink delivering server messages to connections
//!
//! Mutations to one Replicant are serialized by that Replicant's lock;
//! different Replicants proceed independently.
//!
//! # Conflict policy
//!
//! The server revision is authoritative. A mutation based on an outdated
//! revision is rejected with `staleRevision` and the client must re-declare.
//! Every accepted change is broadcast to all subscribers, including the one
//! that made it.
//!
//! ```rust
//! use replicant_protocol::{ClientMessage, ServerMessage};
//! use replicant_schema::NoSchemas;
//! use replicant_server::{LocalBridge, ServerConfig};
//! use replicant_storage::InMemoryStore;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let bridge = LocalBridge::start(
//!     ServerConfig::default(),
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(NoSchemas),
//! );
//! let conn = bridge.connect();
//!
//! conn.send(ClientMessage::Declare {
//!     namespace: "game".into(),
//!     name: "score".into(),
//!     default_value: Some(json!(0)),
//!     schema_path: None,
//!     persistent: Some(false),
//! }).unwrap();
//! conn.send(ClientMessage::Assign {
//!     namespace: "game".into(),
//!     name: "score".into(),
//!     value: Some(json!(5)),
//!     revision: 0,
//!     request_id: None,
//! }).unwrap();
//!
//! let messages = conn.drain();
//! assert!(matches!(
//!     &messages[1],
//!     ServerMessage::Change { revision: 1, value: Some(v), .. } if *v == json!(5)
//! ));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod bridge;
mod config;
mod error;
mod handle;
mod replicant;
mod replicator;

pub use bridge::{LocalBridge, LocalConnection, Outboxes, Outbound};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handle::ClientHandle;
pub use replicant::{
    ChangeEvent, ChangeObserver, LoadState, Mutation, MutationOutcome, ObserverId, QueuedMutation,
    Replicant, Snapshot,
};
pub use replicator::{DeclareOptions, Replicator};
