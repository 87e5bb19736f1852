//! # Replicant Protocol
//!
//! Wire types and value patching for Replicant synchronization.
//!
//! This crate provides:
//! - [`ReplicantKey`] addressing a Replicant by namespace and name
//! - [`Operation`] describing a single change to a JSON value
//! - [`diff`] and [`apply_operations`] converting between values and
//!   operation lists
//! - [`ClientMessage`] / [`ServerMessage`], the JSON messages exchanged over
//!   a transport
//!
//! A Replicant's value is an `Option<serde_json::Value>`: `None` is an
//! undefined value, distinct from JSON `null`. On the wire an undefined value
//! is an absent field.
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Example
//!
//! ```rust
//! use replicant_protocol::{apply_operations, diff};
//! use serde_json::json;
//!
//! let old = Some(json!({ "home": 1, "away": 0 }));
//! let new = Some(json!({ "home": 2, "away": 0 }));
//!
//! let ops = diff(old.as_ref(), new.as_ref());
//! let mut replayed = old.clone();
//! apply_operations(&mut replayed, &ops).unwrap();
//! assert_eq!(replayed, new);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod diff;
mod error;
mod key;
mod messages;
mod operation;
mod value;

pub use diff::diff;
pub use error::{PatchError, ProtocolError, ProtocolResult};
pub use key::ReplicantKey;
pub use messages::{ClientMessage, ErrorKind, ServerMessage};
pub use operation::{apply_operations, pointer, Operation, PathSegment};
