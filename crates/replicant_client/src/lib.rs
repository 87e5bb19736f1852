//! # Replicant Client
//!
//! Client-side proxies for Replicants.
//!
//! This crate provides:
//! - Proxies mirroring server-held values
//! - Optimistic local mutation with acknowledgement tracking
//! - Revision-ordered application of remote changes
//! - Deferral of mutations until a snapshot is available
//! - Reconnect with exponential backoff
//! - Transport abstraction
//!
//! ## Architecture
//!
//! The server is authoritative. A proxy applies its own mutations at once and
//! sends them tagged with the revision they were based on. The server either
//! accepts a mutation, broadcasting a change that carries the proxy's request
//! id back to it, or rejects it. A rejection rolls the proxy back to what the
//! server last confirmed; a stale-revision rejection also fetches a fresh
//! snapshot.
//!
//! ## Key Invariants
//!
//! - A proxy never applies a change at or below its confirmed revision
//! - Once no mutation is outstanding, the visible value equals the server's
//! - Mutations made before the first snapshot, or while disconnected, are
//!   replayed against the next snapshot
//! - Listeners are called without any proxy lock held

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod error;
mod pending;
mod proxy;
mod transport;

pub use client::ReplicantClient;
pub use config::{ClientConfig, RetryConfig};
pub use error::{ClientError, ClientResult};
pub use pending::{PendingState, PendingStats, PendingTracker};
pub use proxy::{ChangeListener, ChangeSource, ListenerId, ProxyChange, ProxyOptions, ProxyStatus, ReplicantProxy};
pub use transport::{ClientTransport, MockTransport};
