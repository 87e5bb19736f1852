//! Transport Bridge: delivering messages between connections and the server.
//!
//! [`Outbound`] is the only thing the [`Replicator`] knows about transports.
//! [`LocalBridge`] is an in-process implementation: each
//! [`LocalConnection`] owns an unbounded queue of server messages and hands
//! its client messages straight to the replicator, one at a time.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handle::ClientHandle;
use crate::replicator::Replicator;
use parking_lot::{Mutex, RwLock};
use replicant_protocol::{ClientMessage, ServerMessage};
use replicant_schema::SchemaResolver;
use replicant_storage::ReplicantStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Delivers server messages to connections.
///
/// Implementations must preserve the order of messages sent to one handle
/// and must not call back into the [`Replicator`].
pub trait Outbound: Send + Sync {
    /// Queues a message for a connection.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Transport`] if the connection is gone. The
    /// replicator then treats the connection as disconnected.
    fn send(&self, handle: ClientHandle, message: ServerMessage) -> ServerResult<()>;
}

/// Per-connection outbound queues.
#[derive(Debug, Default)]
pub struct Outboxes {
    senders: RwLock<HashMap<ClientHandle, Sender<ServerMessage>>>,
}

impl Outboxes {
    /// Creates an empty set of queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a queue for a new connection and returns its receiving end.
    pub fn open(&self, handle: ClientHandle) -> Receiver<ServerMessage> {
        let (tx, rx) = mpsc::channel();
        self.senders.write().insert(handle, tx);
        rx
    }

    /// Closes a connection's queue. Returns true if it was open.
    pub fn close(&self, handle: ClientHandle) -> bool {
        self.senders.write().remove(&handle).is_some()
    }

    /// Returns the number of open queues.
    pub fn len(&self) -> usize {
        self.senders.read().len()
    }

    /// Returns true if no queue is open.
    pub fn is_empty(&self) -> bool {
        self.senders.read().is_empty()
    }
}

impl Outbound for Outboxes {
    fn send(&self, handle: ClientHandle, message: ServerMessage) -> ServerResult<()> {
        let senders = self.senders.read();
        let sender = senders.get(&handle).ok_or_else(|| ServerError::Transport {
            handle,
            reason: "connection closed".into(),
        })?;
        sender.send(message).map_err(|_| ServerError::Transport {
            handle,
            reason: "receiver dropped".into(),
        })
    }
}

/// An in-process transport in front of a [`Replicator`].
///
/// # Example
///
/// ```rust
/// use replicant_schema::NoSchemas;
/// use replicant_server::{LocalBridge, ServerConfig};
/// use replicant_storage::InMemoryStore;
/// use std::sync::Arc;
///
/// let bridge = LocalBridge::start(
///     ServerConfig::default(),
///     Arc::new(InMemoryStore::new()),
///     Arc::new(NoSchemas),
/// );
/// let a = bridge.connect();
/// let b = bridge.connect();
/// assert_ne!(a.handle(), b.handle());
/// assert_eq!(bridge.connection_count(), 2);
/// ```
pub struct LocalBridge {
    replicator: Arc<Replicator>,
    outboxes: Arc<Outboxes>,
}

impl LocalBridge {
    /// Builds a replicator wired to a fresh bridge.
    pub fn start(
        config: ServerConfig,
        store: Arc<dyn ReplicantStore>,
        schemas: Arc<dyn SchemaResolver>,
    ) -> Self {
        let outboxes = Arc::new(Outboxes::new());
        let outbound: Arc<dyn Outbound> = outboxes.clone();
        let replicator = Arc::new(Replicator::new(config, store, schemas, outbound));
        Self {
            replicator,
            outboxes,
        }
    }

    /// Wraps an existing replicator and the outboxes it sends to.
    pub fn new(replicator: Arc<Replicator>, outboxes: Arc<Outboxes>) -> Self {
        Self {
            replicator,
            outboxes,
        }
    }

    /// Returns the replicator.
    pub fn replicator(&self) -> &Arc<Replicator> {
        &self.replicator
    }

    /// Opens a new connection.
    pub fn connect(&self) -> LocalConnection {
        let handle = ClientHandle::new();
        let inbox = self.outboxes.open(handle);
        debug!(%handle, "connection opened");
        LocalConnection {
            handle,
            replicator: Arc::clone(&self.replicator),
            outboxes: Arc::clone(&self.outboxes),
            inbox,
            send_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns the number of open connections.
    pub fn connection_count(&self) -> usize {
        self.outboxes.len()
    }
}

/// One client's end of a [`LocalBridge`].
///
/// Messages sent on a connection reach the replicator in the order they were
/// sent; server messages arrive in the inbox in the order they were produced.
pub struct LocalConnection {
    handle: ClientHandle,
    replicator: Arc<Replicator>,
    outboxes: Arc<Outboxes>,
    inbox: Receiver<ServerMessage>,
    send_lock: Mutex<()>,
    closed: AtomicBool,
}

impl LocalConnection {
    /// Returns this connection's handle.
    pub fn handle(&self) -> ClientHandle {
        self.handle
    }

    /// Returns true until [`disconnect`](LocalConnection::disconnect) is called.
    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    /// Delivers a message to the replicator.
    ///
    /// Rejections are also delivered to the inbox as `error` messages.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Transport`] if the connection is closed, or the
    /// replicator's rejection.
    pub fn send(&self, message: ClientMessage) -> ServerResult<()> {
        let _order = self.send_lock.lock();
        self.ensure_open()?;
        trace!(handle = %self.handle, ?message, "client message");
        self.replicator.handle_client_message(self.handle, message)
    }

    /// Delivers raw JSON text to the replicator.
    ///
    /// # Errors
    ///
    /// As [`send`](LocalConnection::send); undecodable text is an
    /// [`ServerError::InvalidRequest`].
    pub fn send_text(&self, text: &str) -> ServerResult<()> {
        let _order = self.send_lock.lock();
        self.ensure_open()?;
        self.replicator.handle_text(self.handle, text)
    }

    fn ensure_open(&self) -> ServerResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ServerError::Transport {
                handle: self.handle,
                reason: "connection closed".into(),
            })
        }
    }

    /// Returns the next server message if one is waiting.
    pub fn try_recv(&self) -> Option<ServerMessage> {
        self.inbox.try_recv().ok()
    }

    /// Waits up to `timeout` for the next server message.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ServerMessage> {
        match self.inbox.recv_timeout(timeout) {
            Ok(message) => Some(message),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Returns every waiting server message.
    pub fn drain(&self) -> Vec<ServerMessage> {
        self.inbox.try_iter().collect()
    }

    /// Closes the connection and unsubscribes it everywhere.
    ///
    /// Messages already in the inbox can still be received.
    pub fn disconnect(&self) {
        let _order = self.send_lock.lock();
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.outboxes.close(self.handle);
        self.replicator.handle_disconnect(self.handle);
        debug!(handle = %self.handle, "connection closed");
    }
}

impl Drop for LocalConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}
