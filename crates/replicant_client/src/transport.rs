//! Transport layer abstraction for Replicant clients.

use crate::error::{ClientError, ClientResult};
use parking_lot::Mutex;
use replicant_protocol::ClientMessage;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// A client transport carries messages to the server.
///
/// Inbound traffic is not part of this trait: whatever owns the connection
/// hands each received [`replicant_protocol::ServerMessage`] to
/// [`crate::ReplicantClient::handle_message`].
///
/// Implementations must not deliver server messages back into the client
/// from inside [`send`](ClientTransport::send); the client may be mid-update
/// when it sends.
pub trait ClientTransport: Send + Sync {
    /// Sends one message to the server.
    fn send(&self, message: ClientMessage) -> ClientResult<()>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Re-establishes the connection after a disconnect.
    fn reconnect(&self) -> ClientResult<()> {
        Ok(())
    }

    /// Closes the transport connection.
    fn close(&self) -> ClientResult<()>;
}

/// A mock transport for testing.
///
/// Records every sent message. Reconnects can be made to fail a set number
/// of times before succeeding.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    sent: Mutex<Vec<ClientMessage>>,
    failing_sends: AtomicU32,
    failing_reconnects: AtomicU32,
    reconnect_attempts: AtomicU32,
}

impl MockTransport {
    /// Creates a new connected mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
            failing_sends: AtomicU32::new(0),
            failing_reconnects: AtomicU32::new(0),
            reconnect_attempts: AtomicU32::new(0),
        }
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Makes the next `count` sends fail with a retryable error while
    /// still reporting the transport as connected.
    pub fn fail_next_sends(&self, count: u32) {
        self.failing_sends.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` reconnects fail with a retryable error.
    pub fn fail_next_reconnects(&self, count: u32) {
        self.failing_reconnects.store(count, Ordering::SeqCst);
    }

    /// Returns how many reconnects have been attempted.
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Returns a copy of every message sent so far.
    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().clone()
    }

    /// Removes and returns the messages sent so far.
    pub fn take_sent(&self) -> Vec<ClientMessage> {
        std::mem::take(&mut *self.sent.lock())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientTransport for MockTransport {
    fn send(&self, message: ClientMessage) -> ClientResult<()> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        if take_one(&self.failing_sends) {
            return Err(ClientError::transport_retryable("send failed"));
        }
        self.sent.lock().push(message);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn reconnect(&self) -> ClientResult<()> {
        self.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.failing_reconnects) {
            return Err(ClientError::transport_retryable("connection refused"));
        }
        self.set_connected(true);
        Ok(())
    }

    fn close(&self) -> ClientResult<()> {
        self.set_connected(false);
        Ok(())
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(name: &str) -> ClientMessage {
        ClientMessage::Read {
            namespace: "game".into(),
            name: name.into(),
        }
    }

    #[test]
    fn mock_records_sent_messages() {
        let transport = MockTransport::new();
        transport.send(read("score")).unwrap();
        transport.send(read("title")).unwrap();

        assert_eq!(transport.sent().len(), 2);
        assert_eq!(transport.take_sent().len(), 2);
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn mock_disconnected() {
        let transport = MockTransport::new();
        transport.close().unwrap();

        assert!(!transport.is_connected());
        assert!(matches!(
            transport.send(read("score")),
            Err(ClientError::NotConnected)
        ));
    }

    #[test]
    fn mock_failing_reconnects() {
        let transport = MockTransport::new();
        transport.set_connected(false);
        transport.fail_next_reconnects(2);

        assert!(transport.reconnect().unwrap_err().is_retryable());
        assert!(transport.reconnect().is_err());
        transport.reconnect().unwrap();
        assert!(transport.is_connected());
        assert_eq!(transport.reconnect_attempts(), 3);
    }
}
