//! The client that owns proxies and routes server messages to them.

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::proxy::{ProxyOptions, ProxyShared, ReplicantProxy};
use crate::transport::ClientTransport;
use parking_lot::RwLock;
use replicant_protocol::{ClientMessage, ProtocolError, ReplicantKey, ServerMessage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// State shared between a client and its proxies.
pub(crate) struct ClientInner<T: ClientTransport> {
    pub(crate) transport: T,
    pub(crate) config: ClientConfig,
    proxies: RwLock<HashMap<ReplicantKey, Arc<ProxyShared>>>,
    next_request_id: AtomicU64,
}

impl<T: ClientTransport> ClientInner<T> {
    pub(crate) fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn send(&self, message: ClientMessage) -> ClientResult<()> {
        trace!(key = %message.key(), request_id = ?message.request_id(), "sending");
        self.transport.send(message)
    }

    pub(crate) fn forget(&self, key: &ReplicantKey) {
        self.proxies.write().remove(key);
    }

    fn all(&self) -> Vec<Arc<ProxyShared>> {
        self.proxies.read().values().cloned().collect()
    }
}

/// A connection's worth of Replicant proxies.
///
/// The client sends through a [`ClientTransport`]; whoever reads from the
/// connection passes each server message to [`handle_message`](Self::handle_message).
///
/// # Example
///
/// ```rust
/// use replicant_client::{MockTransport, ProxyOptions, ReplicantClient};
/// use replicant_protocol::ServerMessage;
/// use serde_json::json;
///
/// let client = ReplicantClient::new(MockTransport::new());
/// let score = client.declare("game", "score", ProxyOptions::new()).unwrap();
///
/// client.handle_message(ServerMessage::Declared {
///     namespace: "game".into(),
///     name: "score".into(),
///     value: Some(json!(0)),
///     revision: 0,
///     schema: None,
/// });
///
/// score.set(json!(1)).unwrap();
/// assert_eq!(score.value(), Some(json!(1)));
/// assert_eq!(score.pending_count(), 1);
/// ```
pub struct ReplicantClient<T: ClientTransport> {
    inner: Arc<ClientInner<T>>,
}

impl<T: ClientTransport> Clone for ReplicantClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: ClientTransport> ReplicantClient<T> {
    /// Creates a client with the default configuration.
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, ClientConfig::default())
    }

    /// Creates a client with the given configuration.
    pub fn with_config(transport: T, config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                transport,
                config,
                proxies: RwLock::new(HashMap::new()),
                next_request_id: AtomicU64::new(1),
            }),
        }
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Declares a Replicant and returns its proxy.
    ///
    /// Declaring a key that already has a proxy returns that proxy; the new
    /// options are ignored. The proxy starts in
    /// [`ProxyStatus::Declaring`](crate::ProxyStatus::Declaring) and becomes
    /// ready when the server's snapshot arrives. If the transport is down the
    /// declare is sent on the next [`reconnect`](Self::reconnect).
    ///
    /// # Errors
    ///
    /// Returns an error if the key is empty or the declare could not be sent.
    pub fn declare(
        &self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        options: ProxyOptions,
    ) -> ClientResult<ReplicantProxy<T>> {
        let key = ReplicantKey::new(namespace, name);
        if key.namespace.is_empty() || key.name.is_empty() {
            return Err(ClientError::Protocol(ProtocolError::Invalid(
                "namespace and name must be non-empty".into(),
            )));
        }

        let (shared, created) = {
            let mut proxies = self.inner.proxies.write();
            match proxies.get(&key) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let shared = Arc::new(ProxyShared::new(key.clone(), options));
                    proxies.insert(key.clone(), Arc::clone(&shared));
                    (shared, true)
                }
            }
        };

        if created {
            if self.inner.transport.is_connected() {
                if let Err(e) = self.inner.send(shared.declare_message()) {
                    self.inner.forget(&key);
                    return Err(e);
                }
                debug!(%key, "declared");
            } else {
                debug!(%key, "declare queued until reconnect");
            }
        }

        Ok(ReplicantProxy::from_parts(Arc::clone(&self.inner), shared))
    }

    /// Returns the proxy for a key, if declared.
    pub fn proxy(&self, key: &ReplicantKey) -> Option<ReplicantProxy<T>> {
        let shared = self.inner.proxies.read().get(key).cloned()?;
        Some(ReplicantProxy::from_parts(Arc::clone(&self.inner), shared))
    }

    /// Releases the proxy for a key. Returns false if none was declared.
    ///
    /// # Errors
    ///
    /// Returns an error if the unsubscribe could not be sent.
    pub fn release(&self, key: &ReplicantKey) -> ClientResult<bool> {
        match self.proxy(key) {
            Some(proxy) => proxy.release().map(|()| true),
            None => Ok(false),
        }
    }

    /// Returns the number of declared proxies.
    pub fn proxy_count(&self) -> usize {
        self.inner.proxies.read().len()
    }

    /// Routes a server message to the proxy it concerns.
    ///
    /// Messages for keys without a proxy are dropped.
    pub fn handle_message(&self, message: ServerMessage) {
        let Some(key) = message.key() else {
            if let ServerMessage::Error { kind, reason, .. } = &message {
                warn!(%kind, %reason, "server rejected a request");
            }
            return;
        };

        let shared = self.inner.proxies.read().get(&key).cloned();
        match shared {
            Some(shared) => ReplicantProxy::from_parts(Arc::clone(&self.inner), shared).receive(message),
            None => debug!(%key, "message for unknown replicant dropped"),
        }
    }

    /// Decodes and routes a server message.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a server message.
    pub fn handle_text(&self, text: &str) -> ClientResult<()> {
        let message = ServerMessage::decode(text)?;
        self.handle_message(message);
        Ok(())
    }

    /// Marks every proxy stale after the connection dropped.
    ///
    /// Values stay readable. Mutations are deferred until the next snapshot.
    pub fn handle_disconnect(&self) {
        let proxies = self.inner.all();
        for shared in &proxies {
            shared.mark_stale();
        }
        info!(proxies = proxies.len(), "disconnected; proxies marked stale");
    }

    /// Reconnects the transport and redeclares every proxy.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if it could not reconnect or send.
    pub fn reconnect(&self) -> ClientResult<()> {
        self.inner.transport.reconnect()?;

        let proxies = self.inner.all();
        for shared in &proxies {
            ReplicantProxy::from_parts(Arc::clone(&self.inner), Arc::clone(shared)).resubscribe()?;
        }
        info!(proxies = proxies.len(), "reconnected; resubscribing");
        Ok(())
    }

    /// Reconnects, retrying retryable failures per the retry configuration.
    ///
    /// # Errors
    ///
    /// Returns the last error once attempts run out, or the first
    /// non-retryable error.
    pub fn reconnect_with_retry(&self) -> ClientResult<()> {
        let retry = &self.inner.config.retry;
        let mut last_error = None;

        for attempt in 0..retry.max_attempts {
            if attempt > 0 {
                let delay = retry.delay_for_attempt(attempt);
                debug!(attempt, ?delay, "waiting before reconnect");
                std::thread::sleep(delay);
            }

            match self.reconnect() {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if e.is_retryable() && attempt + 1 < retry.max_attempts {
                        warn!(attempt, error = %e, "reconnect failed");
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or(ClientError::NotConnected))
    }

    /// Closes the transport. Proxies keep their values and become stale.
    ///
    /// # Errors
    ///
    /// Returns the transport's error.
    pub fn close(&self) -> ClientResult<()> {
        self.handle_disconnect();
        self.inner.transport.close()
    }
}
