//! Debounced, fire-and-forget persistence.
//!
//! A [`Persister`] owns a worker thread that receives save requests over a
//! channel. Saves of the same key that arrive within the debounce window are
//! coalesced and only the newest value is written. The worker writes one
//! record at a time, so writes to a key are never reordered.
//!
//! A removal is queued the same way as a save, so a remove scheduled after a
//! save of the same key wins.
//!
//! A failed write is logged and its value kept; it is retried when the key is
//! saved again or on [`Persister::flush`]. Callers are never blocked by I/O.

use crate::error::{StorageError, StorageResult};
use crate::store::ReplicantStore;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

type Key = (String, String);

/// Configuration for a [`Persister`].
#[derive(Debug, Clone)]
pub struct PersisterConfig {
    /// How long a save may wait to be coalesced with later saves of the same key.
    pub debounce: Duration,
}

impl PersisterConfig {
    /// Creates a configuration with the given debounce window.
    pub fn new(debounce: Duration) -> Self {
        Self { debounce }
    }
}

impl Default for PersisterConfig {
    fn default() -> Self {
        Self::new(Duration::from_millis(250))
    }
}

/// Counters describing persister activity.
#[derive(Debug, Default)]
pub struct PersisterStats {
    requested: AtomicU64,
    written: AtomicU64,
    failed: AtomicU64,
}

impl PersisterStats {
    /// Number of save requests received.
    pub fn requested(&self) -> u64 {
        self.requested.load(Ordering::SeqCst)
    }

    /// Number of successful writes to the store.
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::SeqCst)
    }

    /// Number of failed write attempts.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }
}

enum Command {
    Save { key: Key, value: Option<Value> },
    Flush(Sender<()>),
    Shutdown,
}

struct PendingWrite {
    // `None` removes the record.
    value: Option<Value>,
    due: Instant,
}

/// Debounced writer in front of a [`ReplicantStore`].
///
/// # Example
///
/// ```rust
/// use replicant_storage::{InMemoryStore, Persister, PersisterConfig, ReplicantStore};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let store = Arc::new(InMemoryStore::new());
/// let persister = Persister::new(store.clone(), PersisterConfig::default());
/// persister.schedule("game", "score", json!(1));
/// persister.schedule("game", "score", json!(2));
/// persister.flush().unwrap();
/// assert_eq!(store.load("game", "score").unwrap(), Some(json!(2)));
/// ```
pub struct Persister {
    tx: Sender<Command>,
    stats: Arc<PersisterStats>,
    worker: Option<JoinHandle<()>>,
}

impl Persister {
    /// Starts a persister writing to `store`.
    pub fn new(store: Arc<dyn ReplicantStore>, config: PersisterConfig) -> Self {
        let (tx, rx) = mpsc::channel();
        let stats = Arc::new(PersisterStats::default());

        let worker = {
            let stats = Arc::clone(&stats);
            thread::Builder::new()
                .name("replicant-persister".into())
                .spawn(move || Worker::new(store, config, stats).run(rx))
                .map_err(|e| warn!(error = %e, "failed to start persister thread, writes are disabled"))
                .ok()
        };

        Self { tx, stats, worker }
    }

    /// Schedules a value to be written for a key.
    ///
    /// Never blocks on I/O. If the worker is gone the request is dropped and
    /// a warning logged.
    pub fn schedule(&self, namespace: &str, name: &str, value: Value) {
        self.send_save(namespace, name, Some(value));
    }

    /// Schedules removal of the record for a key.
    pub fn schedule_remove(&self, namespace: &str, name: &str) {
        self.send_save(namespace, name, None);
    }

    fn send_save(&self, namespace: &str, name: &str, value: Option<Value>) {
        self.stats.requested.fetch_add(1, Ordering::SeqCst);
        let command = Command::Save {
            key: (namespace.to_string(), name.to_string()),
            value,
        };
        if self.tx.send(command).is_err() {
            warn!(namespace, name, "persister is closed, dropping write");
        }
    }

    /// Writes everything pending now and waits until it has been attempted.
    ///
    /// Failed writes are retried as part of the flush.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Closed`] if the worker is not running.
    pub fn flush(&self) -> StorageResult<()> {
        let (ack_tx, ack_rx) = mpsc::channel();
        self.tx
            .send(Command::Flush(ack_tx))
            .map_err(|_| StorageError::Closed)?;
        ack_rx.recv().map_err(|_| StorageError::Closed)
    }

    /// Returns the activity counters.
    pub fn stats(&self) -> &PersisterStats {
        &self.stats
    }
}

impl Drop for Persister {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("persister thread panicked during shutdown");
            }
        }
    }
}

struct Worker {
    store: Arc<dyn ReplicantStore>,
    config: PersisterConfig,
    stats: Arc<PersisterStats>,
    pending: HashMap<Key, PendingWrite>,
    failed: HashMap<Key, Option<Value>>,
}

impl Worker {
    fn new(store: Arc<dyn ReplicantStore>, config: PersisterConfig, stats: Arc<PersisterStats>) -> Self {
        Self {
            store,
            config,
            stats,
            pending: HashMap::new(),
            failed: HashMap::new(),
        }
    }

    fn run(mut self, rx: Receiver<Command>) {
        loop {
            let received = match self.next_deadline() {
                Some(due) => rx.recv_timeout(due.saturating_duration_since(Instant::now())),
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };

            match received {
                Ok(Command::Save { key, value }) => self.enqueue(key, value),
                Ok(Command::Flush(ack)) => {
                    self.write_all();
                    let _ = ack.send(());
                }
                Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                    self.write_all();
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {}
            }

            self.write_due();
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.due).min()
    }

    fn enqueue(&mut self, key: Key, value: Option<Value>) {
        // A newer value supersedes any failed one; it is the retry.
        self.failed.remove(&key);
        let due = Instant::now() + self.config.debounce;
        self.pending
            .entry(key)
            .and_modify(|p| p.value = value.clone())
            .or_insert(PendingWrite { value, due });
    }

    fn write_due(&mut self) {
        let now = Instant::now();
        let due: Vec<Key> = self
            .pending
            .iter()
            .filter(|(_, p)| p.due <= now)
            .map(|(k, _)| k.clone())
            .collect();

        for key in due {
            if let Some(write) = self.pending.remove(&key) {
                self.write(key, write.value);
            }
        }
    }

    fn write_all(&mut self) {
        let mut batch: Vec<(Key, Option<Value>)> = self.failed.drain().collect();
        batch.extend(self.pending.drain().map(|(k, p)| (k, p.value)));
        for (key, value) in batch {
            self.write(key, value);
        }
    }

    fn write(&mut self, key: Key, value: Option<Value>) {
        let result = match &value {
            Some(value) => self.store.save(&key.0, &key.1, value),
            None => self.store.remove(&key.0, &key.1).map(|_| ()),
        };
        match result {
            Ok(()) => {
                self.stats.written.fetch_add(1, Ordering::SeqCst);
                debug!(namespace = %key.0, name = %key.1, "persisted replicant");
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::SeqCst);
                warn!(
                    namespace = %key.0,
                    name = %key.1,
                    error = %e,
                    "failed to persist replicant, will retry on next change"
                );
                self.failed.insert(key, value);
            }
        }
    }
}
