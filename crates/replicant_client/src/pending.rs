//! Tracking of optimistic mutations awaiting the server.
//!
//! Every mutation a proxy sends is recorded with the value the proxy
//! predicted it would produce. Entries move through three states:
//!
//! ```text
//! Sent ──own Change, same value──► AcknowledgedMatching   (removed)
//!   │
//!   ├──own Change, other value──► AcknowledgedSuperseded  (removed)
//!   │
//!   └──foreign Change first─────► AcknowledgedSuperseded  (kept until rejected)
//! ```
//!
//! A rejection removes the entry whatever its state.

use serde_json::Value;
use std::collections::VecDeque;

/// State of one tracked mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    /// Sent, no answer yet.
    Sent,
    /// The server accepted the mutation and agrees with the prediction.
    AcknowledgedMatching,
    /// The server's value differs from the prediction, either because the
    /// accepted value was different or because another writer got there first.
    AcknowledgedSuperseded,
}

#[derive(Debug, Clone)]
struct PendingEntry {
    request_id: u64,
    state: PendingState,
    predicted: Option<Value>,
}

/// Counters kept by a [`PendingTracker`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingStats {
    /// Mutations acknowledged with the predicted value.
    pub matched: u64,
    /// Mutations whose prediction did not hold.
    pub superseded: u64,
    /// Mutations rejected by the server or the transport.
    pub rejected: u64,
}

/// Ordered record of in-flight mutations for one proxy.
#[derive(Debug, Default)]
pub struct PendingTracker {
    entries: VecDeque<PendingEntry>,
    stats: PendingStats,
}

impl PendingTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a sent mutation and the value it should produce.
    pub fn track(&mut self, request_id: u64, predicted: Option<Value>) {
        self.entries.push_back(PendingEntry {
            request_id,
            state: PendingState::Sent,
            predicted,
        });
    }

    /// Number of mutations still expected to be accepted.
    pub fn outstanding(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.state == PendingState::Sent)
            .count()
    }

    /// Total entries, including superseded ones awaiting their rejection.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the state of a tracked mutation.
    pub fn state(&self, request_id: u64) -> Option<PendingState> {
        self.entries
            .iter()
            .find(|e| e.request_id == request_id)
            .map(|e| e.state)
    }

    /// Value predicted by the newest outstanding mutation.
    ///
    /// Returns `None` when nothing is outstanding; `Some(None)` when the
    /// newest mutation predicts an undefined value.
    pub fn predicted(&self) -> Option<Option<&Value>> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.state == PendingState::Sent)
            .map(|e| e.predicted.as_ref())
    }

    /// Settles a mutation the server accepted.
    ///
    /// Returns the state it settled in, or `None` for an unknown id.
    pub fn acknowledge(&mut self, request_id: u64, server_value: Option<&Value>) -> Option<PendingState> {
        let position = self.entries.iter().position(|e| e.request_id == request_id)?;
        let entry = self.entries.remove(position)?;

        let state = if entry.state == PendingState::Sent && entry.predicted.as_ref() == server_value {
            self.stats.matched += 1;
            PendingState::AcknowledgedMatching
        } else {
            self.stats.superseded += 1;
            PendingState::AcknowledgedSuperseded
        };
        Some(state)
    }

    /// Marks every outstanding mutation as superseded by another writer.
    ///
    /// Returns how many entries changed state.
    pub fn supersede_all(&mut self) -> usize {
        let mut count = 0;
        for entry in &mut self.entries {
            if entry.state == PendingState::Sent {
                entry.state = PendingState::AcknowledgedSuperseded;
                self.stats.superseded += 1;
                count += 1;
            }
        }
        count
    }

    /// Drops a rejected mutation. Returns true if it was tracked.
    pub fn reject(&mut self, request_id: u64) -> bool {
        let Some(position) = self.entries.iter().position(|e| e.request_id == request_id) else {
            return false;
        };
        self.entries.remove(position);
        self.stats.rejected += 1;
        true
    }

    /// Forgets every entry, e.g. when a fresh snapshot arrives.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Returns the counters.
    pub fn stats(&self) -> PendingStats {
        self.stats
    }
}
