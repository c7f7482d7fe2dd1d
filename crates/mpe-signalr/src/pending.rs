//! Pending invocation reply table.
//!
//! Maps monotonic message ids to single-shot reply channels. The id space
//! is local to one connection: each reconnect constructs a fresh
//! connection and with it a fresh table starting at id 0.

use crate::wire::ReplyResult;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::oneshot;

/// Reply table for one connection.
#[derive(Debug, Default)]
pub struct PendingReplies {
    entries: DashMap<u32, oneshot::Sender<ReplyResult>>,
    next_id: AtomicU32,
}

impl PendingReplies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next invocation id. Ids start at 0.
    pub fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Register a reply channel for an allocated id.
    pub fn insert(&self, id: u32, sender: oneshot::Sender<ReplyResult>) {
        self.entries.insert(id, sender);
    }

    /// Resolve the entry for `id`, consuming it.
    ///
    /// Returns false when the id is unknown (never registered, already
    /// resolved, or invoked without a reply channel); such replies are
    /// dropped by the caller.
    pub fn resolve(&self, id: u32, result: ReplyResult) -> bool {
        match self.entries.remove(&id) {
            Some((_, sender)) => {
                let _ = sender.send(result);
                true
            }
            None => false,
        }
    }

    /// Remove an entry whose invocation never made it onto the wire.
    pub fn forget(&self, id: u32) {
        self.entries.remove(&id);
    }

    /// Drop all entries. Waiting receivers observe a closed channel and
    /// must treat the invocation as indeterminate.
    pub fn abandon_all(&self) -> usize {
        let abandoned = self.entries.len();
        self.entries.clear();
        abandoned
    }

    pub fn pending_count(&self) -> usize {
        self.entries.len()
    }
}
