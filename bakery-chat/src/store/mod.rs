//! Message Store Client: append, ordered range queries and live snapshot
//! subscriptions against the remote message log.
//!
//! Two implementations share one contract: [`LiveStore`] keeps the log in
//! process (the server runs on it), [`RemoteStore`] talks to the server over
//! WebSocket.

mod live;
mod log;
mod remote;
mod sqlite;
#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::config::DEFAULT_PAGE_SIZE;
use crate::error::Result;
use crate::models::input::ChatMessageDraft;
use crate::models::ChatMessage;

pub use live::LiveStore;
pub use log::{MemoryLog, MessageLog};
pub use remote::RemoteStore;
pub use sqlite::SqliteLog;

/// Full ordered result set of a subscription at one point in time.
pub type Snapshot = Arc<Vec<ChatMessage>>;

/// What a subscription or query covers.
///
/// With a session id: that session only, ascending by timestamp, newest
/// `limit` messages (default 50). Without: every session, descending, uncapped
/// unless a limit is given.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFilter {
    pub session_id: Option<String>,
    pub limit: Option<usize>,
}

impl SessionFilter {
    pub fn session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            limit: None,
        }
    }

    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn effective_limit(&self) -> Option<usize> {
        match (&self.session_id, self.limit) {
            (_, Some(limit)) => Some(limit),
            (Some(_), None) => Some(DEFAULT_PAGE_SIZE),
            (None, None) => None,
        }
    }

    /// Whether a change to `session_id` can alter this filter's result set.
    pub fn covers(&self, session_id: &str) -> bool {
        self.session_id.as_deref().map_or(true, |s| s == session_id)
    }
}

type CancelHook = Box<dyn FnOnce() + Send>;

/// A live feed of snapshots. Dropping it cancels the feed.
pub struct Subscription {
    rx: watch::Receiver<Snapshot>,
    initial_pending: bool,
    on_cancel: Option<CancelHook>,
}

impl Subscription {
    pub(crate) fn new(rx: watch::Receiver<Snapshot>) -> Self {
        Self {
            rx,
            initial_pending: true,
            on_cancel: None,
        }
    }

    pub(crate) fn on_cancel<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_cancel = Some(Box::new(hook));
        self
    }

    /// Wait for the next snapshot. The first call returns the snapshot current
    /// at subscribe time. `None` once the store side has gone away.
    pub async fn next(&mut self) -> Option<Snapshot> {
        if self.initial_pending {
            self.initial_pending = false;
            return Some(self.rx.borrow_and_update().clone());
        }
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Last snapshot received, without waiting.
    pub fn latest(&self) -> Snapshot {
        self.rx.borrow().clone()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hook) = self.on_cancel.take() {
            hook();
        }
    }
}

/// Operations against the canonical message log.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Validate, assign id and timestamp, persist, and notify every matching
    /// subscriber.
    async fn append(&self, draft: ChatMessageDraft) -> Result<ChatMessage>;

    /// Open a live feed. The returned subscription yields the current snapshot
    /// first, then a full snapshot after every change.
    async fn subscribe(&self, filter: SessionFilter) -> Result<Subscription>;

    /// Set `read_by_operator`. Idempotent. Fails for operator-authored messages.
    async fn mark_read(&self, message_id: &str) -> Result<()>;

    /// Delete every message of a session, all or nothing. Returns how many
    /// messages were removed.
    async fn delete_session(&self, session_id: &str) -> Result<usize>;
}
