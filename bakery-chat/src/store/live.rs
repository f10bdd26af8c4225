use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{SubsecRound, Utc};
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{ChatError, Result};
use crate::models::input::ChatMessageDraft;
use crate::models::ChatMessage;

use super::log::{MemoryLog, MessageLog};
use super::{MessageStore, SessionFilter, Snapshot, Subscription};

struct Subscriber {
    filter: SessionFilter,
    tx: watch::Sender<Snapshot>,
}

/// In-process message store: a [`MessageLog`] plus live snapshot fan-out.
///
/// Mutations and the snapshot pushes they cause happen under one lock, so each
/// subscriber sees snapshots in the order the log changed.
pub struct LiveStore {
    log: Mutex<Box<dyn MessageLog>>,
    subscribers: DashMap<u64, Subscriber>,
    next_subscriber_id: AtomicU64,
}

impl LiveStore {
    pub fn new(log: impl MessageLog + 'static) -> Self {
        Self {
            log: Mutex::new(Box::new(log)),
            subscribers: DashMap::new(),
            next_subscriber_id: AtomicU64::new(1),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryLog::new())
    }

    fn lock_log(&self) -> Result<MutexGuard<'_, Box<dyn MessageLog>>> {
        self.log
            .lock()
            .map_err(|e| ChatError::Transport(format!("message log poisoned: {}", e)))
    }

    /// Number of subscriptions still open.
    pub fn subscriber_count(&self) -> usize {
        self.prune_closed();
        self.subscribers.len()
    }

    fn prune_closed(&self) {
        self.subscribers.retain(|_, sub| !sub.tx.is_closed());
    }

    /// Push a fresh snapshot to every open subscriber whose feed covers the
    /// changed session. Must be called with the log lock held.
    fn publish(&self, log: &dyn MessageLog, changed_session: &str) {
        let mut closed = Vec::new();
        for entry in self.subscribers.iter() {
            let sub = entry.value();
            if sub.tx.is_closed() {
                closed.push(*entry.key());
                continue;
            }
            if !sub.filter.covers(changed_session) {
                continue;
            }
            match log.query(&sub.filter) {
                Ok(messages) => {
                    sub.tx.send_replace(Arc::new(messages));
                }
                Err(e) => {
                    // Subscriber keeps its last snapshot
                    warn!(subscriber = *entry.key(), error = %e, "Failed to refresh snapshot");
                }
            }
        }
        for id in closed {
            self.subscribers.remove(&id);
            debug!(subscriber = id, "Dropped closed subscription");
        }
    }

    /// Greet a session the first time a customer opens it. Returns the
    /// greeting when one was posted; a session that already has messages, or
    /// was greeted before (even if since cleared), is left alone. Only a
    /// stored greeting marks the session as greeted.
    pub fn ensure_welcome(&self, session_id: &str, text: &str) -> Result<Option<ChatMessage>> {
        let mut log = self.lock_log()?;
        if log.is_welcomed(session_id)? {
            return Ok(None);
        }
        let existing = log.query(&SessionFilter::session(session_id).with_limit(1))?;
        if !existing.is_empty() {
            return Ok(None);
        }

        let draft = ChatMessageDraft::operator(session_id, text);
        let message = Self::materialize(draft);
        log.insert(message.clone())?;
        log.mark_welcomed(session_id)?;
        self.publish(&**log, session_id);
        info!(session_id, "Posted welcome message");
        Ok(Some(message))
    }

    fn materialize(draft: ChatMessageDraft) -> ChatMessage {
        ChatMessage {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: draft.session_id,
            message: draft.message.trim().to_string(),
            attachments: draft.attachments,
            // Millisecond precision so the value survives the durable log unchanged
            timestamp: Utc::now().trunc_subsecs(3),
            is_customer_authored: draft.is_customer_authored,
            read_by_operator: !draft.is_customer_authored,
        }
    }
}

impl Default for LiveStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[async_trait]
impl MessageStore for LiveStore {
    async fn append(&self, draft: ChatMessageDraft) -> Result<ChatMessage> {
        draft.validate_draft()?;
        let message = Self::materialize(draft);

        let mut log = self.lock_log()?;
        log.insert(message.clone())?;
        self.publish(&**log, &message.session_id);

        debug!(
            id = %message.id,
            session_id = %message.session_id,
            customer = message.is_customer_authored,
            attachments = message.attachments.len(),
            "Appended message"
        );
        Ok(message)
    }

    async fn subscribe(&self, filter: SessionFilter) -> Result<Subscription> {
        let log = self.lock_log()?;
        let snapshot = Arc::new(log.query(&filter)?);
        let (tx, rx) = watch::channel(snapshot);

        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.insert(id, Subscriber { filter, tx });
        drop(log);

        debug!(subscriber = id, "Opened subscription");
        Ok(Subscription::new(rx))
    }

    async fn mark_read(&self, message_id: &str) -> Result<()> {
        let mut log = self.lock_log()?;
        let message = log
            .get(message_id)?
            .ok_or_else(|| ChatError::NotFound(format!("Message {}", message_id)))?;
        if !message.is_customer_authored {
            return Err(ChatError::Validation(
                "Operator messages have no read state".to_string(),
            ));
        }
        if log.set_read(message_id)? {
            self.publish(&**log, &message.session_id);
            debug!(id = message_id, "Marked read");
        }
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> Result<usize> {
        let mut log = self.lock_log()?;
        let deleted = log.delete_session(session_id)?;
        if deleted == 0 {
            return Err(ChatError::NotFound(format!("Session {}", session_id)));
        }
        self.publish(&**log, session_id);
        info!(session_id, deleted, "Cleared session");
        Ok(deleted)
    }
}
