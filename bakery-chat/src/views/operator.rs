use std::sync::Arc;

use tracing::{info, warn};

use crate::aggregate::{aggregate, total_unread};
use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::models::input::ChatMessageDraft;
use crate::models::{ChatMessage, ChatSession};
use crate::protocol::Role;
use crate::read_state::mark_delivered_read;
use crate::store::{MessageStore, RemoteStore, SessionFilter, Snapshot, Subscription};

/// Conversation history kept open for the operator. Larger than the customer
/// page so older unread messages still get marked read.
pub const OPERATOR_HISTORY_LIMIT: usize = 500;

/// Proof that the caller passed the operator check. Only
/// [`OperatorAuth::from_signal`] can produce one.
#[derive(Debug, Clone, Copy)]
pub struct OperatorAuth {
    _private: (),
}

impl OperatorAuth {
    /// `is_operator` is the host application's authentication signal.
    pub fn from_signal(is_operator: bool) -> Result<Self> {
        if is_operator {
            Ok(Self { _private: () })
        } else {
            Err(ChatError::Forbidden("Operator access required".to_string()))
        }
    }
}

/// The operator's inbox: every session, plus one conversation at a time.
pub struct OperatorConsole<S: ?Sized> {
    store: Arc<S>,
}

impl<S> OperatorConsole<S>
where
    S: MessageStore + ?Sized,
{
    pub fn new(store: Arc<S>, _auth: OperatorAuth) -> Self {
        Self { store }
    }

    /// Live session list, most recently active first.
    pub async fn sessions(&self) -> Result<SessionListFeed> {
        let subscription = self.store.subscribe(SessionFilter::all()).await?;
        Ok(SessionListFeed {
            subscription,
            sessions: Vec::new(),
        })
    }

    /// Open one conversation. Every delivery marks its unread customer
    /// messages read.
    pub async fn open_session(&self, session_id: &str) -> Result<ConversationFeed<S>> {
        let filter = SessionFilter::session(session_id).with_limit(OPERATOR_HISTORY_LIMIT);
        let subscription = self.store.subscribe(filter).await?;
        info!(session_id, "Operator opened conversation");
        Ok(ConversationFeed {
            store: self.store.clone(),
            session_id: session_id.to_string(),
            subscription,
            current: Arc::default(),
        })
    }

    pub async fn reply(&self, session_id: &str, text: &str) -> Result<ChatMessage> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::Validation("Reply cannot be empty".to_string()));
        }
        self.store
            .append(ChatMessageDraft::operator(session_id, text))
            .await
    }

    /// Delete every message in the session. The customer keeps their session id.
    pub async fn clear(&self, session_id: &str) -> Result<usize> {
        let removed = self.store.delete_session(session_id).await?;
        info!(session_id, removed, "Operator cleared session");
        Ok(removed)
    }
}

impl OperatorConsole<RemoteStore> {
    /// Connect to the configured server with the configured operator token.
    pub async fn connect(config: &ChatConfig, auth: OperatorAuth) -> Result<Self> {
        let store = RemoteStore::from_config(config, Role::Operator).await?;
        Ok(Self::new(Arc::new(store), auth))
    }
}

/// Live session summaries built from the global feed.
pub struct SessionListFeed {
    subscription: Subscription,
    sessions: Vec<ChatSession>,
}

impl SessionListFeed {
    /// `None` once the feed ends; the last list stays in
    /// [`SessionListFeed::sessions`].
    pub async fn next(&mut self) -> Option<&[ChatSession]> {
        match self.subscription.next().await {
            Some(snapshot) => {
                self.sessions = aggregate(&snapshot);
                Some(self.sessions.as_slice())
            }
            None => {
                warn!("Session list feed ended, keeping last list");
                None
            }
        }
    }

    pub fn sessions(&self) -> &[ChatSession] {
        &self.sessions
    }

    /// Unread customer messages across every session.
    pub fn pending_total(&self) -> usize {
        total_unread(&self.sessions)
    }
}

/// One session's messages as seen by the operator.
pub struct ConversationFeed<S: ?Sized> {
    store: Arc<S>,
    session_id: String,
    subscription: Subscription,
    current: Snapshot,
}

impl<S> ConversationFeed<S>
where
    S: MessageStore + ?Sized,
{
    /// Wait for the next delivery, mark it read and return it. A failed
    /// `mark_read` is logged and the delivery is still returned; the next
    /// delivery retries it.
    pub async fn next(&mut self) -> Option<Snapshot> {
        let Some(snapshot) = self.subscription.next().await else {
            warn!(session_id = %self.session_id, "Conversation feed ended, keeping last snapshot");
            return None;
        };

        if let Err(e) = mark_delivered_read(self.store.as_ref(), &snapshot).await {
            warn!(session_id = %self.session_id, error = %e, "Could not mark conversation read");
        }
        self.current = snapshot.clone();
        Some(snapshot)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn current(&self) -> &[ChatMessage] {
        &self.current
    }
}
