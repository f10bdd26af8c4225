use std::collections::HashSet;

use crate::error::{ChatError, Result};
use crate::models::ChatMessage;

use super::SessionFilter;

/// Synchronous storage behind a [`super::LiveStore`]. Implementations do not
/// validate or notify; the live store does both.
pub trait MessageLog: Send {
    fn insert(&mut self, message: ChatMessage) -> Result<()>;

    /// Ordered result set for `filter` (see [`SessionFilter`]).
    fn query(&self, filter: &SessionFilter) -> Result<Vec<ChatMessage>>;

    fn get(&self, message_id: &str) -> Result<Option<ChatMessage>>;

    /// Set `read_by_operator`; returns whether the stored value changed.
    fn set_read(&mut self, message_id: &str) -> Result<bool>;

    /// Remove every message of the session atomically; returns the count.
    fn delete_session(&mut self, session_id: &str) -> Result<usize>;

    fn is_welcomed(&self, session_id: &str) -> Result<bool>;

    /// Record that the session was greeted; returns false if it already was.
    fn mark_welcomed(&mut self, session_id: &str) -> Result<bool>;
}

/// In-memory log, kept in insertion order.
#[derive(Debug, Default)]
pub struct MemoryLog {
    messages: Vec<ChatMessage>,
    welcomed: HashSet<String>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Order and cap `messages` (given in insertion order) for `filter`.
/// Equal timestamps keep insertion order.
pub(crate) fn order_for_filter(mut messages: Vec<ChatMessage>, filter: &SessionFilter) -> Vec<ChatMessage> {
    // Stable sort: ties stay in insertion order
    messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    let limit = filter.effective_limit();

    if filter.session_id.is_some() {
        if let Some(limit) = limit {
            let excess = messages.len().saturating_sub(limit);
            messages.drain(..excess);
        }
        messages
    } else {
        messages.reverse();
        if let Some(limit) = limit {
            messages.truncate(limit);
        }
        messages
    }
}

impl MessageLog for MemoryLog {
    fn insert(&mut self, message: ChatMessage) -> Result<()> {
        if self.messages.iter().any(|m| m.id == message.id) {
            return Err(ChatError::Transport(format!(
                "Duplicate message id {}",
                message.id
            )));
        }
        self.messages.push(message);
        Ok(())
    }

    fn query(&self, filter: &SessionFilter) -> Result<Vec<ChatMessage>> {
        let matching = self
            .messages
            .iter()
            .filter(|m| filter.covers(&m.session_id))
            .cloned()
            .collect();
        Ok(order_for_filter(matching, filter))
    }

    fn get(&self, message_id: &str) -> Result<Option<ChatMessage>> {
        Ok(self.messages.iter().find(|m| m.id == message_id).cloned())
    }

    fn set_read(&mut self, message_id: &str) -> Result<bool> {
        match self.messages.iter_mut().find(|m| m.id == message_id) {
            Some(message) if message.read_by_operator => Ok(false),
            Some(message) => {
                message.read_by_operator = true;
                Ok(true)
            }
            None => Err(ChatError::NotFound(format!("Message {}", message_id))),
        }
    }

    fn delete_session(&mut self, session_id: &str) -> Result<usize> {
        let before = self.messages.len();
        self.messages.retain(|m| m.session_id != session_id);
        Ok(before - self.messages.len())
    }

    fn is_welcomed(&self, session_id: &str) -> Result<bool> {
        Ok(self.welcomed.contains(session_id))
    }

    fn mark_welcomed(&mut self, session_id: &str) -> Result<bool> {
        Ok(self.welcomed.insert(session_id.to_string()))
    }
}
