use serde::{Deserialize, Serialize};

use super::message::ChatMessage;

/// Projection of every message sharing one session id. Never persisted.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChatSession {
    pub session_id: String,
    pub last_message: ChatMessage,
    pub unread_count: usize,
}
