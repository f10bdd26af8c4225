use thiserror::Error;

/// Failures surfaced by the chat layer. Every failure is scoped to the single
/// attempted action; none of them is fatal to the process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// Rejected before anything reached the store or object storage.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Any failure talking to the message store or object storage.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Client-local persistence (session id, pending inquiry).
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl ChatError {
    /// Wire name used in `failure` frames.
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::Validation(_) => "validation",
            ChatError::Transport(_) => "transport",
            ChatError::NotFound(_) => "not_found",
            ChatError::Forbidden(_) => "forbidden",
            ChatError::Storage(_) => "storage",
            ChatError::Config(_) => "config",
        }
    }

    /// Rebuild an error from a `failure` frame. Unknown kinds degrade to transport.
    pub fn from_kind(kind: &str, message: String) -> Self {
        match kind {
            "validation" => ChatError::Validation(message),
            "not_found" => ChatError::NotFound(message),
            "forbidden" => ChatError::Forbidden(message),
            "storage" => ChatError::Storage(message),
            "config" => ChatError::Config(message),
            _ => ChatError::Transport(message),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ChatError::Validation(m)
            | ChatError::Transport(m)
            | ChatError::NotFound(m)
            | ChatError::Forbidden(m)
            | ChatError::Storage(m)
            | ChatError::Config(m) => m,
        }
    }
}

impl From<rusqlite::Error> for ChatError {
    fn from(e: rusqlite::Error) -> Self {
        ChatError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(e: serde_json::Error) -> Self {
        ChatError::Transport(format!("serialization failed: {}", e))
    }
}

impl From<std::io::Error> for ChatError {
    fn from(e: std::io::Error) -> Self {
        ChatError::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
