use std::path::PathBuf;

use tracing::info;

use crate::error::{ChatError, Result};

const DEFAULT_SERVER_URL: &str = "ws://localhost:9001";
const DEFAULT_DB_PATH: &str = "bakery-chat.db";
const DEFAULT_UPLOAD_DIR: &str = "chat_files";
const DEFAULT_PUBLIC_URL: &str = "http://localhost:8080/chat_files";

/// Default number of messages kept in a session-scoped feed
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Client configuration, read from the environment (and `.env` when present).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    pub server_url: String,
    pub db_path: PathBuf,
    pub upload_dir: PathBuf,
    pub public_url: String,
    pub page_size: usize,
    pub operator_token: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
            public_url: DEFAULT_PUBLIC_URL.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            operator_token: None,
        }
    }
}

impl ChatConfig {
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let page_size = match get("BAKERY_CHAT_PAGE_SIZE") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    ChatError::Config(format!("BAKERY_CHAT_PAGE_SIZE must be a positive integer, got {:?}", raw))
                })?,
            None => defaults.page_size,
        };

        let config = Self {
            server_url: get("BAKERY_CHAT_SERVER_URL").unwrap_or(defaults.server_url),
            db_path: get("BAKERY_CHAT_DB_PATH").map(PathBuf::from).unwrap_or(defaults.db_path),
            upload_dir: get("BAKERY_CHAT_UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            public_url: get("BAKERY_CHAT_PUBLIC_URL").unwrap_or(defaults.public_url),
            page_size,
            operator_token: get("BAKERY_OPERATOR_TOKEN"),
        };

        info!(
            server_url = %config.server_url,
            db_path = %config.db_path.display(),
            page_size = config.page_size,
            operator = config.operator_token.is_some(),
            "Chat configuration loaded"
        );
        Ok(config)
    }
}
