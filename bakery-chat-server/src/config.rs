use std::path::PathBuf;

use bakery_chat::{ChatError, Result};
use tracing::{info, warn};

const DEFAULT_ADDR: &str = "0.0.0.0:9001";

/// Greeting posted the first time a customer opens a session
pub const DEFAULT_WELCOME: &str = "Welcome to LAIM Bakery & Pastry! How can we help you today?";

/// Server settings from the environment (and `.env` when present).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: String,
    /// SQLite message log; in-memory when unset
    pub log_db: Option<PathBuf>,
    /// Operators are refused when unset
    pub operator_token: Option<String>,
    /// `None` disables the greeting
    pub welcome: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            log_db: None,
            operator_token: None,
            welcome: Some(DEFAULT_WELCOME.to_string()),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// `BAKERY_CHAT_WELCOME=off` turns the greeting off.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let addr = get("BAKERY_CHAT_ADDR").unwrap_or(defaults.addr);
        if !addr.contains(':') {
            return Err(ChatError::Config(format!(
                "BAKERY_CHAT_ADDR must be host:port, got {:?}",
                addr
            )));
        }

        let welcome = match get("BAKERY_CHAT_WELCOME") {
            Some(text) if text.eq_ignore_ascii_case("off") => None,
            Some(text) => Some(text),
            None => defaults.welcome,
        };

        let config = Self {
            addr,
            log_db: get("BAKERY_CHAT_LOG_DB").map(PathBuf::from),
            operator_token: get("BAKERY_OPERATOR_TOKEN"),
            welcome,
        };

        if config.operator_token.is_none() {
            warn!("BAKERY_OPERATOR_TOKEN is not set, operator connections will be refused");
        }
        info!(
            addr = %config.addr,
            durable = config.log_db.is_some(),
            welcome = config.welcome.is_some(),
            "Server configuration loaded"
        );
        Ok(config)
    }
}
