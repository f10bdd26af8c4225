use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bakery_chat::protocol::Role;
use bakery_chat::store::{LiveStore, MemoryLog, SqliteLog};
use bakery_chat::{ChatError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{info, warn};

use crate::config::ServerConfig;

/// A live connection, for bookkeeping and logs
#[derive(Debug, Clone)]
pub struct ConnectedClient {
    pub role: Role,
    pub connected_at: DateTime<Utc>,
}

/// Server state shared by every connection: the canonical message log and
/// the set of authenticated connections.
pub struct ServerState {
    pub store: Arc<LiveStore>,
    operator_token: Option<String>,
    welcome: Option<String>,
    clients: DashMap<u64, ConnectedClient>,
    next_client_id: AtomicU64,
}

impl ServerState {
    pub fn new(store: Arc<LiveStore>, operator_token: Option<String>, welcome: Option<String>) -> Self {
        Self {
            store,
            operator_token,
            welcome,
            clients: DashMap::new(),
            next_client_id: AtomicU64::new(1),
        }
    }

    /// Open the configured log (SQLite when a path is set) and build the state.
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let store = match &config.log_db {
            Some(path) => {
                info!(path = %path.display(), "Using SQLite message log");
                LiveStore::new(SqliteLog::open(path)?)
            }
            None => {
                warn!("BAKERY_CHAT_LOG_DB not set, messages are kept in memory only");
                LiveStore::new(MemoryLog::new())
            }
        };
        Ok(Self::new(
            Arc::new(store),
            config.operator_token.clone(),
            config.welcome.clone(),
        ))
    }

    /// Check a `connect` frame. Customers are anonymous; operators must
    /// present the configured token.
    pub fn authenticate(&self, role: Role, token: Option<&str>) -> Result<()> {
        match role {
            Role::Customer => Ok(()),
            Role::Operator => match (&self.operator_token, token) {
                (None, _) => Err(ChatError::Forbidden(
                    "Operator access is not configured on this server".to_string(),
                )),
                (Some(_), None) => Err(ChatError::Forbidden("No token provided".to_string())),
                (Some(expected), Some(given)) if expected == given => Ok(()),
                (Some(_), Some(_)) => Err(ChatError::Forbidden("Invalid token".to_string())),
            },
        }
    }

    pub fn welcome(&self) -> Option<&str> {
        self.welcome.as_deref()
    }

    /// Register an authenticated connection and return its id.
    pub fn add_client(&self, role: Role) -> u64 {
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        self.clients.insert(
            id,
            ConnectedClient {
                role,
                connected_at: Utc::now(),
            },
        );
        id
    }

    pub fn remove_client(&self, id: u64) -> Option<ConnectedClient> {
        self.clients.remove(&id).map(|(_, client)| client)
    }

    /// Number of live connections with the given role
    pub fn connected(&self, role: Role) -> usize {
        self.clients.iter().filter(|e| e.value().role == role).count()
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new(Arc::new(LiveStore::in_memory()), None, None)
    }
}
