use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::config::ChatConfig;
use crate::error::{ChatError, Result};

/// Durable client-local key-value storage (the browser's local storage in the
/// storefront). Values are plain strings; JSON helpers sit on top.
pub struct ClientStorage(Mutex<Connection>);

impl ClientStorage {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| ChatError::Storage(format!("Failed to create {}: {}", parent.display(), e)))?;
        }
        Self::init(Connection::open(path)?)
    }

    /// Open the configured `db_path`.
    pub fn from_config(config: &ChatConfig) -> Result<Self> {
        Self::open(&config.db_path)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS local_storage (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            ",
        )?;
        Ok(Self(Mutex::new(conn)))
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.0.lock().map_err(|e| ChatError::Storage(e.to_string()))
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM local_storage WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO local_storage (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            (key, value, now),
        )?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM local_storage WHERE key = ?1", [key])?;
        Ok(())
    }

    /// Read and delete in one transaction, so a value is handed out at most once.
    pub fn take(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let value: Option<String> = tx
            .query_row(
                "SELECT value FROM local_storage WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        if value.is_some() {
            tx.execute("DELETE FROM local_storage WHERE key = ?1", [key])?;
        }
        tx.commit()?;
        Ok(value)
    }

    /// Insert only when the key is absent; returns the value now stored.
    pub fn get_or_insert_with<F>(&self, key: &str, make: F) -> Result<String>
    where
        F: FnOnce() -> String,
    {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let existing: Option<String> = tx
            .query_row(
                "SELECT value FROM local_storage WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        let value = match existing.filter(|v| !v.trim().is_empty()) {
            Some(v) => v,
            None => {
                let v = make();
                tx.execute(
                    "INSERT OR REPLACE INTO local_storage (key, value, updated_at) VALUES (?1, ?2, ?3)",
                    (key, &v, chrono::Utc::now().timestamp_millis()),
                )?;
                v
            }
        };
        tx.commit()?;
        Ok(value)
    }

    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)
            .map_err(|e| ChatError::Storage(format!("Failed to serialize {}: {}", key, e)))?;
        self.set(key, &json)
    }

    /// Take a JSON value. A corrupt entry is dropped and reported as absent.
    pub fn take_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.take(key)? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    warn!(key, error = %e, "Discarding unreadable local storage entry");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let config = ChatConfig {
            db_path: dir.path().join("device").join("chat.db"),
            ..ChatConfig::default()
        };

        ClientStorage::from_config(&config).unwrap().set("k", "v").unwrap();
        let reopened = ClientStorage::from_config(&config).unwrap();
        assert_eq!(reopened.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_set_get_remove() {
        let storage = ClientStorage::open_in_memory().unwrap();
        assert_eq!(storage.get("k").unwrap(), None);

        storage.set("k", "v1").unwrap();
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("v1"));

        storage.set("k", "v2").unwrap();
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("v2"));

        storage.remove("k").unwrap();
        assert_eq!(storage.get("k").unwrap(), None);
    }

    #[test]
    fn test_take_hands_out_once() {
        let storage = ClientStorage::open_in_memory().unwrap();
        storage.set("once", "value").unwrap();
        assert_eq!(storage.take("once").unwrap().as_deref(), Some("value"));
        assert_eq!(storage.take("once").unwrap(), None);
    }

    #[test]
    fn test_get_or_insert_keeps_existing() {
        let storage = ClientStorage::open_in_memory().unwrap();
        let first = storage.get_or_insert_with("id", || "first".to_string()).unwrap();
        let second = storage.get_or_insert_with("id", || "second".to_string()).unwrap();
        assert_eq!(first, "first");
        assert_eq!(second, "first");
    }

    #[test]
    fn test_corrupt_json_is_dropped() {
        let storage = ClientStorage::open_in_memory().unwrap();
        storage.set("bad", "{not json").unwrap();
        let value: Option<Vec<u32>> = storage.take_json("bad").unwrap();
        assert!(value.is_none());
        assert_eq!(storage.get("bad").unwrap(), None);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("local.db");
        {
            let storage = ClientStorage::open(&path).unwrap();
            storage.set("chatSessionId", "abc").unwrap();
        }
        let storage = ClientStorage::open(&path).unwrap();
        assert_eq!(storage.get("chatSessionId").unwrap().as_deref(), Some("abc"));
    }
}
