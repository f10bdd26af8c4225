//! Durable message log on SQLite.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};

use crate::error::{ChatError, Result};
use crate::models::{Attachment, ChatMessage};
use crate::utils::format_timestamp;

use super::log::MessageLog;
use super::SessionFilter;

const MESSAGE_COLUMNS: &str =
    "id, session_id, message, attachments, timestamp, is_customer_authored, read_by_operator";

fn db_err(e: rusqlite::Error) -> ChatError {
    ChatError::Transport(format!("message log: {}", e))
}

pub struct SqliteLog {
    conn: Connection,
}

impl SqliteLog {
    pub fn open(path: &Path) -> Result<Self> {
        Self::init(Connection::open(path).map_err(db_err)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().map_err(db_err)?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            -- seq keeps insertion order for equal timestamps
            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                session_id TEXT NOT NULL,
                message TEXT NOT NULL,
                attachments TEXT NOT NULL DEFAULT '[]',
                timestamp TEXT NOT NULL,
                is_customer_authored INTEGER NOT NULL,
                read_by_operator INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS session_metadata (
                session_id TEXT PRIMARY KEY,
                welcomed_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_session_ts ON messages(session_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_messages_ts ON messages(timestamp);
            ",
        )
        .map_err(db_err)?;
        Ok(Self { conn })
    }
}

/// Raw column values, converted to the domain type outside the rusqlite closure.
struct MessageRow {
    id: String,
    session_id: String,
    message: String,
    attachments: String,
    timestamp: String,
    is_customer_authored: bool,
    read_by_operator: bool,
}

impl MessageRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            message: row.get(2)?,
            attachments: row.get(3)?,
            timestamp: row.get(4)?,
            is_customer_authored: row.get::<_, i32>(5)? == 1,
            read_by_operator: row.get::<_, i32>(6)? == 1,
        })
    }

    fn into_message(self) -> Result<ChatMessage> {
        let attachments: Vec<Attachment> = serde_json::from_str(&self.attachments)
            .map_err(|e| ChatError::Transport(format!("invalid attachments on {}: {}", self.id, e)))?;
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| ChatError::Transport(format!("invalid timestamp on {}: {}", self.id, e)))?
            .with_timezone(&Utc);
        Ok(ChatMessage {
            id: self.id,
            session_id: self.session_id,
            message: self.message,
            attachments,
            timestamp,
            is_customer_authored: self.is_customer_authored,
            read_by_operator: self.read_by_operator,
        })
    }
}

impl MessageLog for SqliteLog {
    fn insert(&mut self, message: ChatMessage) -> Result<()> {
        let attachments = serde_json::to_string(&message.attachments)?;
        self.conn
            .execute(
                "INSERT INTO messages (id, session_id, message, attachments, timestamp, is_customer_authored, read_by_operator)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                (
                    &message.id,
                    &message.session_id,
                    &message.message,
                    &attachments,
                    format_timestamp(&message.timestamp),
                    message.is_customer_authored as i32,
                    message.read_by_operator as i32,
                ),
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn query(&self, filter: &SessionFilter) -> Result<Vec<ChatMessage>> {
        // SQLite treats a negative LIMIT as unbounded
        let limit = filter
            .effective_limit()
            .and_then(|l| i64::try_from(l).ok())
            .unwrap_or(-1);

        let rows: Vec<MessageRow> = match &filter.session_id {
            Some(session_id) => {
                let mut stmt = self
                    .conn
                    .prepare(&format!(
                        "SELECT {cols} FROM (
                             SELECT seq, {cols} FROM messages
                             WHERE session_id = ?1
                             ORDER BY timestamp DESC, seq DESC
                             LIMIT ?2
                         )
                         ORDER BY timestamp ASC, seq ASC",
                        cols = MESSAGE_COLUMNS
                    ))
                    .map_err(db_err)?;
                let rows = stmt
                    .query_map((session_id, limit), MessageRow::from_row)
                    .map_err(db_err)?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(db_err)?;
                rows
            }
            None => {
                let mut stmt = self
                    .conn
                    .prepare(&format!(
                        "SELECT {} FROM messages ORDER BY timestamp DESC, seq DESC LIMIT ?1",
                        MESSAGE_COLUMNS
                    ))
                    .map_err(db_err)?;
                let rows = stmt
                    .query_map([limit], MessageRow::from_row)
                    .map_err(db_err)?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(db_err)?;
                rows
            }
        };

        rows.into_iter().map(MessageRow::into_message).collect()
    }

    fn get(&self, message_id: &str) -> Result<Option<ChatMessage>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS),
                [message_id],
                MessageRow::from_row,
            )
            .optional()
            .map_err(db_err)?;
        row.map(MessageRow::into_message).transpose()
    }

    fn set_read(&mut self, message_id: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE messages SET read_by_operator = 1 WHERE id = ?1 AND read_by_operator = 0",
                [message_id],
            )
            .map_err(db_err)?;
        if changed > 0 {
            return Ok(true);
        }
        match self.get(message_id)? {
            Some(_) => Ok(false),
            None => Err(ChatError::NotFound(format!("Message {}", message_id))),
        }
    }

    fn delete_session(&mut self, session_id: &str) -> Result<usize> {
        let tx = self.conn.transaction().map_err(db_err)?;
        let deleted = tx
            .execute("DELETE FROM messages WHERE session_id = ?1", [session_id])
            .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(deleted)
    }

    fn is_welcomed(&self, session_id: &str) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM session_metadata WHERE session_id = ?1)",
                [session_id],
                |row| row.get(0),
            )
            .map_err(db_err)
    }

    fn mark_welcomed(&mut self, session_id: &str) -> Result<bool> {
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO session_metadata (session_id, welcomed_at) VALUES (?1, ?2)",
                (session_id, Utc::now().timestamp_millis()),
            )
            .map_err(db_err)?;
        Ok(inserted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::msg;

    fn ids(messages: &[ChatMessage]) -> Vec<String> {
        messages.iter().map(|m| m.id.clone()).collect()
    }

    #[test]
    fn test_round_trip_preserves_fields() {
        let mut log = SqliteLog::open_in_memory().unwrap();
        let mut original = msg("a", "s1", 1, true);
        original.attachments.push(Attachment {
            name: "cake.png".to_string(),
            media_type: "image/png".to_string(),
            url: "https://cdn.example/cake.png".to_string(),
            size_bytes: Some(1024),
        });
        log.insert(original.clone()).unwrap();
        assert_eq!(log.get("a").unwrap(), Some(original));
        assert_eq!(log.get("missing").unwrap(), None);
    }

    #[test]
    fn test_ordering_matches_memory_log() {
        let mut log = SqliteLog::open_in_memory().unwrap();
        log.insert(msg("b", "s1", 20, true)).unwrap();
        log.insert(msg("a", "s1", 10, true)).unwrap();
        log.insert(msg("x", "s2", 15, true)).unwrap();
        log.insert(msg("tie", "s1", 20, false)).unwrap();

        assert_eq!(ids(&log.query(&SessionFilter::session("s1")).unwrap()), vec!["a", "b", "tie"]);
        assert_eq!(ids(&log.query(&SessionFilter::all()).unwrap()), vec!["tie", "b", "x", "a"]);
    }

    #[test]
    fn test_session_cap_keeps_newest() {
        let mut log = SqliteLog::open_in_memory().unwrap();
        for i in 0..8 {
            log.insert(msg(&format!("m{}", i), "s1", i, true)).unwrap();
        }
        let result = log.query(&SessionFilter::session("s1").with_limit(3)).unwrap();
        assert_eq!(ids(&result), vec!["m5", "m6", "m7"]);
    }

    #[test]
    fn test_set_read_and_delete() {
        let mut log = SqliteLog::open_in_memory().unwrap();
        log.insert(msg("a", "s1", 1, true)).unwrap();
        log.insert(msg("b", "s2", 2, true)).unwrap();

        assert!(log.set_read("a").unwrap());
        assert!(!log.set_read("a").unwrap());
        assert!(matches!(log.set_read("zzz"), Err(ChatError::NotFound(_))));

        assert_eq!(log.delete_session("s1").unwrap(), 1);
        assert!(log.query(&SessionFilter::session("s1")).unwrap().is_empty());
        assert_eq!(log.query(&SessionFilter::all()).unwrap().len(), 1);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.db");
        {
            let mut log = SqliteLog::open(&path).unwrap();
            log.insert(msg("a", "s1", 1, true)).unwrap();
            assert!(log.mark_welcomed("s1").unwrap());
        }
        let mut log = SqliteLog::open(&path).unwrap();
        assert_eq!(log.query(&SessionFilter::all()).unwrap().len(), 1);
        assert!(log.is_welcomed("s1").unwrap());
        assert!(!log.is_welcomed("s2").unwrap());
        assert!(!log.mark_welcomed("s1").unwrap());
    }
}
