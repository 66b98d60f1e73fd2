//! SQLite-backed conversation log
//!
//! Every call runs on the blocking pool behind a single connection mutex;
//! row ids are monotonic per database and define chronological order.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

use super::models::StoredMessage;
use crate::error::{ChatError, Result};
use crate::llm::Role;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS chat_memory (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_chat_memory_user ON chat_memory (user_id, id);
CREATE TABLE IF NOT EXISTS chat_summary (
    user_id TEXT PRIMARY KEY,
    summary TEXT NOT NULL,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
);
";

/// Persistent per-user chat history plus rolling summaries
#[derive(Clone)]
pub struct ConversationStore {
    conn: Arc<Mutex<Connection>>,
}

impl ConversationStore {
    /// Open (or create) the database file and ensure the schema exists
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = tokio::task::spawn_blocking(move || Connection::open(&path)).await??;
        let store = Self::from_connection(conn);
        store.initialize().await?;
        info!("Conversation store ready");
        Ok(store)
    }

    /// Private in-memory database, mostly for tests
    pub async fn open_in_memory() -> Result<Self> {
        let store = Self::from_connection(Connection::open_in_memory()?);
        store.initialize().await?;
        Ok(store)
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut guard)
        })
        .await?
    }

    /// Create tables and indexes if missing
    pub async fn initialize(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
    }

    /// Append one message and return its row id
    pub async fn save(&self, user_id: &str, role: Role, content: &str) -> Result<i64> {
        let user_id = user_id.to_string();
        let content = content.to_string();
        self.with_conn(move |conn| insert_message(conn, &user_id, role, &content))
            .await
    }

    /// Store a user turn and the assistant reply atomically
    pub async fn save_exchange(
        &self,
        user_id: &str,
        user_text: &str,
        assistant_text: &str,
    ) -> Result<()> {
        let user_id = user_id.to_string();
        let user_text = user_text.to_string();
        let assistant_text = assistant_text.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            insert_message(&tx, &user_id, Role::User, &user_text)?;
            insert_message(&tx, &user_id, Role::Assistant, &assistant_text)?;
            tx.commit()?;
            debug!("Stored exchange for user {}", user_id);
            Ok(())
        })
        .await
    }

    /// Newest `limit` messages, oldest first
    pub async fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<StoredMessage>> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, role, content, timestamp FROM chat_memory
                 WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2",
            )?;
            let mut rows = stmt
                .query_map(params![user_id, limit as i64], read_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?
                .into_iter()
                .collect::<Result<Vec<_>>>()?;
            rows.reverse();
            Ok(rows)
        })
        .await
    }

    /// Every stored message of the user, oldest first
    pub async fn history(&self, user_id: &str) -> Result<Vec<StoredMessage>> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, role, content, timestamp FROM chat_memory
                 WHERE user_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map(params![user_id], read_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().collect()
        })
        .await
    }

    pub async fn count(&self, user_id: &str) -> Result<usize> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM chat_memory WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
    }

    pub async fn summary(&self, user_id: &str) -> Result<Option<String>> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let summary: Option<String> = conn
                .query_row(
                    "SELECT summary FROM chat_summary WHERE user_id = ?1",
                    params![user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(summary)
        })
        .await
    }

    /// Replace the user's summary and drop the rows it covers (`id <= through_id`).
    /// Returns the number of rows removed.
    pub async fn compact(&self, user_id: &str, summary: &str, through_id: i64) -> Result<usize> {
        let user_id = user_id.to_string();
        let summary = summary.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO chat_summary (user_id, summary, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET summary = excluded.summary,
                 updated_at = excluded.updated_at",
                params![user_id, summary, Utc::now().to_rfc3339()],
            )?;
            let removed = tx.execute(
                "DELETE FROM chat_memory WHERE user_id = ?1 AND id <= ?2",
                params![user_id, through_id],
            )?;
            tx.commit()?;
            Ok(removed)
        })
        .await
    }

    /// Forget a user entirely. Returns the number of message rows removed.
    pub async fn clear(&self, user_id: &str) -> Result<usize> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute("DELETE FROM chat_memory WHERE user_id = ?1", params![user_id])?;
            tx.execute("DELETE FROM chat_summary WHERE user_id = ?1", params![user_id])?;
            tx.commit()?;
            Ok(removed)
        })
        .await
    }
}

fn insert_message(conn: &Connection, user_id: &str, role: Role, content: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO chat_memory (user_id, role, content, timestamp) VALUES (?1, ?2, ?3, ?4)",
        params![user_id, role.as_str(), content, Utc::now().to_rfc3339()],
    )?;
    Ok(conn.last_insert_rowid())
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<Result<StoredMessage>> {
    let id: i64 = row.get(0)?;
    let user_id: String = row.get(1)?;
    let role: String = row.get(2)?;
    let content: String = row.get(3)?;
    let timestamp: Option<String> = row.get(4)?;

    Ok(decode_message(id, user_id, &role, content, timestamp.as_deref()))
}

fn decode_message(
    id: i64,
    user_id: String,
    role: &str,
    content: String,
    timestamp: Option<&str>,
) -> Result<StoredMessage> {
    let role = role
        .parse::<Role>()
        .map_err(|e| ChatError::Storage(format!("row {}: {}", id, e)))?;

    Ok(StoredMessage {
        id,
        user_id,
        role,
        content,
        timestamp: timestamp.map(parse_timestamp).unwrap_or_else(Utc::now),
    })
}

/// Accepts our RFC 3339 values and SQLite's `CURRENT_TIMESTAMP` format
fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|naive| naive.and_utc())
        })
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let store = ConversationStore::open_in_memory().await.unwrap();
        store.initialize().await.unwrap();
        store.initialize().await.unwrap();
        assert_eq!(store.count("nobody").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_recent_returns_newest_in_chronological_order() {
        let store = ConversationStore::open_in_memory().await.unwrap();
        for i in 0..5 {
            store.save("alice", Role::User, &format!("m{}", i)).await.unwrap();
        }

        let recent = store.recent("alice", 3).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_users_are_isolated() {
        let store = ConversationStore::open_in_memory().await.unwrap();
        store.save_exchange("alice", "hi", "hello alice").await.unwrap();
        store.save_exchange("bob", "yo", "hello bob").await.unwrap();

        let alice = store.history("alice").await.unwrap();
        assert_eq!(alice.len(), 2);
        assert!(alice.iter().all(|m| m.user_id == "alice"));
        assert_eq!(alice[0].role, Role::User);
        assert_eq!(alice[1].role, Role::Assistant);
        assert_eq!(store.count("bob").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_compact_removes_covered_rows_and_sets_summary() {
        let store = ConversationStore::open_in_memory().await.unwrap();
        let mut ids = Vec::new();
        for i in 0..6 {
            ids.push(store.save("alice", Role::User, &format!("m{}", i)).await.unwrap());
        }

        let removed = store.compact("alice", "talked about m0..m3", ids[3]).await.unwrap();
        assert_eq!(removed, 4);

        let left = store.history("alice").await.unwrap();
        let contents: Vec<_> = left.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m4", "m5"]);
        assert_eq!(
            store.summary("alice").await.unwrap().as_deref(),
            Some("talked about m0..m3")
        );

        store.compact("alice", "newer summary", ids[4]).await.unwrap();
        assert_eq!(store.summary("alice").await.unwrap().as_deref(), Some("newer summary"));
    }

    #[tokio::test]
    async fn test_clear_removes_rows_and_summary() {
        let store = ConversationStore::open_in_memory().await.unwrap();
        let id = store.save("alice", Role::User, "hi").await.unwrap();
        store.save("alice", Role::Assistant, "hello").await.unwrap();
        store.compact("alice", "s", id).await.unwrap();

        assert_eq!(store.clear("alice").await.unwrap(), 1);
        assert_eq!(store.count("alice").await.unwrap(), 0);
        assert!(store.summary("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_role_is_storage_error() {
        let store = ConversationStore::open_in_memory().await.unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO chat_memory (user_id, role, content) VALUES ('alice', 'tool', 'x')",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let result = store.history("alice").await;
        assert!(matches!(result, Err(ChatError::Storage(_))));
    }

    #[tokio::test]
    async fn test_reopen_file_keeps_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat_memory.db");

        {
            let store = ConversationStore::open(&path).await.unwrap();
            store.save_exchange("alice", "remember me", "I will").await.unwrap();
        }

        let store = ConversationStore::open(&path).await.unwrap();
        let history = store.history("alice").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "remember me");
    }

    #[test]
    fn test_parse_sqlite_default_timestamp() {
        let ts = parse_timestamp("2024-03-01 12:30:00");
        assert_eq!(ts.to_rfc3339(), "2024-03-01T12:30:00+00:00");
    }
}
