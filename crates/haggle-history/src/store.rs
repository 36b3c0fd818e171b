//! Conversation store: chat history, item info cache, bargain counters.
//!
//! [`ConversationStore`] is the persistence seam; the routing and pipeline
//! layers never see SQL. The SQLite implementation keeps one table per
//! concern and trims nothing — reads apply the history limit.

use haggle_core::{ItemId, SessionId};
use rusqlite::{OptionalExtension, params};
use serde_json::Value;

use crate::connection::{ConnectionConfig, ConnectionPool, new_file, new_in_memory};
use crate::errors::Result;

/// Who authored a stored message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatRole {
    /// The buyer.
    User,
    /// The agent (or the seller replying manually).
    Assistant,
}

impl ChatRole {
    /// Stable string form used in the database and in prompts.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One persisted chat message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredMessage {
    /// Author role (`"user"` or `"assistant"`).
    pub role: String,
    /// Message text.
    pub content: String,
    /// RFC 3339 insert time.
    pub created_at: String,
}

/// Persistence contract for conversations, item info, and bargain state.
pub trait ConversationStore: Send + Sync {
    /// Append one message to a session's history.
    fn append_message(
        &self,
        session_id: &SessionId,
        user_id: &str,
        item_id: Option<&ItemId>,
        role: ChatRole,
        content: &str,
    ) -> Result<()>;

    /// The most recent `limit` messages, oldest first.
    fn history(&self, session_id: &SessionId, limit: usize) -> Result<Vec<StoredMessage>>;

    /// Cached item info, if any.
    fn item_info(&self, item_id: &ItemId) -> Result<Option<Value>>;

    /// Cache item info fetched from the marketplace API.
    fn save_item_info(&self, item_id: &ItemId, info: &Value) -> Result<()>;

    /// Bump and return the session's bargain counter.
    fn increment_bargain_count(&self, session_id: &SessionId) -> Result<u32>;

    /// Current bargain counter (0 when never bumped).
    fn bargain_count(&self, session_id: &SessionId) -> Result<u32>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS messages (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id  TEXT NOT NULL,
    user_id     TEXT NOT NULL,
    item_id     TEXT,
    role        TEXT NOT NULL,
    content     TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, id);

CREATE TABLE IF NOT EXISTS items (
    item_id     TEXT PRIMARY KEY,
    data        TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS bargains (
    session_id  TEXT PRIMARY KEY,
    count       INTEGER NOT NULL DEFAULT 0,
    updated_at  TEXT NOT NULL
);
";

/// SQLite-backed [`ConversationStore`].
pub struct SqliteStore {
    pool: ConnectionPool,
}

impl SqliteStore {
    /// Open (or create) a file-backed store.
    pub fn open(path: &str, config: &ConnectionConfig) -> Result<Self> {
        Self::from_pool(new_file(path, config)?)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        Self::from_pool(new_in_memory(&ConnectionConfig::default())?)
    }

    fn from_pool(pool: ConnectionPool) -> Result<Self> {
        let conn = pool.get()?;
        conn.execute_batch(SCHEMA)?;
        drop(conn);
        Ok(Self { pool })
    }
}

impl ConversationStore for SqliteStore {
    fn append_message(
        &self,
        session_id: &SessionId,
        user_id: &str,
        item_id: Option<&ItemId>,
        role: ChatRole,
        content: &str,
    ) -> Result<()> {
        let conn = self.pool.get()?;
        let now = chrono::Utc::now().to_rfc3339();
        let _ = conn.execute(
            "INSERT INTO messages (session_id, user_id, item_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session_id.as_str(),
                user_id,
                item_id.map(ItemId::as_str),
                role.as_str(),
                content,
                now,
            ],
        )?;
        Ok(())
    }

    fn history(&self, session_id: &SessionId, limit: usize) -> Result<Vec<StoredMessage>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT role, content, created_at FROM messages
             WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows = stmt
            .query_map(params![session_id.as_str(), limit], |row| {
                Ok(StoredMessage {
                    role: row.get(0)?,
                    content: row.get(1)?,
                    created_at: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.reverse();
        Ok(rows)
    }

    fn item_info(&self, item_id: &ItemId) -> Result<Option<Value>> {
        let conn = self.pool.get()?;
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM items WHERE item_id = ?1",
                params![item_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        match data {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn save_item_info(&self, item_id: &ItemId, info: &Value) -> Result<()> {
        let conn = self.pool.get()?;
        let now = chrono::Utc::now().to_rfc3339();
        let _ = conn.execute(
            "INSERT INTO items (item_id, data, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(item_id) DO UPDATE SET data = ?2, updated_at = ?3",
            params![item_id.as_str(), serde_json::to_string(info)?, now],
        )?;
        Ok(())
    }

    fn increment_bargain_count(&self, session_id: &SessionId) -> Result<u32> {
        let conn = self.pool.get()?;
        let now = chrono::Utc::now().to_rfc3339();
        let _ = conn.execute(
            "INSERT INTO bargains (session_id, count, updated_at) VALUES (?1, 1, ?2)
             ON CONFLICT(session_id) DO UPDATE SET count = count + 1, updated_at = ?2",
            params![session_id.as_str(), now],
        )?;
        let count: u32 = conn.query_row(
            "SELECT count FROM bargains WHERE session_id = ?1",
            params![session_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn bargain_count(&self, session_id: &SessionId) -> Result<u32> {
        let conn = self.pool.get()?;
        let count: Option<u32> = conn
            .query_row(
                "SELECT count FROM bargains WHERE session_id = ?1",
                params![session_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> SqliteStore {
        SqliteStore::in_memory().unwrap()
    }

    #[test]
    fn append_and_read_history() {
        let s = store();
        let sid = SessionId::from("chat-1");
        let item = ItemId::from("itm-1");

        s.append_message(&sid, "buyer-1", Some(&item), ChatRole::User, "在吗")
            .unwrap();
        s.append_message(&sid, "seller-1", Some(&item), ChatRole::Assistant, "在的")
            .unwrap();

        let history = s.history(&sid, 100).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, "user");
        assert_eq!(history[0].content, "在吗");
        assert_eq!(history[1].role, "assistant");
    }

    #[test]
    fn history_limit_keeps_most_recent_oldest_first() {
        let s = store();
        let sid = SessionId::from("chat-1");
        for i in 0..10 {
            s.append_message(&sid, "buyer-1", None, ChatRole::User, &format!("m{i}"))
                .unwrap();
        }

        let history = s.history(&sid, 3).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content, "m7");
        assert_eq!(history[2].content, "m9");
    }

    #[test]
    fn history_is_per_session() {
        let s = store();
        s.append_message(&SessionId::from("a"), "u", None, ChatRole::User, "for a")
            .unwrap();
        s.append_message(&SessionId::from("b"), "u", None, ChatRole::User, "for b")
            .unwrap();

        let history = s.history(&SessionId::from("a"), 100).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "for a");
    }

    #[test]
    fn history_empty_session() {
        let s = store();
        assert!(s.history(&SessionId::from("none"), 100).unwrap().is_empty());
    }

    #[test]
    fn item_info_roundtrip_and_overwrite() {
        let s = store();
        let item = ItemId::from("itm-9");
        assert!(s.item_info(&item).unwrap().is_none());

        s.save_item_info(&item, &json!({"title": "旧手机", "price": 500}))
            .unwrap();
        let info = s.item_info(&item).unwrap().unwrap();
        assert_eq!(info["price"], 500);

        s.save_item_info(&item, &json!({"title": "旧手机", "price": 450}))
            .unwrap();
        let info = s.item_info(&item).unwrap().unwrap();
        assert_eq!(info["price"], 450);
    }

    #[test]
    fn bargain_counter_increments_per_session() {
        let s = store();
        let a = SessionId::from("a");
        let b = SessionId::from("b");

        assert_eq!(s.bargain_count(&a).unwrap(), 0);
        assert_eq!(s.increment_bargain_count(&a).unwrap(), 1);
        assert_eq!(s.increment_bargain_count(&a).unwrap(), 2);
        assert_eq!(s.increment_bargain_count(&b).unwrap(), 1);
        assert_eq!(s.bargain_count(&a).unwrap(), 2);
        assert_eq!(s.bargain_count(&b).unwrap(), 1);
    }

    #[test]
    fn file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");
        let path = path.to_str().unwrap();

        {
            let s = SqliteStore::open(path, &ConnectionConfig::default()).unwrap();
            s.append_message(
                &SessionId::from("chat-1"),
                "buyer-1",
                None,
                ChatRole::User,
                "hello",
            )
            .unwrap();
        }

        let s = SqliteStore::open(path, &ConnectionConfig::default()).unwrap();
        let history = s.history(&SessionId::from("chat-1"), 100).unwrap();
        assert_eq!(history.len(), 1);
    }
}
