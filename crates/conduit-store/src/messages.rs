use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, now};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: i64,
    pub session_id: String,
    pub role: String,
    pub content: String,
    /// Persisted progress events (a JSON array), when any were kept.
    pub events: Option<serde_json::Value>,
    pub created_at: String,
}

pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a message. The session row must already exist.
    #[instrument(skip(self, content, events), fields(session_id = %session_id, role))]
    pub fn append(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
        events: Option<&serde_json::Value>,
    ) -> Result<i64, StoreError> {
        let events_json = events.map(serde_json::to_string).transpose()?;
        let ts = now();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (session_id, role, content, events, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![session_id, role, content, events_json, ts],
            )?;
            let id = conn.last_insert_rowid();
            conn.execute(
                "UPDATE sessions SET updated_at = ?2 WHERE id = ?1",
                params![session_id, ts],
            )?;
            Ok(id)
        })
    }

    pub fn list(&self, session_id: &str) -> Result<Vec<MessageRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, role, content, events, created_at
                 FROM messages WHERE session_id = ?1 ORDER BY id",
            )?;
            let mut rows = stmt.query([session_id])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let raw_events: Option<String> = row_helpers::get(row, 4, "messages", "events")?;
                out.push(MessageRow {
                    id: row_helpers::get(row, 0, "messages", "id")?,
                    session_id: row_helpers::get(row, 1, "messages", "session_id")?,
                    role: row_helpers::get(row, 2, "messages", "role")?,
                    content: row_helpers::get(row, 3, "messages", "content")?,
                    events: row_helpers::parse_json_opt(raw_events, "messages", "events")?,
                    created_at: row_helpers::get(row, 5, "messages", "created_at")?,
                });
            }
            Ok(out)
        })
    }

    pub fn count(&self, session_id: &str) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
                [session_id],
                |row| row.get(0),
            )?)
        })
    }

    pub fn count_user_messages(&self, session_id: &str) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE session_id = ?1 AND role = 'user'",
                [session_id],
                |row| row.get(0),
            )?)
        })
    }
}
