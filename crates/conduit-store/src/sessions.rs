use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, now};

pub const DEFAULT_TITLE: &str = "New Chat";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: String,
    pub title: String,
    pub mode: String,
    pub context_percent: f64,
    pub created_at: String,
    pub updated_at: String,
}

impl SessionRow {
    fn from_row(row: &rusqlite::Row<'_>) -> Result<Self, StoreError> {
        Ok(Self {
            id: row_helpers::get(row, 0, "sessions", "id")?,
            title: row_helpers::get(row, 1, "sessions", "title")?,
            mode: row_helpers::get(row, 2, "sessions", "mode")?,
            context_percent: row_helpers::get(row, 3, "sessions", "context_percent")?,
            created_at: row_helpers::get(row, 4, "sessions", "created_at")?,
            updated_at: row_helpers::get(row, 5, "sessions", "updated_at")?,
        })
    }
}

const SELECT_COLUMNS: &str =
    "SELECT id, title, mode, context_percent, created_at, updated_at FROM sessions";

pub struct SessionRepo {
    db: Database,
}

impl SessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create the session if it does not exist yet. Returns the stored row.
    #[instrument(skip(self), fields(session_id = %id, mode))]
    pub fn ensure(&self, id: &str, mode: &str, title: &str) -> Result<SessionRow, StoreError> {
        let ts = now();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO sessions (id, title, mode, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![id, title, mode, ts],
            )?;
            Ok(())
        })?;
        self.get(id)?
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))
    }

    pub fn get(&self, id: &str) -> Result<Option<SessionRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))?;
            let mut rows = stmt.query([id])?;
            match rows.next()? {
                Some(row) => Ok(Some(SessionRow::from_row(row)?)),
                None => Ok(None),
            }
        })
    }

    pub fn update_title(&self, id: &str, title: &str) -> Result<(), StoreError> {
        self.touch_with(id, "title = ?2", title)
    }

    pub fn update_context_percent(&self, id: &str, percent: f64) -> Result<(), StoreError> {
        self.touch_with(id, "context_percent = ?2", percent)
    }

    fn touch_with<V: rusqlite::ToSql>(
        &self,
        id: &str,
        set: &str,
        value: V,
    ) -> Result<(), StoreError> {
        let ts = now();
        self.db.with_conn(|conn| {
            let n = conn.execute(
                &format!("UPDATE sessions SET {set}, updated_at = ?3 WHERE id = ?1"),
                params![id, value, ts],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound(format!("session {id}")));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> SessionRepo {
        SessionRepo::new(Database::in_memory().unwrap())
    }

    #[test]
    fn ensure_is_idempotent() {
        let repo = repo();
        let a = repo.ensure("s1", "chat", DEFAULT_TITLE).unwrap();
        repo.update_title("s1", "Rust lifetimes").unwrap();
        let b = repo.ensure("s1", "chat", DEFAULT_TITLE).unwrap();
        assert_eq!(a.created_at, b.created_at);
        assert_eq!(b.title, "Rust lifetimes");
    }

    #[test]
    fn context_percent_starts_at_zero() {
        let repo = repo();
        let row = repo.ensure("s1", "chat", DEFAULT_TITLE).unwrap();
        assert_eq!(row.context_percent, 0.0);
        repo.update_context_percent("s1", 12.5).unwrap();
        assert_eq!(repo.get("s1").unwrap().unwrap().context_percent, 12.5);
    }

    #[test]
    fn update_missing_session_is_not_found() {
        let repo = repo();
        let err = repo.update_title("ghost", "x").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
