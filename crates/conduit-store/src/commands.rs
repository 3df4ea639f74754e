use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, now};

/// A named, reusable prompt fragment referenced as `{{cmd:name}}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandRow {
    pub id: i64,
    pub name: String,
    pub content: String,
    pub created_at: String,
}

impl CommandRow {
    fn from_row(row: &rusqlite::Row<'_>) -> Result<Self, StoreError> {
        Ok(Self {
            id: row_helpers::get(row, 0, "commands", "id")?,
            name: row_helpers::get(row, 1, "commands", "name")?,
            content: row_helpers::get(row, 2, "commands", "content")?,
            created_at: row_helpers::get(row, 3, "commands", "created_at")?,
        })
    }
}

pub struct CommandRepo {
    db: Database,
}

impl CommandRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn list(&self) -> Result<Vec<CommandRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, name, content, created_at FROM commands ORDER BY name")?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(CommandRow::from_row(row)?);
            }
            Ok(out)
        })
    }

    pub fn get_by_name(&self, name: &str) -> Result<Option<CommandRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, name, content, created_at FROM commands WHERE name = ?1")?;
            let mut rows = stmt.query([name])?;
            match rows.next()? {
                Some(row) => Ok(Some(CommandRow::from_row(row)?)),
                None => Ok(None),
            }
        })
    }

    pub fn create(&self, name: &str, content: &str) -> Result<CommandRow, StoreError> {
        let ts = now();
        self.db.with_conn(|conn| {
            let res = conn.execute(
                "INSERT INTO commands (name, content, created_at) VALUES (?1, ?2, ?3)",
                params![name, content, ts],
            );
            match res {
                Ok(_) => Ok(CommandRow {
                    id: conn.last_insert_rowid(),
                    name: name.to_string(),
                    content: content.to_string(),
                    created_at: ts.clone(),
                }),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::Conflict(format!("command {name} already exists")))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn delete(&self, id: i64) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let n = conn.execute("DELETE FROM commands WHERE id = ?1", [id])?;
            Ok(n > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_lookup_delete() {
        let repo = CommandRepo::new(Database::in_memory().unwrap());
        let cmd = repo.create("review", "Review this diff.").unwrap();
        assert_eq!(repo.get_by_name("review").unwrap().unwrap().id, cmd.id);

        assert_eq!(repo.get_by_name("review").unwrap().unwrap().content, "Review this diff.");

        assert!(repo.delete(cmd.id).unwrap());
        assert!(repo.get_by_name("review").unwrap().is_none());
        assert!(!repo.delete(cmd.id).unwrap());
    }

    #[test]
    fn duplicate_name_conflicts() {
        let repo = CommandRepo::new(Database::in_memory().unwrap());
        repo.create("x", "1").unwrap();
        assert!(matches!(repo.create("x", "2"), Err(StoreError::Conflict(_))));
        assert_eq!(repo.list().unwrap().len(), 1);
    }
}
