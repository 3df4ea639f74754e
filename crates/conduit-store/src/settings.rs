use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::StoreError;

/// String key/value table for runtime state (agent session tokens,
/// the tool server table).
pub struct SettingsRepo {
    db: Database,
}

impl SettingsRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| row.get(0))
                .optional()?)
        })
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
    }

    /// Read a JSON-encoded value.
    pub fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        self.get(key)?
            .map(|raw| serde_json::from_str(&raw).map_err(StoreError::from))
            .transpose()
    }

    pub fn set_json<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        self.set(key, &serde_json::to_string(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn set_overwrites() {
        let repo = SettingsRepo::new(Database::in_memory().unwrap());
        assert_eq!(repo.get("k").unwrap(), None);
        repo.set("k", "1").unwrap();
        repo.set("k", "2").unwrap();
        assert_eq!(repo.get("k").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn json_values() {
        let repo = SettingsRepo::new(Database::in_memory().unwrap());
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), vec![1, 2]);
        repo.set_json("servers", &map).unwrap();
        let back: BTreeMap<String, Vec<i32>> = repo.get_json("servers").unwrap().unwrap();
        assert_eq!(back, map);

        repo.set("broken", "{").unwrap();
        assert!(repo.get_json::<BTreeMap<String, i32>>("broken").is_err());
    }
}
