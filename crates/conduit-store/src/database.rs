use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::info;

use crate::error::StoreError;
use crate::schema;

/// Shared handle to the conduit database. Clones share one connection;
/// every repo call holds the lock for the length of its closure.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open `path`, creating parent directories and the schema as needed.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Io(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let db = Self::prepare(Connection::open(path)?)?;
        info!(path = %path.display(), "database ready");
        Ok(db)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(schema::PRAGMAS)?;
        conn.execute_batch(schema::CREATE_TABLES)?;
        // Stamp the version once; reopening an existing file leaves it alone.
        conn.execute(
            "INSERT INTO schema_version (version)
             SELECT ?1 WHERE NOT EXISTS (SELECT 1 FROM schema_version)",
            [schema::SCHEMA_VERSION],
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        f(&self.conn.lock())
    }
}
