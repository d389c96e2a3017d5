use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use aaflow_core::error::{AaflowError, Result};
use aaflow_core::traits::ContextStore;
use aaflow_core::types::Context;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS contexts (
    id TEXT PRIMARY KEY,
    document TEXT NOT NULL,
    updated_at TEXT NOT NULL
);";

fn db_err(e: impl std::fmt::Display) -> AaflowError {
    AaflowError::Database(e.to_string())
}

/// SQLite-backed store holding one JSON document per context id.
pub struct SqliteContextStore {
    conn: Mutex<Connection>,
}

impl SqliteContextStore {
    /// Open or create a database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AaflowError::Database(format!("Failed to create db directory: {}", e)))?;
        }

        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "Context store ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, for tests and throwaway runs.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Ids of every stored context, most recently saved first.
    pub fn ids(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().map_err(db_err)?;
        let mut stmt = conn
            .prepare("SELECT id FROM contexts ORDER BY updated_at DESC, id")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db_err)
    }

    /// Delete a stored context. Returns whether anything was removed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().map_err(db_err)?;
        let changed = conn
            .execute("DELETE FROM contexts WHERE id = ?1", params![id])
            .map_err(db_err)?;
        Ok(changed > 0)
    }
}

impl ContextStore for SqliteContextStore {
    fn load<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<Context>>> {
        Box::pin(async move {
            let document: Option<String> = {
                let conn = self.conn.lock().map_err(db_err)?;
                conn.query_row(
                    "SELECT document FROM contexts WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?
            };

            match document {
                Some(doc) => Ok(Some(serde_json::from_str(&doc)?)),
                None => Ok(None),
            }
        })
    }

    fn save<'a>(&'a self, id: &'a str, ctx: &'a Context) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let document = serde_json::to_string(ctx)?;
            let conn = self.conn.lock().map_err(db_err)?;
            conn.execute(
                "INSERT INTO contexts (id, document, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET document = excluded.document,
                                               updated_at = excluded.updated_at",
                params![id, document, Utc::now().to_rfc3339()],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }
}
