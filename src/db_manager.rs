//! SQLite-backed title store.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{StoreError, StoreResult};
use crate::title_record::{TitleId, TitleRecord};
use crate::title_store::TitleStore;

pub struct DbManager {
    conn: Mutex<Connection>,
}

impl DbManager {
    /// Default database location under the user data directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join("title-critic").join("titles.db"))
    }

    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        let db_manager = Self {
            conn: Mutex::new(conn),
        };
        db_manager.initialize_schema()?;
        Ok(db_manager)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn initialize_schema(&self) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS titles (
                title_id INTEGER PRIMARY KEY,
                record_json TEXT NOT NULL,
                updated_unix_ms INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    fn now_unix_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_millis() as i64)
            .unwrap_or(0)
    }
}

impl TitleStore for DbManager {
    fn get_title(&self, title_id: TitleId) -> StoreResult<Option<TitleRecord>> {
        let conn = self.lock()?;
        let record_json: Option<String> = conn
            .query_row(
                "SELECT record_json FROM titles WHERE title_id = ?1",
                params![title_id.0 as i64],
                |row| row.get(0),
            )
            .optional()?;
        match record_json {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    fn put_titles(&self, entries: &[(TitleId, TitleRecord)]) -> StoreResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let now_unix_ms = Self::now_unix_ms();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO titles (title_id, record_json, updated_unix_ms) VALUES (?1, ?2, ?3)
                 ON CONFLICT(title_id) DO UPDATE SET
                    record_json = excluded.record_json,
                    updated_unix_ms = excluded.updated_unix_ms",
            )?;
            for (title_id, record) in entries {
                let record_json = serde_json::to_string(record)?;
                stmt.execute(params![title_id.0 as i64, record_json, now_unix_ms])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn set_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn title_count(&self) -> StoreResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM titles", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }
}
