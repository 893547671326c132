//! SQLite-backed Local Store
//!
//! Storage location: `~/.local/share/helpline/helpline.db` (configurable via `Config`)

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::error::{StorageError, StorageResult};
use super::schema::init_schema;
use super::KeyValueBackend;
use crate::config::Config;

/// Local Store persisted in a SQLite database
///
/// The connection sits behind a mutex; every read and write is a single
/// statement, so writes to the same key land in issue order.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) the store at the configured path
    pub fn open(config: &Config) -> StorageResult<Self> {
        Self::open_path(&config.sqlite_path())
    }

    /// Open (or create) the store at an explicit path
    pub fn open_path(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| StorageError::at_path(e, parent.to_path_buf()))?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        init_schema(&conn)?;

        debug!("Opened local store at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a throwaway in-memory database
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Database file path, if file-backed
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of cached keys
    pub fn key_count(&self) -> StorageResult<usize> {
        let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM kv", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl KeyValueBackend for SqliteStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn put(&self, key: &str, value: &str) -> StorageResult<()> {
        let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
        conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Message, Sender, Thread, ThreadStatus};
    use crate::storage::LocalStore;
    use tempfile::TempDir;

    #[test]
    fn test_threads_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("helpline.db");

        {
            let store = SqliteStore::open_path(&path).unwrap();
            let mut closed = Thread::new("t-2", "Refund");
            closed.status = ThreadStatus::Closed;
            store
                .save_threads(&[Thread::new("t-1", "Login"), closed])
                .unwrap();
            store.save_selected_thread("t-2").unwrap();
        }

        let store = SqliteStore::open_path(&path).unwrap();
        let threads = store.load_threads().unwrap().unwrap();
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[1].status, ThreadStatus::Closed);
        assert_eq!(store.load_selected_thread().unwrap().as_deref(), Some("t-2"));
    }

    #[test]
    fn test_messages_partitioned_by_thread() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = chrono::Utc::now();

        store
            .save_messages("a", &[Message::new("a", Sender::User, "one", now)])
            .unwrap();
        store
            .save_messages(
                "b",
                &[
                    Message::new("b", Sender::User, "two", now),
                    Message::new("b", Sender::Agent, "three", now),
                ],
            )
            .unwrap();

        assert_eq!(store.load_messages("a").unwrap().unwrap().len(), 1);
        assert_eq!(store.load_messages("b").unwrap().unwrap().len(), 2);
        assert_eq!(store.key_count().unwrap(), 2);
    }

    #[test]
    fn test_overwrite_same_key() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.save_threads(&[Thread::new("t-1", "first")]).unwrap();
        store.save_threads(&[]).unwrap();

        assert_eq!(store.load_threads().unwrap(), Some(vec![]));
        assert_eq!(store.key_count().unwrap(), 1);
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a").join("b").join("helpline.db");

        let store = SqliteStore::open_path(&nested).unwrap();
        assert!(nested.exists());
        assert_eq!(store.path(), Some(nested.as_path()));
    }
}
