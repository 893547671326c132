//! SQLite schema for the Local Store
//!
//! The cache is a flat key-value table. Values are JSON documents; the
//! server stays the source of truth and any row can be rebuilt from it.

use rusqlite::{params, Connection, OptionalExtension};

use super::error::{StorageError, StorageResult};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Key holding the cached thread list
pub const THREADS_KEY: &str = "threads";

/// Key holding the last selected thread id
pub const SELECTED_THREAD_KEY: &str = "selected_thread";

/// Key holding a thread's cached messages
pub fn messages_key(thread_id: &str) -> String {
    format!("messages:{}", thread_id)
}

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_info (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS kv (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );
        "#,
    )?;

    match schema_version(conn)? {
        None => {
            conn.execute(
                "INSERT INTO schema_info (key, value) VALUES ('version', ?1)",
                params![SCHEMA_VERSION.to_string()],
            )?;
        }
        Some(found) if found > SCHEMA_VERSION => {
            return Err(StorageError::SchemaVersion {
                found,
                expected: SCHEMA_VERSION,
            });
        }
        Some(_) => {}
    }

    Ok(())
}

/// Read the stored schema version, if any
pub fn schema_version(conn: &Connection) -> StorageResult<Option<i32>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM schema_info WHERE key = 'version'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    Ok(value.and_then(|v| v.parse().ok()))
}
