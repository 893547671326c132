//! Local Store
//!
//! Durable key-value cache of the thread list, per-thread message lists and
//! the last selected thread. It survives restarts so the UI can render
//! instantly, but it is best-effort: the server remains authoritative.
//!
//! ## Architecture
//!
//! - [`KeyValueBackend`]: raw string get/put, implemented by SQLite and memory
//! - [`LocalStore`]: typed operations, provided for every backend
//!
//! Writes to one key are applied in the order they are issued. Each backend
//! serializes access behind a single lock, so the last write wins.

pub mod error;
pub mod memory;
pub mod schema;
pub mod sqlite;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::models::{Message, Thread};

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use schema::{init_schema, SCHEMA_VERSION};
pub use sqlite::SqliteStore;

/// Raw string storage keyed by string
pub trait KeyValueBackend: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;
    fn put(&self, key: &str, value: &str) -> StorageResult<()>;
}

/// Typed cache operations used by the sync engine
pub trait LocalStore: Send + Sync {
    fn load_threads(&self) -> StorageResult<Option<Vec<Thread>>>;
    fn save_threads(&self, threads: &[Thread]) -> StorageResult<()>;

    /// Cached messages for a thread
    ///
    /// Messages that were still pending when written are dropped: their send
    /// outcome died with the previous process.
    fn load_messages(&self, thread_id: &str) -> StorageResult<Option<Vec<Message>>>;
    fn save_messages(&self, thread_id: &str, messages: &[Message]) -> StorageResult<()>;

    fn load_selected_thread(&self) -> StorageResult<Option<String>>;
    fn save_selected_thread(&self, thread_id: &str) -> StorageResult<()>;
}

impl<B: KeyValueBackend> LocalStore for B {
    fn load_threads(&self) -> StorageResult<Option<Vec<Thread>>> {
        get_json(self, schema::THREADS_KEY)
    }

    fn save_threads(&self, threads: &[Thread]) -> StorageResult<()> {
        put_json(self, schema::THREADS_KEY, &threads)
    }

    fn load_messages(&self, thread_id: &str) -> StorageResult<Option<Vec<Message>>> {
        let key = schema::messages_key(thread_id);
        let Some(messages) = get_json::<Vec<Message>>(self, &key)? else {
            return Ok(None);
        };

        let total = messages.len();
        let confirmed: Vec<Message> = messages.into_iter().filter(|m| !m.pending).collect();
        if confirmed.len() != total {
            debug!(
                "Dropped {} stale pending message(s) from cache for thread {}",
                total - confirmed.len(),
                thread_id
            );
        }
        Ok(Some(confirmed))
    }

    fn save_messages(&self, thread_id: &str, messages: &[Message]) -> StorageResult<()> {
        put_json(self, &schema::messages_key(thread_id), &messages)
    }

    fn load_selected_thread(&self) -> StorageResult<Option<String>> {
        self.get(schema::SELECTED_THREAD_KEY)
    }

    fn save_selected_thread(&self, thread_id: &str) -> StorageResult<()> {
        self.put(schema::SELECTED_THREAD_KEY, thread_id)
    }
}

fn get_json<T: DeserializeOwned>(
    backend: &impl KeyValueBackend,
    key: &str,
) -> StorageResult<Option<T>> {
    let Some(raw) = backend.get(key)? else {
        return Ok(None);
    };

    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| StorageError::InvalidValue {
            key: key.to_string(),
            source,
        })
}

fn put_json<T: Serialize + ?Sized>(
    backend: &impl KeyValueBackend,
    key: &str,
    value: &T,
) -> StorageResult<()> {
    let raw = serde_json::to_string(value).map_err(|source| StorageError::InvalidValue {
        key: key.to_string(),
        source,
    })?;
    backend.put(key, &raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sender;
    use chrono::Utc;

    #[test]
    fn test_missing_keys_load_as_none() {
        let store = MemoryStore::new();
        assert!(store.load_threads().unwrap().is_none());
        assert!(store.load_messages("t-1").unwrap().is_none());
        assert!(store.load_selected_thread().unwrap().is_none());
    }

    #[test]
    fn test_pending_messages_not_restored() {
        let store = MemoryStore::new();
        let confirmed = Message::new("t-1", Sender::Agent, "hello", Utc::now());
        let pending = Message::optimistic("t-1", "on its way");

        store
            .save_messages("t-1", &[confirmed.clone(), pending])
            .unwrap();

        let loaded = store.load_messages("t-1").unwrap().unwrap();
        assert_eq!(loaded, vec![confirmed]);
    }

    #[test]
    fn test_corrupt_value_reported() {
        let store = MemoryStore::new();
        store.put(schema::THREADS_KEY, "not json").unwrap();

        let err = store.load_threads().unwrap_err();
        assert!(matches!(err, StorageError::InvalidValue { .. }));
    }

    #[test]
    fn test_last_write_wins() {
        let store = MemoryStore::new();
        store.save_selected_thread("a").unwrap();
        store.save_selected_thread("b").unwrap();
        assert_eq!(store.load_selected_thread().unwrap().as_deref(), Some("b"));
    }
}
