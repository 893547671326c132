//! Helpline Core Library
//!
//! This crate provides the sync engine behind Helpline, a real-time support
//! chat client. It keeps one consistent, ordered view of every support
//! conversation while data arrives from three sources.
//!
//! # Architecture
//!
//! - **REST**: authoritative snapshots of threads and messages
//! - **Push connection**: live messages, new threads and typing signals
//! - **Local store**: cached state for instant display across restarts
//!
//! Every message passes through a dedup index, so the same message seen on
//! more than one path is shown once.
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let store = Arc::new(SqliteStore::open(&config)?);
//! let api = Arc::new(HttpSupportApi::new(api_url, config.auth_token.clone()));
//! let transport = Arc::new(WebSocketTransport::new(socket_url, config.auth_token.clone()));
//! let connection = ConnectionManager::new(transport, config.connection_config());
//!
//! let engine = SyncEngine::new(api, store, connection, config.typing_idle());
//! engine.start().await?;
//! engine.select_thread("t-1").await?;
//! engine.send_message("t-1", "Hello").await?;
//! ```
//!
//! # Modules
//!
//! - `engine`: Sync engine (main entry point)
//! - `models`: Threads and messages
//! - `dedup`: Message identity and deduplication
//! - `connection`: Push connection lifecycle and wire events
//! - `typing`: Typing indicator coordination
//! - `storage`: Local store (SQLite and in-memory)
//! - `api`: Support REST API client
//! - `config`: Application configuration

pub mod api;
pub mod config;
pub mod connection;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod models;
pub mod storage;
pub mod typing;

#[cfg(test)]
mod testing;

pub use api::{ApiError, HttpSupportApi, SupportApi};
pub use config::Config;
pub use connection::{ConnectionManager, ConnectionState, WebSocketTransport};
pub use engine::{CloseRequest, EngineSnapshot, SyncEngine};
pub use error::{SyncError, ValidationError};
pub use models::{Message, Sender, Thread, ThreadStatus};
pub use storage::{LocalStore, MemoryStore, SqliteStore, StorageError};
