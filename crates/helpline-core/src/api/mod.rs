//! Support API collaborators
//!
//! The engine talks to the REST side only through [`SupportApi`]. The
//! calls are thin CRUD wrappers; the engine treats them as opaque async
//! operations that either resolve or fail.

mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Message, Thread};

pub use http::HttpSupportApi;

/// Response body of the per-thread fetch
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ThreadDetail {
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Errors returned by support API calls
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    /// The resource does not exist (HTTP 404)
    #[error("not found")]
    NotFound,

    /// The server answered with a non-success status
    #[error("server returned {status}: {message}")]
    Http { status: u16, message: String },

    /// The request never got an answer
    #[error("request failed: {0}")]
    Transport(String),

    /// The answer could not be decoded
    #[error("invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound)
    }
}

/// Remote operations consumed by the sync engine
#[async_trait]
pub trait SupportApi: Send + Sync {
    async fn list_threads(&self) -> Result<Vec<Thread>, ApiError>;

    /// Messages of one thread; an empty list when it has none yet
    async fn get_thread(&self, thread_id: &str) -> Result<ThreadDetail, ApiError>;

    async fn create_thread(&self, subject: &str) -> Result<Thread, ApiError>;

    async fn post_message(&self, thread_id: &str, content: &str) -> Result<Message, ApiError>;

    async fn close_thread(&self, thread_id: &str) -> Result<(), ApiError>;
}
