//! Data models for helpline
//!
//! Defines the core data structures: Thread and Message.
//! Field names follow the support API's camelCase JSON so the same types
//! travel over REST, the push connection and the local cache.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a support thread
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
    #[default]
    Open,
    Pending,
    Resolved,
    Closed,
}

impl ThreadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadStatus::Open => "open",
            ThreadStatus::Pending => "pending",
            ThreadStatus::Resolved => "resolved",
            ThreadStatus::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single support conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    /// Server-assigned identifier
    pub id: String,
    /// Free-text subject given at creation
    pub subject: String,
    #[serde(default)]
    pub status: ThreadStatus,
    /// When a message was last added
    pub last_updated: DateTime<Utc>,
    /// Messages received while the thread was not selected
    #[serde(default)]
    pub unread_count: u32,
}

impl Thread {
    /// Create a thread with the given server id and subject
    pub fn new(id: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            subject: subject.into(),
            status: ThreadStatus::Open,
            last_updated: Utc::now(),
            unread_count: 0,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status == ThreadStatus::Closed
    }

    /// Move `last_updated` forward, never backward
    pub fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.last_updated {
            self.last_updated = at;
        }
    }
}

/// Who wrote a message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    #[serde(alias = "admin")]
    Agent,
    System,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Agent => "agent",
            Sender::System => "system",
        }
    }
}

impl std::fmt::Display for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One chat turn within a thread
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Parent thread; filled in by the engine when the server omits it
    #[serde(default)]
    pub thread_id: String,
    pub sender: Sender,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// True only while an optimistic message awaits confirmation
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pending: bool,
    /// Client-side id of an optimistic message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<Uuid>,
}

impl Message {
    /// Create a confirmed message
    pub fn new(
        thread_id: impl Into<String>,
        sender: Sender,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            sender,
            content: content.into(),
            timestamp,
            pending: false,
            local_id: None,
        }
    }

    /// Create an optimistic user message stamped with the client clock
    pub fn optimistic(thread_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            sender: Sender::User,
            content: content.into(),
            timestamp: Utc::now(),
            pending: true,
            local_id: Some(Uuid::new_v4()),
        }
    }

    /// ISO-8601 rendering of the timestamp, stable across serde round trips
    pub fn timestamp_iso(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }
}
