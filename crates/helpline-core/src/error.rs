//! Sync engine errors
//!
//! Only failures the user must know about surface here. Transport retries
//! and optimistic rollbacks are handled inside the engine.

use thiserror::Error;

use crate::api::ApiError;

/// Input rejected before any network call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Subject cannot be empty")]
    EmptySubject,

    #[error("Message cannot be empty")]
    EmptyMessage,

    #[error("Conversation is closed")]
    ThreadClosed,
}

/// Remote operation that failed, phrased for the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOp {
    LoadThreads,
    LoadMessages,
    CreateThread,
    SendMessage,
    CloseThread,
}

impl std::fmt::Display for RemoteOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            RemoteOp::LoadThreads => "Failed to load conversations",
            RemoteOp::LoadMessages => "Failed to load messages",
            RemoteOp::CreateThread => "Failed to start conversation",
            RemoteOp::SendMessage => "Failed to send message",
            RemoteOp::CloseThread => "Failed to close conversation",
        };
        f.write_str(text)
    }
}

/// Errors surfaced by [`SyncEngine`](crate::engine::SyncEngine) commands
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("No conversation selected")]
    NoThreadSelected,

    /// Commands that act on message state need the thread to be selected
    #[error("Conversation {0} is not selected")]
    ThreadNotSelected(String),

    #[error("Unknown conversation {0}")]
    UnknownThread(String),

    #[error("{op}: {source}")]
    Remote {
        op: RemoteOp,
        #[source]
        source: ApiError,
    },
}

impl SyncError {
    pub fn remote(op: RemoteOp, source: ApiError) -> Self {
        SyncError::Remote { op, source }
    }

    /// Whether a manual refresh or retry can fix it
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SyncError::Remote { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_message() {
        let err = SyncError::remote(
            RemoteOp::LoadThreads,
            ApiError::Transport("connection refused".to_string()),
        );
        assert_eq!(
            err.to_string(),
            "Failed to load conversations: request failed: connection refused"
        );
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_validation_is_transparent() {
        let err: SyncError = ValidationError::EmptyMessage.into();
        assert_eq!(err.to_string(), "Message cannot be empty");
        assert!(!err.is_recoverable());
    }
}
