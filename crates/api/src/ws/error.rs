//! Event handler errors
//!
//! Nothing in this enum crosses the connection boundary as a Rust error: the
//! dispatch layer turns it into the single error ack for request events, or a
//! log line for fire-and-forget events.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventError {
    /// Malformed or incomplete payload
    #[error("{0}")]
    Validation(String),

    /// Caller is not allowed to act on the target resource
    #[error("{0}")]
    Forbidden(String),

    /// Unknown call/message/chat identifier
    #[error("{0}")]
    NotFound(String),

    /// Stale state transition (first-committer-wins lost)
    #[error("{0}")]
    Conflict(String),

    /// Storage collaborator failure on a primary path
    #[error("Internal error")]
    Database(#[from] sqlx::Error),
}

impl EventError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EventError::Validation(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        EventError::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        EventError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        EventError::Conflict(msg.into())
    }
}
