//! Error types for the chat core.
//!
//! `TransportError` is what the network side reports; `ChatError` is what the
//! session hands back to callers when a request is rejected outright.
//! Failures that happen *after* a send was accepted never surface as a
//! `ChatError`: they are converted into a notification and a `SendOutcome`.

use crate::threads::ThreadId;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Status {
        status: u16,
        body: String,
        /// Parsed `Retry-After`, when the server sent one.
        retry_after: Option<Duration>,
    },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("stream failed: {0}")]
    Stream(String),

    #[error("stream ended without an end-of-stream marker")]
    Truncated,

    #[error("no chunk received for {0} seconds")]
    IdleTimeout(u64),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("request cancelled")]
    Cancelled,
}

impl TransportError {
    /// True when the server answered 401/403.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Status { status: 401 | 403, .. })
    }
}

/// Reasons a session operation is refused before it starts.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("another message is still being sent")]
    Busy,

    #[error("message text is empty")]
    EmptyMessage,

    #[error("thread not found: {0}")]
    ThreadNotFound(ThreadId),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type Result<T, E = ChatError> = std::result::Result<T, E>;
