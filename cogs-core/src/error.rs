//! Domain-specific error types for the Cogs pub/sub client.
//!
//! All fallible operations return `Result<T, CogsError>`.
//! No panics on remote input: every error is typed and recoverable,
//! and asynchronous failures travel through the same reply or event
//! channel as successes.

use std::time::Duration;
use thiserror::Error;

/// WebSocket close code for a normal, intended closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// The canonical error type for the Cogs client.
#[derive(Debug, Error)]
pub enum CogsError {
    // ── Credential Errors ────────────────────────────────────────
    /// A project key does not have the `<tag>-<identity>-<secret>` shape.
    #[error("invalid key format: {0}")]
    InvalidKeyFormat(String),

    // ── Frame Errors ─────────────────────────────────────────────
    /// An inbound frame could not be parsed, or a recognised shape was
    /// missing a required field.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// An inbound frame parsed but matched no known response shape.
    #[error("unrecognized frame")]
    UnrecognizedFrame,

    // ── Request Errors ───────────────────────────────────────────
    /// The correlation table is at capacity; the command was not sent.
    #[error("too many pending requests (capacity {capacity})")]
    TableFull { capacity: usize },

    /// No reply arrived for the request before it aged out.
    #[error("request {seq} timed out after {after:?}")]
    RequestTimeout { seq: u64, after: Duration },

    /// The service answered with an error response.
    #[error("service error {code}: {message}")]
    Service { code: i64, message: String },

    /// A reply arrived but had the wrong shape for the command.
    #[error("unexpected response to {expected}: got {actual}")]
    UnexpectedResponse {
        expected: &'static str,
        actual: &'static str,
    },

    // ── Connection Errors ────────────────────────────────────────
    /// A command was issued while the connection was not `Ready`.
    #[error("not connected")]
    NotConnected,

    /// `connect` was called while a connection attempt is in progress.
    #[error("connection already in progress")]
    AlreadyConnecting,

    /// The connection was closed while the request was outstanding.
    #[error("connection closed")]
    ConnectionClosed,

    /// The transport closed without a normal-closure code.
    #[error("connection closed abnormally (code {code:?})")]
    AbnormalClose { code: Option<u16> },

    /// The automatic session handshake did not complete.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The transport layer reported an error.
    #[error("transport error: {0}")]
    Transport(String),

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// A state transition or table operation violated engine rules.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// An internal channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    // ── Serialization Errors ─────────────────────────────────────
    /// JSON encoding or decoding failed.
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl CogsError {
    /// Returns `true` for errors reported by the remote service rather
    /// than produced locally.
    pub fn is_service(&self) -> bool {
        matches!(self, Self::Service { .. })
    }
}

// ── Convenient From implementations ──────────────────────────────

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for CogsError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        CogsError::ChannelClosed
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for CogsError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        CogsError::Transport(e.to_string())
    }
}
