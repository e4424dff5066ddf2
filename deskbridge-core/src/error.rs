//! Domain-specific error types for the bridge.
//!
//! All fallible operations return `Result<T, BridgeError>`. Each variant
//! maps onto one [`ErrorKind`] of the public taxonomy, which is what the
//! client sees in a terminal error payload and what drives HTTP status
//! codes and retry classification.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The canonical error type for the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    // ── Session Errors ───────────────────────────────────────────
    /// The client connection carried no session identifier.
    #[error("missing session identifier")]
    MissingSession,

    /// The registry has no running backend for this session.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Connecting to (or talking to) the backend failed after retries.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A circuit breaker rejected the call without attempting it.
    #[error("circuit open for {0}")]
    CircuitOpen(&'static str),

    /// The session registry answered with a non-success status.
    #[error("registry returned HTTP {status}")]
    Registry { status: u16 },

    // ── Validation Errors ────────────────────────────────────────
    /// A key name outside the supported key table.
    #[error("unsupported key: {0}")]
    UnsupportedKey(String),

    /// An action request failed validation before any I/O.
    #[error("invalid action request: {0}")]
    InvalidActionRequest(String),

    // ── Protocol Errors ──────────────────────────────────────────
    /// The backend sent bytes that do not form valid RFB.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A session phase transition that the state machine forbids.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// The client cannot produce a framebuffer capture; callers serve a
    /// placeholder instead of failing the session.
    #[error("screen capture unavailable: {0}")]
    CaptureUnavailable(String),

    /// An operation was attempted on a client that is not connected.
    #[error("protocol client is not connected")]
    NotConnected,

    // ── Connection Errors ────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The session was cancelled (client went away).
    #[error("cancelled")]
    Cancelled,

    // ── Serialization Errors ─────────────────────────────────────
    /// Encoding or decoding of a payload failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── ErrorKind ─────────────────────────────────────────────────────

/// The error taxonomy surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    MissingSession,
    SessionNotFound,
    BackendUnavailable,
    UnsupportedKey,
    InvalidActionRequest,
    ProtocolError,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingSession => "MissingSession",
            Self::SessionNotFound => "SessionNotFound",
            Self::BackendUnavailable => "BackendUnavailable",
            Self::UnsupportedKey => "UnsupportedKey",
            Self::InvalidActionRequest => "InvalidActionRequest",
            Self::ProtocolError => "ProtocolError",
            Self::Internal => "Internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl BridgeError {
    /// Taxonomy kind reported to the client.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingSession => ErrorKind::MissingSession,
            Self::SessionNotFound(_) => ErrorKind::SessionNotFound,
            Self::BackendUnavailable(_)
            | Self::CircuitOpen(_)
            | Self::Registry { .. }
            | Self::Io(_)
            | Self::Timeout(_)
            | Self::CaptureUnavailable(_)
            | Self::NotConnected => ErrorKind::BackendUnavailable,
            Self::UnsupportedKey(_) => ErrorKind::UnsupportedKey,
            Self::InvalidActionRequest(_) => ErrorKind::InvalidActionRequest,
            Self::Protocol(_) => ErrorKind::ProtocolError,
            Self::ProtocolViolation(_)
            | Self::Cancelled
            | Self::Encoding(_)
            | Self::Other(_) => ErrorKind::Internal,
        }
    }

    /// HTTP status code for the synchronous action endpoints.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::MissingSession | ErrorKind::SessionNotFound => 404,
            ErrorKind::InvalidActionRequest | ErrorKind::UnsupportedKey => 400,
            ErrorKind::BackendUnavailable => 503,
            ErrorKind::ProtocolError | ErrorKind::Internal => 500,
        }
    }

    /// Validation errors are answered locally and never end a session.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidActionRequest(_) | Self::UnsupportedKey(_)
        )
    }

    /// Default retry classifier: transient connectivity failures.
    pub fn is_retryable(&self) -> bool {
        use std::io::ErrorKind as Io;
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                Io::ConnectionRefused
                    | Io::ConnectionReset
                    | Io::ConnectionAborted
                    | Io::NotConnected
                    | Io::TimedOut
                    | Io::BrokenPipe
                    | Io::UnexpectedEof
                    | Io::Interrupted
                    | Io::WouldBlock
            ),
            Self::Timeout(_) | Self::BackendUnavailable(_) => true,
            Self::Registry { status } => matches!(status, 429 | 500 | 502 | 503 | 504),
            _ => false,
        }
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for BridgeError {
    fn from(s: String) -> Self {
        BridgeError::Other(s)
    }
}

impl From<&str> for BridgeError {
    fn from(s: &str) -> Self {
        BridgeError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Encoding(e.to_string())
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return BridgeError::Registry {
                status: status.as_u16(),
            };
        }
        if e.is_timeout() || e.is_connect() {
            BridgeError::BackendUnavailable(format!("registry: {e}"))
        } else {
            BridgeError::Other(format!("registry: {e}"))
        }
    }
}

impl From<image::ImageError> for BridgeError {
    fn from(e: image::ImageError) -> Self {
        BridgeError::Encoding(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = BridgeError::SessionNotFound("zzz".into());
        assert!(e.to_string().contains("zzz"));

        let e = BridgeError::Registry { status: 503 };
        assert!(e.to_string().contains("503"));
    }

    #[test]
    fn kinds_and_status_codes() {
        assert_eq!(BridgeError::MissingSession.status_code(), 404);
        assert_eq!(BridgeError::SessionNotFound("a".into()).status_code(), 404);
        assert_eq!(BridgeError::CircuitOpen("connect").status_code(), 503);
        assert_eq!(BridgeError::BackendUnavailable("x".into()).status_code(), 503);
        assert_eq!(BridgeError::Protocol("bad".into()).status_code(), 500);
        assert_eq!(
            BridgeError::UnsupportedKey("hyper".into()).kind(),
            ErrorKind::UnsupportedKey
        );
        assert_eq!(ErrorKind::ProtocolError.to_string(), "ProtocolError");
    }

    #[test]
    fn retry_classification() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "nope");
        assert!(BridgeError::from(refused).is_retryable());
        assert!(BridgeError::Registry { status: 429 }.is_retryable());
        assert!(!BridgeError::Registry { status: 403 }.is_retryable());
        assert!(!BridgeError::Protocol("garbage".into()).is_retryable());
        assert!(!BridgeError::SessionNotFound("a".into()).is_retryable());
        assert!(!BridgeError::CaptureUnavailable("raw".into()).is_retryable());
    }

    #[test]
    fn validation_errors() {
        assert!(BridgeError::InvalidActionRequest("x".into()).is_validation());
        assert!(BridgeError::UnsupportedKey("x".into()).is_validation());
        assert!(!BridgeError::NotConnected.is_validation());
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: BridgeError = io_err.into();
        assert!(matches!(e, BridgeError::Io(_)));
    }
}
