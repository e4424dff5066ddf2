//! Per-connection session state machine.
//!
//! Provides a `SessionPhase` enum that models the lifecycle of one
//! client connection through the bridge, with validated transitions
//! that return `Result` instead of panicking.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::{BridgeError, ErrorKind};

// ── SessionPhase ─────────────────────────────────────────────────

/// The current phase of a bridged session.
///
/// ```text
///  Init ──► Resolving ──► Connecting ──► Streaming ──► Closed
///    │          │              │              │
///    └──────────┴──────────────┴──────────────┴──► Failed(kind)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// Client accepted; nothing looked up yet.
    #[default]
    Init,

    /// Asking the registry for the backend endpoint.
    Resolving,

    /// Opening the backend protocol connection.
    Connecting,

    /// Relaying in both directions.
    Streaming {
        /// When streaming started.
        since: Instant,
    },

    /// Ended normally. Terminal.
    Closed,

    /// Ended with an error. Terminal.
    Failed(ErrorKind),
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "Init"),
            Self::Resolving => write!(f, "Resolving"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Streaming { .. } => write!(f, "Streaming"),
            Self::Closed => write!(f, "Closed"),
            Self::Failed(kind) => write!(f, "Failed({kind})"),
        }
    }
}

impl SessionPhase {
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming { .. })
    }

    /// Returns `true` for `Closed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed(_))
    }

    /// How long the session has been streaming, if it is.
    pub fn streaming_duration(&self) -> Option<Duration> {
        match self {
            Self::Streaming { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Init`.
    pub fn begin_resolve(&mut self) -> Result<(), BridgeError> {
        match self {
            Self::Init => {
                *self = Self::Resolving;
                Ok(())
            }
            _ => Err(BridgeError::ProtocolViolation(
                "cannot resolve: not in Init state",
            )),
        }
    }

    /// Valid from: `Resolving`.
    pub fn begin_connect(&mut self) -> Result<(), BridgeError> {
        match self {
            Self::Resolving => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err(BridgeError::ProtocolViolation(
                "cannot connect: not in Resolving state",
            )),
        }
    }

    /// Valid from: `Connecting`.
    pub fn begin_streaming(&mut self) -> Result<(), BridgeError> {
        match self {
            Self::Connecting => {
                *self = Self::Streaming {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(BridgeError::ProtocolViolation(
                "cannot stream: not in Connecting state",
            )),
        }
    }

    /// Valid from: `Streaming`.
    pub fn close(&mut self) -> Result<(), BridgeError> {
        match self {
            Self::Streaming { .. } => {
                *self = Self::Closed;
                Ok(())
            }
            _ => Err(BridgeError::ProtocolViolation(
                "cannot close: not in Streaming state",
            )),
        }
    }

    /// Valid from any non-terminal phase.
    pub fn fail(&mut self, kind: ErrorKind) -> Result<(), BridgeError> {
        if self.is_terminal() {
            return Err(BridgeError::ProtocolViolation(
                "cannot fail: session already ended",
            ));
        }
        *self = Self::Failed(kind);
        Ok(())
    }
}

// ── PhaseLog ─────────────────────────────────────────────────────

/// A [`SessionPhase`] plus every phase it has passed through.
#[derive(Debug, Clone, Default)]
pub struct PhaseLog {
    current: SessionPhase,
    history: Vec<SessionPhase>,
}

impl PhaseLog {
    pub fn new() -> Self {
        Self {
            current: SessionPhase::Init,
            history: vec![SessionPhase::Init],
        }
    }

    pub fn current(&self) -> &SessionPhase {
        &self.current
    }

    pub fn history(&self) -> &[SessionPhase] {
        &self.history
    }

    /// Phase names in order, e.g. `["Init", "Resolving", ...]`.
    pub fn names(&self) -> Vec<String> {
        self.history.iter().map(ToString::to_string).collect()
    }

    pub fn visited(&self, pred: impl Fn(&SessionPhase) -> bool) -> bool {
        self.history.iter().any(pred)
    }

    /// Apply `transition` and record the new phase on success.
    pub fn advance(
        &mut self,
        transition: impl FnOnce(&mut SessionPhase) -> Result<(), BridgeError>,
    ) -> Result<(), BridgeError> {
        transition(&mut self.current)?;
        self.history.push(self.current.clone());
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let mut p = SessionPhase::default();
        p.begin_resolve().unwrap();
        p.begin_connect().unwrap();
        p.begin_streaming().unwrap();
        assert!(p.is_streaming());
        assert!(p.streaming_duration().is_some());
        p.close().unwrap();
        assert!(p.is_terminal());
    }

    #[test]
    fn skipping_phases_is_a_violation() {
        let mut p = SessionPhase::Init;
        assert!(matches!(
            p.begin_connect(),
            Err(BridgeError::ProtocolViolation(_))
        ));
        assert!(p.begin_streaming().is_err());
        assert!(p.close().is_err());
        assert_eq!(p, SessionPhase::Init);
    }

    #[test]
    fn fail_from_any_live_phase_only() {
        let mut p = SessionPhase::Resolving;
        p.fail(ErrorKind::SessionNotFound).unwrap();
        assert_eq!(p.to_string(), "Failed(SessionNotFound)");
        assert!(p.fail(ErrorKind::Internal).is_err());

        let mut closed = SessionPhase::Closed;
        assert!(closed.fail(ErrorKind::Internal).is_err());
    }

    #[test]
    fn log_records_history() {
        let mut log = PhaseLog::new();
        log.advance(SessionPhase::begin_resolve).unwrap();
        log.advance(|p| p.fail(ErrorKind::SessionNotFound)).unwrap();
        assert!(log.advance(SessionPhase::begin_connect).is_err());
        assert_eq!(
            log.names(),
            vec!["Init", "Resolving", "Failed(SessionNotFound)"]
        );
        assert!(!log.visited(|p| *p == SessionPhase::Connecting));
    }
}
