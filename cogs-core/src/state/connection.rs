//! Connection lifecycle state machine.
//!
//! Provides a `ConnectionPhase` enum that models the full lifecycle of a
//! pub/sub connection, with validated transitions that return `Result`
//! instead of panicking.

use std::time::Instant;

use crate::error::CogsError;

// ── ConnectionPhase ──────────────────────────────────────────────

/// The current phase of the pub/sub connection.
///
/// ```text
///  Disconnected ──► Connecting ──► Authenticating ──► AwaitingHandshake ──► Ready
///     ▲    │  ▲                                                              │
///     │    │  └──────────── Reconnecting ◄── (auto-reconnect) ───────────────┤
///     │    ▼                                                                 │
///     │  Closed ◄──────────────── close() from any phase ────────────────────┤
///     └──────────────────────────── transport loss ◄─────────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    /// No connection. Initial state and the state after transport loss.
    #[default]
    Disconnected,

    /// Credentials derived; transport not yet dialled.
    Connecting,

    /// Transport handshake in flight with the credential headers attached.
    Authenticating,

    /// Transport is open; waiting for the `session-uuid` reply.
    AwaitingHandshake,

    /// Handshake complete; user commands are accepted.
    Ready {
        /// When the connection entered the `Ready` state.
        since: Instant,
    },

    /// Waiting for the reconnect delay to elapse.
    Reconnecting,

    /// Closed by the caller. No reconnect will happen.
    Closed,
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Authenticating => write!(f, "Authenticating"),
            Self::AwaitingHandshake => write!(f, "AwaitingHandshake"),
            Self::Ready { .. } => write!(f, "Ready"),
            Self::Reconnecting => write!(f, "Reconnecting"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

impl ConnectionPhase {
    /// Returns `true` when user commands may be sent.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    /// Returns `true` when a new `connect` may start.
    pub fn can_connect(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Closed)
    }

    /// Returns `true` after an explicit close.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// How long the connection has been `Ready`.
    ///
    /// Returns `None` for any other phase.
    pub fn ready_duration(&self) -> Option<std::time::Duration> {
        match self {
            Self::Ready { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Connecting`.
    ///
    /// Valid from: `Disconnected`, `Closed`.
    pub fn begin_connect(&mut self) -> Result<(), CogsError> {
        match self {
            Self::Disconnected | Self::Closed => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err(CogsError::AlreadyConnecting),
        }
    }

    /// Transition to `Authenticating`.
    ///
    /// Valid from: `Connecting`.
    pub fn begin_authenticate(&mut self) -> Result<(), CogsError> {
        match self {
            Self::Connecting => {
                *self = Self::Authenticating;
                Ok(())
            }
            _ => Err(CogsError::ProtocolViolation(
                "cannot authenticate: not in Connecting state",
            )),
        }
    }

    /// Transition to `AwaitingHandshake`.
    ///
    /// Valid from: `Authenticating`.
    pub fn begin_handshake(&mut self) -> Result<(), CogsError> {
        match self {
            Self::Authenticating => {
                *self = Self::AwaitingHandshake;
                Ok(())
            }
            _ => Err(CogsError::ProtocolViolation(
                "cannot handshake: not in Authenticating state",
            )),
        }
    }

    /// Transition to `Ready`.
    ///
    /// Valid from: `AwaitingHandshake`.
    pub fn complete_handshake(&mut self) -> Result<(), CogsError> {
        match self {
            Self::AwaitingHandshake => {
                *self = Self::Ready {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(CogsError::ProtocolViolation(
                "cannot complete handshake: not in AwaitingHandshake state",
            )),
        }
    }

    /// Transition to `Disconnected` after losing the transport.
    ///
    /// Valid from: any phase except `Closed` and `Disconnected`.
    pub fn lose_transport(&mut self) -> Result<(), CogsError> {
        match self {
            Self::Closed | Self::Disconnected => Err(CogsError::ProtocolViolation(
                "cannot lose transport: no connection",
            )),
            _ => {
                *self = Self::Disconnected;
                Ok(())
            }
        }
    }

    /// Transition to `Reconnecting`.
    ///
    /// Valid from: `Disconnected`.
    pub fn begin_reconnect(&mut self) -> Result<(), CogsError> {
        match self {
            Self::Disconnected => {
                *self = Self::Reconnecting;
                Ok(())
            }
            _ => Err(CogsError::ProtocolViolation(
                "cannot reconnect: not in Disconnected state",
            )),
        }
    }

    /// Transition from `Reconnecting` to `Connecting` when the delay
    /// elapses.
    pub fn resume_connect(&mut self) -> Result<(), CogsError> {
        match self {
            Self::Reconnecting => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err(CogsError::ProtocolViolation(
                "cannot resume: not in Reconnecting state",
            )),
        }
    }

    /// Force the `Closed` state from any phase.
    ///
    /// Returns `false` if the phase was already `Closed`.
    pub fn close(&mut self) -> bool {
        if self.is_closed() {
            return false;
        }
        *self = Self::Closed;
        true
    }

    /// Force-reset to `Disconnected` regardless of current state.
    ///
    /// Use this to roll back a connect attempt that failed before any
    /// background work started.
    pub fn force_disconnect(&mut self) {
        *self = Self::Disconnected;
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_lifecycle() {
        let mut phase = ConnectionPhase::Disconnected;

        phase.begin_connect().unwrap();
        assert_eq!(phase, ConnectionPhase::Connecting);

        phase.begin_authenticate().unwrap();
        assert_eq!(phase, ConnectionPhase::Authenticating);

        phase.begin_handshake().unwrap();
        assert_eq!(phase, ConnectionPhase::AwaitingHandshake);

        phase.complete_handshake().unwrap();
        assert!(phase.is_ready());
        assert!(phase.ready_duration().is_some());

        assert!(phase.close());
        assert!(phase.is_closed());
    }

    #[test]
    fn reconnect_cycle() {
        let mut phase = ConnectionPhase::Ready {
            since: Instant::now(),
        };
        phase.lose_transport().unwrap();
        assert_eq!(phase, ConnectionPhase::Disconnected);

        phase.begin_reconnect().unwrap();
        assert_eq!(phase, ConnectionPhase::Reconnecting);

        phase.resume_connect().unwrap();
        assert_eq!(phase, ConnectionPhase::Connecting);
    }

    #[test]
    fn connect_while_establishing_is_rejected() {
        for mut phase in [
            ConnectionPhase::Connecting,
            ConnectionPhase::Authenticating,
            ConnectionPhase::AwaitingHandshake,
            ConnectionPhase::Reconnecting,
            ConnectionPhase::Ready {
                since: Instant::now(),
            },
        ] {
            assert!(matches!(
                phase.begin_connect(),
                Err(CogsError::AlreadyConnecting)
            ));
        }
    }

    #[test]
    fn connect_after_close_allowed() {
        let mut phase = ConnectionPhase::Closed;
        phase.begin_connect().unwrap();
        assert_eq!(phase, ConnectionPhase::Connecting);
    }

    #[test]
    fn invalid_transition_handshake_from_connecting() {
        let mut phase = ConnectionPhase::Connecting;
        assert!(phase.begin_handshake().is_err());
        assert!(phase.complete_handshake().is_err());
    }

    #[test]
    fn lose_transport_requires_connection() {
        let mut phase = ConnectionPhase::Closed;
        assert!(phase.lose_transport().is_err());
        let mut phase = ConnectionPhase::Disconnected;
        assert!(phase.lose_transport().is_err());
        let mut phase = ConnectionPhase::Authenticating;
        phase.lose_transport().unwrap();
        assert_eq!(phase, ConnectionPhase::Disconnected);
    }

    #[test]
    fn close_is_idempotent() {
        let mut phase = ConnectionPhase::AwaitingHandshake;
        assert!(phase.close());
        assert!(!phase.close());
        assert!(phase.is_closed());
    }

    #[test]
    fn display_format() {
        assert_eq!(ConnectionPhase::Disconnected.to_string(), "Disconnected");
        assert_eq!(
            ConnectionPhase::AwaitingHandshake.to_string(),
            "AwaitingHandshake"
        );
        assert_eq!(
            ConnectionPhase::Ready {
                since: Instant::now()
            }
            .to_string(),
            "Ready"
        );
        assert_eq!(ConnectionPhase::Closed.to_string(), "Closed");
    }

    #[test]
    fn default_phase_is_disconnected() {
        assert_eq!(ConnectionPhase::default(), ConnectionPhase::Disconnected);
        assert!(ConnectionPhase::default().can_connect());
    }
}
