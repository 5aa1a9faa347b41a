//! The per-peer connection state machine.

use std::fmt;

/// Lifecycle state of a peer.
///
/// Both sides of a session walk the same four states; the degenerate no-auth
/// handshake still traverses all of them with an empty challenge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No live session. Freshly created peers start here, and terminated or
    /// timed-out peers return here.
    #[default]
    Disconnected,
    /// A connection request passed the protocol-compatibility gate.
    Requested,
    /// A challenge has been sent; waiting for the answer.
    WaitingForChallengeResponse,
    /// The handshake completed; application data flows.
    AuthenticatedConnected,
}

/// Something that happened to a peer which may move it to another state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateEvent {
    /// A connection request arrived.
    ConnectionRequestReceived,
    /// We sent the peer a challenge.
    ChallengeSent,
    /// The peer answered the challenge and the answer authenticated.
    ChallengeResponseReceived,
    /// We sent the connection response.
    ConnectionResponseSent,
    /// We sent a termination.
    TerminationSent,
    /// The peer sent a termination.
    TerminationReceived,
    /// The peer went silent past the idle timeout.
    TimedOut,
}

impl ConnectionState {
    /// The state this event legally moves a peer into, or `None` when the
    /// event is not legal in the current state (the caller ignores the packet
    /// silently).
    #[must_use]
    pub fn apply(self, event: StateEvent) -> Option<ConnectionState> {
        use ConnectionState::{
            AuthenticatedConnected, Disconnected, Requested, WaitingForChallengeResponse,
        };
        use StateEvent as E;

        match (self, event) {
            (_, E::TimedOut) => Some(Disconnected),
            (Disconnected, E::ConnectionRequestReceived) => Some(Requested),
            (Requested, E::ChallengeSent) => Some(WaitingForChallengeResponse),
            (WaitingForChallengeResponse, E::ChallengeResponseReceived) => {
                Some(AuthenticatedConnected)
            }
            (AuthenticatedConnected, E::ConnectionResponseSent) => Some(AuthenticatedConnected),
            (AuthenticatedConnected, E::TerminationSent | E::TerminationReceived) => {
                Some(Disconnected)
            }
            _ => None,
        }
    }

    /// Whether the handshake has completed on this peer.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::AuthenticatedConnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Requested => "requested",
            Self::WaitingForChallengeResponse => "waiting for challenge response",
            Self::AuthenticatedConnected => "connected",
        };
        f.write_str(name)
    }
}
