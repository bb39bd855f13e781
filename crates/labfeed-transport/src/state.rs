//! Connection state.

use serde::{Deserialize, Serialize};

/// Lifecycle of the broadcast connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No connection, and none is being attempted.
    Disconnected,
    /// First connection attempt of a session is in flight.
    Connecting,
    /// Handshake completed; channels are subscribed.
    Connected,
    /// The connection dropped and is being re-established.
    Reconnecting,
}

impl ConnectionState {
    /// Returns true while a connection attempt is pending.
    #[must_use]
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Reconnecting => write!(f, "Reconnecting"),
        }
    }
}
