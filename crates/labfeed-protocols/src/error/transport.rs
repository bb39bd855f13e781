//! Transport errors.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Handshake timed out after {timeout_secs} seconds")]
    HandshakeTimeout { timeout_secs: u64 },

    #[error("Protocol error: {message}")]
    Protocol { code: Option<u16>, message: String },

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Connection closed: {reason}")]
    Closed { code: Option<u16>, reason: String },

    #[error("No pong received within {timeout_secs} seconds")]
    PongTimeout { timeout_secs: u64 },
}

impl TransportError {
    /// The broadcast service's error or close code, if one was carried.
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::Protocol { code, .. } | Self::Closed { code, .. } => *code,
            _ => None,
        }
    }
}
