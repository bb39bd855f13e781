//! Consumer-facing errors.

use thiserror::Error;

use super::{ListenerError, PayloadError, TransportError};

/// Errors surfaced by the feed's consumer API.
///
/// Only [`FeedError::RegistryClosed`], [`FeedError::InvalidChannelKey`] and
/// [`FeedError::Config`] are returned to callers in practice; payload,
/// transport and listener failures are recovered inside the feed and reported
/// through logging.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    MalformedPayload(#[from] PayloadError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Registry is closed")]
    RegistryClosed,

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("Invalid channel key: {0:?}")]
    InvalidChannelKey(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
