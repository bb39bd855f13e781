//! Channel keys and the seams between registry, dispatcher and transport.
//!
//! ## Core Concepts
//!
//! - **ChannelKey**: names one stream of events, typically per visit or per patient
//! - **Listener**: a consumer callback registered on a channel key
//! - **SubscriptionSink**: told when a key gains its first or loses its last listener
//! - **InboundHandler**: handed every application event the transport receives

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::envelope::{EventEnvelope, PatientId, VisitId};
use crate::error::ListenerError;

#[cfg(test)]
#[path = "channel_tests.rs"]
mod tests;

/// Logical identifier of an event stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelKey(String);

impl ChannelKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Channel carrying events for one doctor visit (`visit:{id}`).
    pub fn visit(id: VisitId) -> Self {
        Self(format!("visit:{id}"))
    }

    /// Channel carrying events for one patient (`patient:{id}`).
    pub fn patient(id: PatientId) -> Self {
        Self(format!("patient:{id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the key is empty or only whitespace.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for ChannelKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl AsRef<str> for ChannelKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ChannelKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Consumer of dispatched envelopes.
///
/// Listeners run synchronously on the connection's dispatch path, so they
/// should hand heavy work off to another task.
pub trait Listener: Send + Sync {
    fn on_event(&self, envelope: &EventEnvelope) -> Result<(), ListenerError>;
}

impl<F> Listener for F
where
    F: Fn(&EventEnvelope) -> Result<(), ListenerError> + Send + Sync,
{
    fn on_event(&self, envelope: &EventEnvelope) -> Result<(), ListenerError> {
        self(envelope)
    }
}

/// Receives transport subscription signals from the channel registry.
///
/// Implementations must not block: the registry calls them while holding
/// the lock for the affected key.
pub trait SubscriptionSink: Send + Sync {
    /// The key gained its first listener.
    fn open(&self, channel: &ChannelKey);

    /// The key lost its last listener.
    fn close(&self, channel: &ChannelKey);
}

/// Receives application events read from the transport, in arrival order.
pub trait InboundHandler: Send + Sync {
    fn handle(&self, channel: &ChannelKey, event: &str, payload: &str);
}
