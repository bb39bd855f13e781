//! # labfeed Protocols
//!
//! Shared definitions for the labfeed clinical event feed.
//! Contains data types and seam traits only - no transport or registry logic.
//!
//! ## Contents
//!
//! - [`EventEnvelope`] - A validated instrument result with its visit and patient context
//! - [`ChannelKey`] - Logical subscription key (per visit or per patient)
//! - [`Listener`] - Consumer callback invoked for each dispatched envelope
//! - [`SubscriptionSink`] - Receives open/close signals for transport subscriptions
//! - [`InboundHandler`] - Receives raw channel messages from the transport

pub mod channel;
pub mod envelope;
pub mod error;

pub use channel::{ChannelKey, InboundHandler, Listener, SubscriptionSink};
pub use envelope::{
    EventEnvelope, InstrumentResult, PatientContext, PatientId, ResultId, ShiftId, VisitContext,
    VisitId,
};
pub use error::{FeedError, ListenerError, PayloadError, TransportError};
