//! # labfeed Transport
//!
//! One long-lived WebSocket connection to a Pusher-compatible broadcasting
//! service. The [`ConnectionWorker`] owns the socket, keeps the set of
//! subscribed channels and re-subscribes them after every reconnect;
//! callers talk to it through a cloneable [`ConnectionHandle`].

pub mod backoff;
pub mod connector;
pub mod manager;
pub mod protocol;
pub mod state;

pub use backoff::Backoff;
pub use connector::{Connector, FrameSink, FrameStream, Session, WsConnector};
pub use manager::{ConnectionHandle, ConnectionWorker};
pub use protocol::{classify, endpoint_url, ErrorAction, InboundFrame, OutboundFrame};
pub use state::ConnectionState;
