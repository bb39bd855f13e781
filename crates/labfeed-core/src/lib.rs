//! # labfeed Core
//!
//! The consumer-facing side of the clinical event feed.
//!
//! - [`ChannelRegistry`] maps channel keys to listeners and reference counts
//!   transport subscriptions.
//! - [`Dispatcher`] validates inbound payloads and invokes listeners in
//!   registration order.
//! - [`LockCoordinator`] remembers the advisory lock flag per patient.
//! - [`FeedClient`] wires these to a connection worker.

pub mod client;
pub mod dispatcher;
pub mod lock;
pub mod registry;

pub use client::FeedClient;
pub use dispatcher::{DispatchReport, DispatchStats, Dispatcher, StatsSnapshot};
pub use lock::LockCoordinator;
pub use registry::{ChannelRegistry, SubscriptionHandle};
