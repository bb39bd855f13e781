//! Channel registry.

mod channel;

pub use channel::{ChannelRegistry, SubscriptionHandle};
