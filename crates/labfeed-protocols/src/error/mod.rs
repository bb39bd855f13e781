//! Error types for the labfeed protocol layer.

mod feed;
mod listener;
mod payload;
mod transport;

pub use feed::*;
pub use listener::*;
pub use payload::*;
pub use transport::*;
