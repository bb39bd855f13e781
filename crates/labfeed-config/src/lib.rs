//! # labfeed Config
//!
//! Configuration for the labfeed broadcast connection: credentials, timeouts,
//! reconnect policy and logging.

mod error;
mod loader;
mod schema;
mod validator;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
pub use validator::{ConfigValidator, ValidationError, ValidationResult, ValidationWarning};
