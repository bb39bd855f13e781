//! Payload validation errors.

use thiserror::Error;

/// An inbound message that could not be turned into an
/// [`EventEnvelope`](crate::EventEnvelope).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("Malformed payload: not structured data: {0}")]
    NotStructured(String),

    #[error("Malformed payload: missing field {0}")]
    MissingField(String),

    #[error("Malformed payload: field {field} must be {expected}")]
    InvalidType {
        field: String,
        expected: &'static str,
    },

    #[error("Malformed payload: {0}")]
    Schema(String),
}
