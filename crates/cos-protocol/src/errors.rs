//! Packet parse errors.
//!
//! A parse failure concerns one message only. Callers drop the message and
//! keep the connection.

use thiserror::Error;

/// Why a structured object could not be turned into a typed packet.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The frame was not valid JSON.
    #[error("frame is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),
    /// The frame (or an element of a batch) was not a JSON object.
    #[error("expected a JSON object or an array of JSON objects")]
    NotAnObject,
    /// The object has no `type` field.
    #[error("packet missing type")]
    MissingType,
    /// The `type` field is present but not a string.
    #[error("packet has type but it's not a string")]
    TypeNotString,
    /// No parser is registered for this `type`.
    #[error("unknown packet type: {0}")]
    UnknownType(String),
    /// The body does not match the shape registered for its `type`.
    #[error("invalid {packet_type} packet: {source}")]
    Invalid {
        /// Discriminator of the offending packet.
        packet_type: String,
        /// Underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },
}

impl ParseError {
    /// The packet type involved, when one was identified.
    pub fn packet_type(&self) -> Option<&str> {
        match self {
            Self::UnknownType(t) | Self::Invalid { packet_type: t, .. } => Some(t),
            _ => None,
        }
    }
}
