//! Transport error types.

use std::time::Duration;

use tokio_tungstenite::tungstenite;

/// Errors raised by connections and by the dial/handshake helpers.
///
/// Every variant is fatal to the connection that produced it. Nothing in
/// this crate retries; failures are reported upward to the supervisor.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Socket I/O or websocket protocol failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// A read or write did not finish within its deadline.
    #[error("{context} timed out after {timeout_ms}ms")]
    Timeout {
        /// What was being attempted.
        context: &'static str,
        /// The deadline that elapsed.
        timeout_ms: u64,
    },

    /// The peer sent something this client does not accept.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// An outbound batch could not be serialized.
    #[error("failed to serialize outbound message: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The connection is closed; nothing more can be sent.
    #[error("connection closed")]
    Closed,

    /// The bounded outbound queue has no free slot.
    #[error("outbound queue full")]
    QueueFull,

    /// The HTTP call that precedes a dial failed.
    #[error("api request failed: {0}")]
    Api(#[from] cos_auth::AuthError),

    /// The endpoint or request headers were unusable.
    #[error("invalid endpoint {url}: {message}")]
    Connect {
        /// Endpoint being dialed.
        url: String,
        /// What was wrong with it.
        message: String,
    },
}

impl TransportError {
    /// Build a [`TransportError::Timeout`].
    pub fn timeout(context: &'static str, timeout: Duration) -> Self {
        Self::Timeout {
            context,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Whether the socket was already closed when the operation ran.
    ///
    /// Writes failing this way are expected during shutdown and are not
    /// logged as failures.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            Self::Closed
                | Self::WebSocket(
                    tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed
                )
        )
    }
}

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_display() {
        let err = TransportError::timeout("frame write", Duration::from_secs(20));
        assert_eq!(err.to_string(), "frame write timed out after 20000ms");
        assert!(!err.is_closed());
    }

    #[test]
    fn closed_variants() {
        assert!(TransportError::Closed.is_closed());
        assert!(TransportError::WebSocket(tungstenite::Error::ConnectionClosed).is_closed());
        assert!(TransportError::WebSocket(tungstenite::Error::AlreadyClosed).is_closed());
        assert!(!TransportError::Protocol("binary frame".into()).is_closed());
    }

    #[test]
    fn protocol_display() {
        let err = TransportError::Protocol("expected text frame".into());
        assert_eq!(err.to_string(), "protocol violation: expected text frame");
    }

    #[test]
    fn api_error_converts() {
        let err: TransportError = cos_auth::AuthError::Status {
            status: 503,
            body: "busy".into(),
        }
        .into();
        assert!(err.to_string().starts_with("api request failed"));
        assert!(!err.is_closed());
    }
}
