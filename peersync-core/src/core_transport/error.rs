//! Transport error types

use super::PeerId;
use thiserror::Error;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    /// The local endpoint is not connected
    #[error("Transport is not connected")]
    NotConnected,

    /// Unicast target is not part of the session
    #[error("Peer not found: {0}")]
    PeerNotFound(PeerId),

    /// A message could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(String),

    /// Anything reported by the underlying network
    #[error("Network error: {0}")]
    Network(String),
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        TransportError::Codec(e.to_string())
    }
}
