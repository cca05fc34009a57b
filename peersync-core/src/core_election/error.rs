//! Election error types

use crate::core_transport::TransportError;
use thiserror::Error;

pub type ElectionResult<T> = Result<T, ElectionError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ElectionError {
    /// The election was torn down before a host was agreed
    #[error("Election closed before a host was agreed")]
    Closed,

    #[error("Transport error during election: {0}")]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_converts() {
        let err: ElectionError = TransportError::NotConnected.into();
        assert_eq!(err.to_string(), "Transport error during election: Transport is not connected");
    }
}
