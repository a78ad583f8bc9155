//! Crate-wide error type
//!
//! Negotiation and control-plane calls return [`Error`] synchronously to the
//! caller. Relay loop failures never surface here; they are logged where
//! they happen and only end the loop that hit them.

use thiserror::Error;

use crate::registry::RegistryError;

/// Main error type for relay operations
#[derive(Error, Debug)]
pub enum Error {
    /// Authorization header missing or empty
    #[error("Authorization was not set")]
    MissingAuthorization,

    /// Stream key did not match any configured key
    #[error("Stream key is not valid")]
    Unauthorized,

    /// Stream registry rejected the operation
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// No egress session with this ID
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// ICE candidate gathering did not finish in time
    #[error("ICE candidate gathering timed out")]
    NegotiationTimeout,

    /// Peer connection setup or SDP handling failed
    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    /// Socket or listener error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Request body could not be understood
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Whether the error means "nothing to watch under this key"
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Registry(RegistryError::StreamNotFound(_))
                | Error::Registry(RegistryError::StreamNotActive(_))
        )
    }
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        let err = Error::from(RegistryError::StreamNotFound("abc123".into()));
        assert!(err.is_not_found());

        let err = Error::from(RegistryError::StreamAlreadyPublishing("abc123".into()));
        assert!(!err.is_not_found());

        assert!(!Error::SessionNotFound("x".into()).is_not_found());
    }

    #[test]
    fn test_registry_error_is_transparent() {
        let err = Error::from(RegistryError::StreamAlreadyPublishing("abc123".into()));
        assert_eq!(err.to_string(), "Stream already has a publisher: abc123");
    }
}
