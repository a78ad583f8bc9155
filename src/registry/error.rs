//! Registry error types
//!
//! Error types for stream registry operations.

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No stream registered under this key
    StreamNotFound(String),
    /// Stream already has an inbound connection
    StreamAlreadyPublishing(String),
    /// Stream exists but its inbound connection is not established
    StreamNotActive(String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::StreamNotFound(key) => write!(f, "Stream not found: {}", key),
            RegistryError::StreamAlreadyPublishing(key) => {
                write!(f, "Stream already has a publisher: {}", key)
            }
            RegistryError::StreamNotActive(key) => write!(f, "Stream not active: {}", key),
        }
    }
}

impl std::error::Error for RegistryError {}
