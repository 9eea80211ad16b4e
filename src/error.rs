//! Error types for the live record store.

use thiserror::Error;

/// Main error type for store operations.
///
/// The first five variants form the taxonomy surfaced to route handlers
/// (see [`StoreError::status_code`]); the rest describe backend failures
/// and map to a server error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Write conflict: {0}")]
    WriteConflict(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,
}

impl StoreError {
    /// HTTP-equivalent status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            StoreError::NotFound(_) => 404,
            StoreError::ValidationFailed(_) => 400,
            StoreError::Unauthorized => 401,
            StoreError::WriteConflict(_) => 409,
            StoreError::BackendUnavailable(_) | StoreError::Locked => 503,
            _ => 500,
        }
    }

    /// True if the caller may retry the same request later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::BackendUnavailable(_) | StoreError::WriteConflict(_) | StoreError::Locked
        )
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
