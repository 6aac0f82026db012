//! Error types for P21 Core

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// P21 Core errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unknown storage slot name
    #[error("Invalid slot: {0}")]
    InvalidSlot(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
