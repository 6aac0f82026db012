//! Error types

use std::fmt;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Ciphertext failed authentication (tampered, truncated or wrong key)
    #[error("Authentication failed: ciphertext rejected")]
    Authentication,

    /// Input is not a well-formed payload
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// Encryption error
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Host persistent storage cannot be used
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Archive could not be opened with the given password
    #[error("Invalid password or corrupt file")]
    InvalidPasswordOrCorruptFile,

    /// Archive decrypted but its contents are not a recognised format
    #[error("Invalid archive format: {0}")]
    InvalidArchiveFormat(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Media fetch or write error
    #[error("Media error: {0}")]
    Media(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Error::InvalidPasswordOrCorruptFile => {
                "This backup could not be opened. Check the password and make sure the file is a complete .p21 backup.".to_string()
            }
            Error::InvalidArchiveFormat(_) => {
                "This backup was created by an unsupported version of the app.".to_string()
            }
            Error::StorageUnavailable(_) => {
                "Local storage is unavailable. Enable storage permissions for the app and try again.".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Authentication | Error::MalformedInput(_) | Error::Encryption(_) => {
                ErrorCategory::Crypto
            }
            Error::Database(_) | Error::StorageUnavailable(_) => ErrorCategory::Storage,
            Error::InvalidPasswordOrCorruptFile | Error::InvalidArchiveFormat(_) => {
                ErrorCategory::Archive
            }
            Error::Media(_) => ErrorCategory::Media,
            Error::Serialization(_) | Error::Io(_) | Error::Validation(_) => {
                ErrorCategory::Internal
            }
        }
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Cipher-level errors
    Crypto,
    /// Local storage errors
    Storage,
    /// Backup archive errors
    Archive,
    /// Media attachment errors
    Media,
    /// Internal/system errors
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Crypto => write!(f, "Crypto"),
            ErrorCategory::Storage => write!(f, "Storage"),
            ErrorCategory::Archive => write!(f, "Archive"),
            ErrorCategory::Media => write!(f, "Media"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}
