//! Error types for HermesVault core

use std::fmt;

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Core errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transaction result log has the wrong shape
    #[error("Malformed log: {0}")]
    MalformedLog(String),

    /// Application call arguments have the wrong shape
    #[error("Malformed args: {0}")]
    MalformedArgs(String),

    /// Invalid address encoding
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Authenticated decryption failed or produced something that is not a nullifier
    #[error("Decryption failure: {0}")]
    DecryptionFailure(String),

    /// Encryption failed
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Invalid key material
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::MalformedLog(_) | Error::MalformedArgs(_) | Error::InvalidAddress(_) => {
                ErrorCategory::Wire
            }
            Error::DecryptionFailure(_) | Error::Encryption(_) | Error::InvalidKey(_) => {
                ErrorCategory::Crypto
            }
            Error::Io(_) => ErrorCategory::Internal,
        }
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Wire decoding errors
    Wire,
    /// Nullifier sealing errors
    Crypto,
    /// Internal/system errors
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Wire => write!(f, "Wire"),
            ErrorCategory::Crypto => write!(f, "Crypto"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}
