//! Error types for ingestion

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transaction arrived under a filter this service does not handle
    #[error("Unknown filter: {0}")]
    UnknownFilter(String),

    /// Controller used before `initialize`
    #[error("Ingestion controller not initialized")]
    NotInitialized,

    /// Log or arguments could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Transaction source error
    #[error("Source error: {0}")]
    Source(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<hermes_storage_sqlite::Error> for Error {
    fn from(e: hermes_storage_sqlite::Error) -> Self {
        Error::Storage(format!("{}", e))
    }
}

impl From<hermes_core::Error> for Error {
    fn from(e: hermes_core::Error) -> Self {
        Error::Decode(format!("{}", e))
    }
}

impl From<hermes_params::Error> for Error {
    fn from(e: hermes_params::Error) -> Self {
        Error::Config(format!("{}", e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Source(format!("{}", e))
    }
}
