//! Error types

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Contention retries used up; the caller must stop
    #[error("Retries exhausted after {attempts} attempts: {message}")]
    RetriesExhausted {
        /// Attempts made
        attempts: u32,
        /// Last database error
        message: String,
    },

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Core error (wire decoding, key handling, nullifier sealing)
    #[error("Core error: {0}")]
    Core(#[from] hermes_core::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
