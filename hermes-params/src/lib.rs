//! HermesVault application parameters and configuration
//!
//! This crate provides the on-chain application descriptor, the two ARC4
//! method signatures the ledger understands, and the environment-file
//! configuration shared by the ingestion and query tools.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod app;
pub mod config;
pub mod methods;

pub use app::AppDescriptor;
pub use config::{VaultConfig, DEFAULT_POLL_INTERVAL_SECS};
pub use methods::{
    method_selector, MethodKind, DEPOSIT_FILTER_NAME, DEPOSIT_SIGNATURE, WITHDRAW_FILTER_NAME,
    WITHDRAW_SIGNATURE,
};

/// Error types for parameter operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration file or key missing/invalid
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Application descriptor could not be parsed
    #[error("Invalid app descriptor: {0}")]
    InvalidAppDescriptor(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for parameter operations
pub type Result<T> = std::result::Result<T, Error>;
