//! Ledger ingestion for the HermesVault application
//!
//! Follows deposit and withdraw calls of one application and keeps the
//! SQLite ledger in step with the chain, resuming from a persisted
//! watermark.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cancel;
pub mod controller;
pub mod error;
pub mod runner;
pub mod subscriber;

pub use cancel::CancelToken;
pub use controller::{IngestionContext, IngestionController, IngestionState, StartupOptions};
pub use error::{Error, Result};
pub use runner::{RunSummary, RunnerConfig, SubscriptionRunner};
pub use subscriber::{
    ApplicationTransaction, JsonFileSource, SubscribedTransaction, SubscriptionBatch,
    TaggedTransaction, TransactionFilter, TransactionSource, DEFAULT_MAX_ROUNDS_PER_BATCH,
};
