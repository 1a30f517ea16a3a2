//! SQLite ledger for the HermesVault shielded pool
//!
//! Stores notes, deposits, withdrawals, pending notes and the ingestion
//! watermark in a single WAL-mode database shared with other services.
//!
//! ## Contents
//!
//! - [`LedgerStore`]: idempotent, transactional writes and typed reads
//! - [`ChangeChainResolver`]: unspent balance of an address, following
//!   change notes through partial withdrawals
//! - [`nullifier_migration`]: seals legacy plaintext nullifiers in place
//! - [`RetryPolicy`]: bounded backoff on SQLITE_BUSY / SQLITE_LOCKED

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod change_chain;
pub mod database;
pub mod error;
pub mod ledger;
pub mod migrations;
pub mod models;
pub mod nullifier_migration;
pub mod retry;

pub use change_chain::{
    parse_change_amount, ChangeChainResolver, ResolveError, ResolveReport, UnspentKind,
    UnspentRecord,
};
pub use database::Database;
pub use error::{Error, Result};
pub use ledger::{LedgerStore, SaveOutcome};
pub use models::*;
pub use nullifier_migration::{
    encrypt_nullifiers, MigrationReport, MigrationTable, RowAction, RowReport,
};
pub use retry::{is_busy_error, RetryPolicy, BASE_BACKOFF_MS, MAX_BACKOFF_MS, MAX_BUSY_RETRIES};
