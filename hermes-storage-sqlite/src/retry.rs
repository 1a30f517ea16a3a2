//! Bounded retry with backoff for SQLITE_BUSY / SQLITE_LOCKED
//!
//! Other services hold the same ledger file open, so short write conflicts
//! are expected. Only contention is retried; every other failure is
//! returned immediately. Running out of attempts yields
//! [`Error::RetriesExhausted`], which ingestion treats as fatal.

use crate::{Error, Result};
use rusqlite::ErrorCode;
use std::thread;
use std::time::Duration;

/// Maximum retry attempts for SQLITE_BUSY
pub const MAX_BUSY_RETRIES: u32 = 5;

/// Base backoff duration in milliseconds
pub const BASE_BACKOFF_MS: u64 = 50;

/// Maximum backoff duration in milliseconds
pub const MAX_BACKOFF_MS: u64 = 1000;

/// Retry parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Backoff before the first retry
    pub base_backoff_ms: u64,
    /// Backoff ceiling
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_BUSY_RETRIES,
            base_backoff_ms: BASE_BACKOFF_MS,
            max_backoff_ms: MAX_BACKOFF_MS,
        }
    }
}

impl RetryPolicy {
    /// Run `f`, retrying on contention.
    ///
    /// Backoff sleeps block the calling thread; async callers share a
    /// runtime worker with it for at most the summed backoff of one call.
    pub fn run<F, T>(&self, mut f: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut attempts = 0;

        loop {
            match f() {
                Ok(result) => return Ok(result),
                Err(Error::Database(ref e)) if is_busy_error(e) => {
                    if attempts >= self.max_retries {
                        tracing::error!(
                            "Database still busy after {} attempts: {}",
                            attempts + 1,
                            e
                        );
                        return Err(Error::RetriesExhausted {
                            attempts: attempts + 1,
                            message: e.to_string(),
                        });
                    }
                    attempts += 1;
                    let backoff = self.backoff(attempts);
                    tracing::warn!(
                        "SQLITE_BUSY (attempt {}/{}), retrying in {}ms",
                        attempts,
                        self.max_retries,
                        backoff
                    );
                    thread::sleep(Duration::from_millis(backoff));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Exponential backoff with up to 25% jitter
    fn backoff(&self, attempt: u32) -> u64 {
        let base = self.base_backoff_ms.saturating_mul(1 << attempt.min(6));
        let jitter = rand::random::<u64>() % (base / 4 + 1);
        base.saturating_add(jitter).min(self.max_backoff_ms)
    }
}

/// Check if error is SQLITE_BUSY or SQLITE_LOCKED
pub fn is_busy_error(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked,
                ..
            },
            _
        )
    )
}
