//! Subscription loop
//!
//! Polls a [`TransactionSource`] from the controller's watermark, hands
//! every transaction to the controller in order, then advances the
//! watermark. Source failures are retried with backoff; controller
//! failures stop the loop with the watermark left before the bad batch.
//!
//! Ledger writes, including their busy retries, run inline on the task
//! that drives [`SubscriptionRunner::run`]. One runner per ledger file.

use crate::cancel::CancelToken;
use crate::controller::IngestionController;
use crate::subscriber::TransactionSource;
use crate::Result;
use hermes_params::{VaultConfig, DEFAULT_POLL_INTERVAL_SECS};
use hermes_storage_sqlite::SaveOutcome;
use std::time::Duration;

/// Runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Wait between polls once caught up
    pub poll_interval: Duration,
    /// Return as soon as the source reports it is caught up
    pub stop_when_caught_up: bool,
    /// First wait after a source error
    pub source_backoff: Duration,
    /// Cap on the source error wait
    pub max_source_backoff: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            stop_when_caught_up: false,
            source_backoff: Duration::from_secs(2),
            max_source_backoff: Duration::from_secs(60),
        }
    }
}

impl RunnerConfig {
    /// Defaults with the poll interval taken from the service configuration
    pub fn from_vault_config(config: &VaultConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            ..Self::default()
        }
    }
}

/// Counters for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Batches fully applied
    pub batches: u64,
    /// Transactions handled
    pub transactions: u64,
    /// Transactions that added rows
    pub inserted: u64,
    /// Redelivered transactions
    pub duplicates: u64,
    /// Watermark when the run ended
    pub watermark: u64,
    /// Run ended because of cancellation
    pub cancelled: bool,
}

/// Drives a controller from a transaction source
pub struct SubscriptionRunner {
    config: RunnerConfig,
}

impl SubscriptionRunner {
    /// Create a runner
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Run until cancelled, caught up (if configured) or a transaction
    /// fails. The controller must be initialized.
    pub async fn run<S: TransactionSource + ?Sized>(
        &self,
        controller: &mut IngestionController,
        source: &mut S,
        cancel: &CancelToken,
    ) -> Result<RunSummary> {
        let filters = controller.filters();
        let mut summary = RunSummary {
            watermark: controller.get_watermark()?,
            ..RunSummary::default()
        };
        let mut backoff = self.config.source_backoff;

        loop {
            if cancel.is_cancelled() {
                tracing::warn!("Subscription cancelled at watermark {}", summary.watermark);
                summary.cancelled = true;
                return Ok(summary);
            }

            let watermark = controller.get_watermark()?;
            let batch = match source.poll(&filters, watermark).await {
                Ok(batch) => {
                    backoff = self.config.source_backoff;
                    batch
                }
                Err(e) => {
                    tracing::warn!(
                        "Transaction source failed at watermark {}: {}. Retrying in {:?}...",
                        watermark,
                        e,
                        backoff
                    );
                    if !self.sleep(backoff, cancel).await {
                        summary.cancelled = true;
                        return Ok(summary);
                    }
                    backoff = std::cmp::min(backoff.saturating_mul(2), self.config.max_source_backoff);
                    continue;
                }
            };

            for tagged in &batch.transactions {
                let outcome = controller
                    .handle_transaction(&tagged.transaction, &tagged.filter_name)
                    .map_err(|e| {
                        tracing::error!(
                            txn_id = %tagged.transaction.id,
                            round = tagged.transaction.confirmed_round,
                            "Failed to apply transaction: {}",
                            e
                        );
                        e
                    })?;
                summary.transactions += 1;
                match outcome {
                    SaveOutcome::Inserted => summary.inserted += 1,
                    SaveOutcome::AlreadyPresent => summary.duplicates += 1,
                }
            }

            controller.set_watermark(batch.new_watermark)?;
            controller.set_caught_up(batch.caught_up);
            summary.batches += 1;
            summary.watermark = controller.get_watermark()?;

            if !batch.transactions.is_empty() {
                tracing::info!(
                    "Applied {} transactions up to round {}",
                    batch.transactions.len(),
                    summary.watermark
                );
            }

            if batch.caught_up {
                if self.config.stop_when_caught_up {
                    tracing::info!("Caught up at round {}", summary.watermark);
                    return Ok(summary);
                }
                if !self.sleep(self.config.poll_interval, cancel).await {
                    summary.cancelled = true;
                    return Ok(summary);
                }
            }
        }
    }

    /// Sleep unless cancelled first; returns false on cancellation
    async fn sleep(&self, duration: Duration, cancel: &CancelToken) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = cancel.cancelled() => false,
        }
    }
}

impl Default for SubscriptionRunner {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}
