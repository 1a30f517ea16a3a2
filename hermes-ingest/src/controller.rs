//! Ingestion controller
//!
//! Turns subscribed deposit/withdraw calls into ledger rows and owns the
//! watermark. The watermark only moves after the transactions below it
//! are committed, so a crash at any point resumes by redelivery.

use crate::subscriber::{SubscribedTransaction, TransactionFilter};
use crate::{Error, Result};
use hermes_core::wire::{decode_deposit_args, decode_log_base64, decode_withdraw_args};
use hermes_params::{AppDescriptor, MethodKind};
use hermes_storage_sqlite::{Deposit, LedgerStore, Note, SaveOutcome, Withdrawal};

/// Controller lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionState {
    /// Watermark not loaded yet
    Uninitialized,
    /// Source is behind the chain tip
    CatchingUp,
    /// Source is at the chain tip
    Live,
}

/// App identity and current watermark
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestionContext {
    /// Application being followed
    pub app: AppDescriptor,
    /// Highest round whose transactions are all persisted
    pub watermark: u64,
}

/// Startup options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartupOptions {
    /// Force the watermark to this round, skipping everything before it.
    /// Destroys history; for test networks only.
    pub fast_catchup_height: Option<u64>,
}

/// Applies subscribed transactions to the ledger
pub struct IngestionController {
    store: LedgerStore,
    app: AppDescriptor,
    context: Option<IngestionContext>,
    state: IngestionState,
}

impl IngestionController {
    /// Create an uninitialized controller
    pub fn new(store: LedgerStore, app: AppDescriptor) -> Self {
        Self {
            store,
            app,
            context: None,
            state: IngestionState::Uninitialized,
        }
    }

    /// Load the persisted watermark and apply the startup rules.
    /// Returns the starting watermark.
    pub fn initialize(&mut self, options: &StartupOptions) -> Result<u64> {
        let persisted = self.store.retry(|s| s.get_watermark())?;

        let watermark = match options.fast_catchup_height {
            Some(height) => {
                tracing::warn!(
                    "Fast catchup mode enabled: setting watermark to {} from {}. \
                     All transactions in between are ignored.",
                    height,
                    persisted
                );
                self.store.retry(|s| s.set_watermark(height))?;
                height
            }
            None if persisted < self.app.creation_block => {
                let creation_block = self.app.creation_block;
                tracing::info!(
                    "Raising watermark from {} to app creation block {}",
                    persisted,
                    creation_block
                );
                self.store.retry(|s| s.set_watermark(creation_block))?;
                creation_block
            }
            None => persisted,
        };

        self.context = Some(IngestionContext {
            app: self.app,
            watermark,
        });
        self.state = IngestionState::CatchingUp;
        tracing::info!(app_id = self.app.id, watermark, "Ingestion initialized");
        Ok(watermark)
    }

    /// Current lifecycle state
    pub fn state(&self) -> IngestionState {
        self.state
    }

    /// Context, once initialized
    pub fn context(&self) -> Option<&IngestionContext> {
        self.context.as_ref()
    }

    /// Filters for the two supported methods of this app
    pub fn filters(&self) -> Vec<TransactionFilter> {
        TransactionFilter::for_app(self.app.id)
    }

    /// Ledger, for read-only queries
    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    /// Give the ledger back
    pub fn into_store(self) -> LedgerStore {
        self.store
    }

    /// Watermark hook read by the subscriber
    pub fn get_watermark(&self) -> Result<u64> {
        self.context
            .map(|c| c.watermark)
            .ok_or(Error::NotInitialized)
    }

    /// Watermark hook written by the subscriber after a batch is handled.
    /// Persists before updating memory; regressions are ignored.
    pub fn set_watermark(&mut self, value: u64) -> Result<()> {
        let current = self.get_watermark()?;
        if value < current {
            tracing::warn!(
                "Ignoring watermark regression from {} to {}",
                current,
                value
            );
            return Ok(());
        }
        if value == current {
            return Ok(());
        }

        self.store.retry(|s| s.set_watermark(value))?;
        if let Some(context) = self.context.as_mut() {
            context.watermark = value;
        }
        tracing::debug!(watermark = value, "Watermark advanced");
        Ok(())
    }

    /// Record whether the source has reached the chain tip
    pub fn set_caught_up(&mut self, caught_up: bool) {
        if self.state == IngestionState::Uninitialized {
            return;
        }
        let next = if caught_up {
            IngestionState::Live
        } else {
            IngestionState::CatchingUp
        };
        if next != self.state {
            tracing::info!("Ingestion state {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    /// Decode and persist one transaction delivered under `filter_name`.
    ///
    /// Errors are fatal for the stream: the caller must not advance the
    /// watermark past a transaction that failed here.
    pub fn handle_transaction(
        &mut self,
        txn: &SubscribedTransaction,
        filter_name: &str,
    ) -> Result<SaveOutcome> {
        if self.context.is_none() {
            return Err(Error::NotInitialized);
        }
        let kind = MethodKind::from_filter_name(filter_name)
            .ok_or_else(|| Error::UnknownFilter(filter_name.to_string()))?;

        let call = &txn.application_transaction;
        if call.application_id != self.app.id {
            return Err(Error::Decode(format!(
                "transaction {} calls app {}, expected {}",
                txn.id, call.application_id, self.app.id
            )));
        }

        let log = txn
            .result_log()
            .ok_or_else(|| Error::Decode(format!("transaction {} has no logs", txn.id)))?;
        let result = decode_log_base64(log)
            .map_err(|e| decode_failure(txn, e))?;
        let confirmed_block = txn.confirmed_round;

        match kind {
            MethodKind::Deposit => {
                let args = decode_deposit_args(&call.application_args)
                    .map_err(|e| decode_failure(txn, e))?;
                let note = Note::new(result.leaf_index, args.commitment, txn.id.clone());
                let deposit = Deposit {
                    leaf_index: result.leaf_index,
                    address: args.address,
                    amount: args.amount,
                };
                Ok(self.store.retry(|s| {
                    s.save_deposit(&note, &deposit, &result.tree_root, confirmed_block)
                })?)
            }
            MethodKind::Withdraw => {
                let args = decode_withdraw_args(&call.application_args, &call.accounts)
                    .map_err(|e| decode_failure(txn, e))?;
                let note = Note::new(result.leaf_index, args.commitment, txn.id.clone());
                let withdrawal = Withdrawal {
                    leaf_index: result.leaf_index,
                    address: args.recipient,
                    nullifier: args.nullifier,
                    amount: args.amount,
                    fee: args.fee,
                };
                Ok(self.store.retry(|s| {
                    s.save_withdrawal(&note, &withdrawal, &result.tree_root, confirmed_block)
                })?)
            }
        }
    }
}

fn decode_failure(txn: &SubscribedTransaction, e: hermes_core::Error) -> Error {
    tracing::warn!(
        txn_id = %txn.id,
        round = txn.confirmed_round,
        category = %e.category(),
        "Undecodable transaction: {}",
        e
    );
    Error::Decode(format!("transaction {}: {}", txn.id, e))
}
