//! Transaction source interface
//!
//! The blockchain subscription itself (catch-up, indexer fallback, polling
//! algod) is an external component. It is modelled here as a
//! [`TransactionSource`]: given the filters and the current watermark it
//! returns the next batch of matching transactions in block order.
//! Delivery is at-least-once; the controller's writes are idempotent.

use crate::{Error, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hermes_params::MethodKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Rounds served per batch by [`JsonFileSource`] unless overridden
pub const DEFAULT_MAX_ROUNDS_PER_BATCH: u64 = 1_000;

/// Named filter on application calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionFilter {
    /// Name handed back with every match
    pub name: String,
    /// Application id
    pub app_id: u64,
    /// ARC4 method signature
    pub method_signature: String,
}

impl TransactionFilter {
    /// Filter for one supported method
    pub fn for_method(app_id: u64, kind: MethodKind) -> Self {
        Self {
            name: kind.filter_name().to_string(),
            app_id,
            method_signature: kind.signature().to_string(),
        }
    }

    /// Deposit and withdraw filters for an application
    pub fn for_app(app_id: u64) -> Vec<Self> {
        MethodKind::ALL
            .into_iter()
            .map(|kind| Self::for_method(app_id, kind))
            .collect()
    }

    /// Whether `txn` calls this filter's method on this filter's app
    pub fn matches(&self, txn: &SubscribedTransaction) -> bool {
        let call = &txn.application_transaction;
        if call.application_id != self.app_id {
            return false;
        }
        let selector = hermes_params::method_selector(&self.method_signature);
        call.application_args
            .first()
            .and_then(|arg| BASE64.decode(arg).ok())
            .is_some_and(|arg| arg == selector)
    }
}

/// Application-call fields of a transaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ApplicationTransaction {
    /// Called application
    #[serde(default)]
    pub application_id: u64,
    /// Base64 arguments; the first is the method selector
    #[serde(default)]
    pub application_args: Vec<String>,
    /// Foreign accounts referenced by index from the arguments
    #[serde(default)]
    pub accounts: Vec<String>,
}

/// Confirmed transaction in algod/indexer JSON shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SubscribedTransaction {
    /// Transaction id
    pub id: String,
    /// Round the transaction was confirmed in
    pub confirmed_round: u64,
    /// Application call fields
    pub application_transaction: ApplicationTransaction,
    /// Base64 logs; the last one is the ARC4 return value
    #[serde(default)]
    pub logs: Vec<String>,
}

impl SubscribedTransaction {
    /// ARC4 return log
    pub fn result_log(&self) -> Option<&str> {
        self.logs.last().map(String::as_str)
    }
}

/// A transaction together with the name of the filter that matched it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedTransaction {
    /// Matching filter name
    pub filter_name: String,
    /// The transaction
    pub transaction: SubscribedTransaction,
}

/// One poll's worth of transactions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionBatch {
    /// Matches in block order
    pub transactions: Vec<TaggedTransaction>,
    /// Watermark to persist once every transaction is handled
    pub new_watermark: u64,
    /// Source has nothing newer than `new_watermark`
    pub caught_up: bool,
}

/// External subscription collaborator
#[async_trait]
pub trait TransactionSource: Send {
    /// Next batch of matching transactions strictly above `watermark`
    async fn poll(
        &mut self,
        filters: &[TransactionFilter],
        watermark: u64,
    ) -> Result<SubscriptionBatch>;
}

/// Serves an exported JSON array of transactions, as if it were the chain.
///
/// The tip is the highest `confirmed-round` in the file unless set with
/// [`JsonFileSource::with_tip`].
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    transactions: Vec<SubscribedTransaction>,
    tip: u64,
    max_rounds_per_batch: u64,
}

impl JsonFileSource {
    /// Build from transactions already in memory
    pub fn new(mut transactions: Vec<SubscribedTransaction>) -> Self {
        // stable: keeps intra-round order
        transactions.sort_by_key(|t| t.confirmed_round);
        let tip = transactions.last().map(|t| t.confirmed_round).unwrap_or(0);
        Self {
            transactions,
            tip,
            max_rounds_per_batch: DEFAULT_MAX_ROUNDS_PER_BATCH,
        }
    }

    /// Parse a JSON array
    pub fn from_json(raw: &str) -> Result<Self> {
        let transactions: Vec<SubscribedTransaction> = serde_json::from_str(raw)?;
        Ok(Self::new(transactions))
    }

    /// Read a JSON array from disk
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let raw = std::fs::read_to_string(&path)?;
        let source = Self::from_json(&raw)
            .map_err(|e| Error::Source(format!("{}: {}", path.display(), e)))?;
        tracing::info!(
            "Loaded {} transactions from {} (tip round {})",
            source.transactions.len(),
            path.display(),
            source.tip
        );
        Ok(source)
    }

    /// Pretend the chain extends to `tip`
    pub fn with_tip(mut self, tip: u64) -> Self {
        self.tip = self.tip.max(tip);
        self
    }

    /// Limit rounds covered by one batch
    pub fn with_max_rounds_per_batch(mut self, rounds: u64) -> Self {
        self.max_rounds_per_batch = rounds.max(1);
        self
    }

    /// Highest round served
    pub fn tip(&self) -> u64 {
        self.tip
    }
}

#[async_trait]
impl TransactionSource for JsonFileSource {
    async fn poll(
        &mut self,
        filters: &[TransactionFilter],
        watermark: u64,
    ) -> Result<SubscriptionBatch> {
        if watermark >= self.tip {
            return Ok(SubscriptionBatch {
                transactions: Vec::new(),
                new_watermark: watermark,
                caught_up: true,
            });
        }

        let upper = watermark.saturating_add(self.max_rounds_per_batch).min(self.tip);
        let transactions = self
            .transactions
            .iter()
            .filter(|t| t.confirmed_round > watermark && t.confirmed_round <= upper)
            .filter_map(|t| {
                filters.iter().find(|f| f.matches(t)).map(|f| TaggedTransaction {
                    filter_name: f.name.clone(),
                    transaction: t.clone(),
                })
            })
            .collect();

        Ok(SubscriptionBatch {
            transactions,
            new_watermark: upper,
            caught_up: upper >= self.tip,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const APP_ID: u64 = 7331;

    fn call(id: &str, round: u64, app_id: u64, kind: MethodKind) -> SubscribedTransaction {
        SubscribedTransaction {
            id: id.to_string(),
            confirmed_round: round,
            application_transaction: ApplicationTransaction {
                application_id: app_id,
                application_args: vec![BASE64.encode(kind.selector())],
                accounts: Vec::new(),
            },
            logs: Vec::new(),
        }
    }

    #[test]
    fn test_algod_json_shape() {
        let raw = r#"{
            "id": "TX1",
            "confirmed-round": 42,
            "application-transaction": {
                "application-id": 7331,
                "application-args": ["qDaRPA=="],
                "accounts": ["RECIPIENT"]
            },
            "logs": ["first", "last"],
            "sender": "ignored"
        }"#;
        let txn: SubscribedTransaction = serde_json::from_str(raw).unwrap();
        assert_eq!(txn.confirmed_round, 42);
        assert_eq!(txn.application_transaction.accounts, vec!["RECIPIENT"]);
        assert_eq!(txn.result_log(), Some("last"));

        let filters = TransactionFilter::for_app(APP_ID);
        assert!(filters[0].matches(&txn));
        assert!(!filters[1].matches(&txn));
    }

    #[test]
    fn test_filter_requires_app_and_selector() {
        let deposit = TransactionFilter::for_method(APP_ID, MethodKind::Deposit);
        assert!(deposit.matches(&call("a", 1, APP_ID, MethodKind::Deposit)));
        assert!(!deposit.matches(&call("b", 1, APP_ID + 1, MethodKind::Deposit)));
        assert!(!deposit.matches(&call("c", 1, APP_ID, MethodKind::Withdraw)));

        let mut no_args = call("d", 1, APP_ID, MethodKind::Deposit);
        no_args.application_transaction.application_args.clear();
        assert!(!deposit.matches(&no_args));
    }

    #[tokio::test]
    async fn test_json_source_batches_above_watermark() {
        let mut source = JsonFileSource::new(vec![
            call("late", 30, APP_ID, MethodKind::Withdraw),
            call("early", 10, APP_ID, MethodKind::Deposit),
            call("other-app", 15, 1, MethodKind::Deposit),
            call("mid", 20, APP_ID, MethodKind::Deposit),
        ])
        .with_max_rounds_per_batch(15);
        let filters = TransactionFilter::for_app(APP_ID);

        let first = source.poll(&filters, 5).await.unwrap();
        let ids: Vec<_> = first.transactions.iter().map(|t| t.transaction.id.as_str()).collect();
        assert_eq!(ids, ["early", "mid"]);
        assert_eq!(first.new_watermark, 20);
        assert!(!first.caught_up);

        let second = source.poll(&filters, first.new_watermark).await.unwrap();
        assert_eq!(second.transactions.len(), 1);
        assert_eq!(second.transactions[0].filter_name, "withdraw");
        assert_eq!(second.new_watermark, 30);
        assert!(second.caught_up);

        let idle = source.poll(&filters, 30).await.unwrap();
        assert!(idle.transactions.is_empty());
        assert_eq!(idle.new_watermark, 30);
        assert!(idle.caught_up);
    }

    #[tokio::test]
    async fn test_json_source_tip_override() {
        let mut source = JsonFileSource::from_json("[]").unwrap().with_tip(500);
        let batch = source.poll(&TransactionFilter::for_app(APP_ID), 100).await.unwrap();
        assert!(batch.transactions.is_empty());
        assert_eq!(batch.new_watermark, 500);
        assert!(batch.caught_up);
    }
}
