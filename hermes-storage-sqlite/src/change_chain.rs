//! Unspent-balance resolution through change notes
//!
//! A withdrawal spends one note and appends one change note at its own
//! leaf index. Starting from each deposit of an address, the resolver
//! opens the note's sealed nullifier, looks for the withdrawal that
//! revealed it, and keeps hopping to the change note until it reaches a
//! note nobody has spent (reported) or a zero change (nothing left).
//!
//! The change amount is not on chain; it is the first 8 bytes (16 hex
//! characters, big-endian) of the secret-note text kept in `debug_notes`.
//!
//! Broken links, unreadable notes, bad amounts and runaway chains end the
//! chain for that deposit and are collected in [`ResolveReport::anomalies`]. Failing to
//! open a nullifier aborts the whole query.

use crate::{LedgerStore, Note, WithdrawalRecord};
use hermes_core::{open_nullifier, NullifierSecretKey};
use serde::Serialize;
use std::fmt;

/// Hex characters holding the change amount
const AMOUNT_HEX_LEN: usize = 16;

/// Resolution errors
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// A note the chain points to is not stored
    #[error("Missing linked record: {0}")]
    MissingLinkedRecord(String),

    /// A stored note has values of the wrong shape
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    /// Change amount absent, unparsable or negative
    #[error("Invalid change amount: {0}")]
    InvalidChangeAmount(String),

    /// More hops than notes in the ledger
    #[error("Chain too long: {0}")]
    ChainTooLong(String),

    /// A stored nullifier could not be opened with the given key
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] crate::Error),
}

impl ResolveError {
    /// Whether this error only ends one chain rather than the whole query
    pub fn is_chain_local(&self) -> bool {
        matches!(
            self,
            ResolveError::MissingLinkedRecord(_)
                | ResolveError::MalformedRecord(_)
                | ResolveError::InvalidChangeAmount(_)
                | ResolveError::ChainTooLong(_)
        )
    }
}

/// Origin of an unspent amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnspentKind {
    /// Deposit never withdrawn
    Deposit,
    /// Change left by the last withdrawal in a chain
    Change,
}

impl fmt::Display for UnspentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnspentKind::Deposit => f.write_str("deposit"),
            UnspentKind::Change => f.write_str("change"),
        }
    }
}

/// Unspent value held by an address
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnspentRecord {
    /// Deposit or change
    pub kind: UnspentKind,
    /// Amount in microunits
    pub amount: u64,
    /// Leaf of the unspent note
    pub leaf_index: u64,
    /// Secret-note text, when kept
    pub secret_note: Option<String>,
}

/// Resolution result for one address
#[derive(Debug, Default)]
pub struct ResolveReport {
    /// Unspent notes, in deposit order
    pub records: Vec<UnspentRecord>,
    /// Chains cut short, with the reason
    pub anomalies: Vec<ResolveError>,
}

impl ResolveReport {
    /// Sum of unspent amounts
    pub fn total(&self) -> u64 {
        self.records.iter().map(|r| r.amount).sum()
    }
}

/// Walks deposit → withdrawal → change chains for an address
pub struct ChangeChainResolver<'a> {
    store: &'a LedgerStore,
    key: &'a NullifierSecretKey,
    max_hops: Option<u64>,
}

impl<'a> ChangeChainResolver<'a> {
    /// Create a resolver; hops are bounded by the number of stored notes
    pub fn new(store: &'a LedgerStore, key: &'a NullifierSecretKey) -> Self {
        Self {
            store,
            key,
            max_hops: None,
        }
    }

    /// Override the hop bound
    pub fn with_max_hops(mut self, max_hops: u64) -> Self {
        self.max_hops = Some(max_hops);
        self
    }

    /// Unspent notes of `address`
    pub fn resolve(&self, address: &str) -> Result<ResolveReport, ResolveError> {
        let max_hops = match self.max_hops {
            Some(hops) => hops,
            None => self.store.note_count()?.max(1),
        };

        let deposits = self.store.deposits_for_address(address)?;
        tracing::debug!(address, deposits = deposits.len(), max_hops, "Resolving unspent notes");

        let mut report = ResolveReport::default();
        for deposit in deposits {
            let note = match self.note(deposit.leaf_index) {
                Ok(note) => note,
                Err(err) if err.is_chain_local() => {
                    tracing::warn!(leaf_index = deposit.leaf_index, "{}", err);
                    report.anomalies.push(err);
                    continue;
                }
                Err(err) => return Err(err),
            };
            let Some(note) = note else {
                let err = ResolveError::MissingLinkedRecord(format!(
                    "no note for deposit at leaf {}",
                    deposit.leaf_index
                ));
                tracing::warn!(leaf_index = deposit.leaf_index, "{}", err);
                report.anomalies.push(err);
                continue;
            };

            let Some(withdrawal) = self.spent_by(&note)? else {
                report.records.push(UnspentRecord {
                    kind: UnspentKind::Deposit,
                    amount: deposit.amount,
                    leaf_index: deposit.leaf_index,
                    secret_note: self.store.debug_note_text(deposit.leaf_index)?,
                });
                continue;
            };

            match self.follow_chain(deposit.leaf_index, withdrawal, max_hops) {
                Ok(Some(record)) => report.records.push(record),
                Ok(None) => {}
                Err(err) if err.is_chain_local() => {
                    tracing::warn!(leaf_index = deposit.leaf_index, "Chain ended early: {}", err);
                    report.anomalies.push(err);
                }
                Err(err) => return Err(err),
            }
        }

        Ok(report)
    }

    /// Follow change notes from the withdrawal that spent a deposit.
    /// `None` means the chain ended with no change left.
    fn follow_chain(
        &self,
        start_leaf: u64,
        mut withdrawal: WithdrawalRecord,
        max_hops: u64,
    ) -> Result<Option<UnspentRecord>, ResolveError> {
        let mut hops = 0u64;

        loop {
            hops += 1;
            if hops > max_hops {
                return Err(ResolveError::ChainTooLong(format!(
                    "chain from leaf {} exceeded {} hops",
                    start_leaf, max_hops
                )));
            }

            let change_leaf = withdrawal.leaf_index;
            let Some(change) = self.note(change_leaf)? else {
                return Err(ResolveError::MissingLinkedRecord(format!(
                    "no change note at leaf {} (withdrawal {})",
                    change_leaf, withdrawal.txn_id
                )));
            };

            let text = self.store.debug_note_text(change_leaf)?;
            let amount = parse_change_amount(text.as_deref()).map_err(|reason| {
                ResolveError::InvalidChangeAmount(format!("leaf {}: {}", change_leaf, reason))
            })?;

            if amount < 0 {
                return Err(ResolveError::InvalidChangeAmount(format!(
                    "leaf {}: negative change {}",
                    change_leaf, amount
                )));
            }
            if amount == 0 {
                tracing::debug!(leaf_index = change_leaf, hops, "Chain ends with zero change");
                return Ok(None);
            }

            match self.spent_by(&change)? {
                None => {
                    let amount = u64::try_from(amount).map_err(|_| {
                        ResolveError::InvalidChangeAmount(format!(
                            "leaf {}: change {} out of range",
                            change_leaf, amount
                        ))
                    })?;
                    return Ok(Some(UnspentRecord {
                        kind: UnspentKind::Change,
                        amount,
                        leaf_index: change_leaf,
                        secret_note: text,
                    }));
                }
                Some(next) => withdrawal = next,
            }
        }
    }

    /// Note at `leaf_index`; a row that does not decode is chain-local
    fn note(&self, leaf_index: u64) -> Result<Option<Note>, ResolveError> {
        match self.store.note(leaf_index) {
            Ok(note) => Ok(note),
            Err(crate::Error::Database(e @ rusqlite::Error::FromSqlConversionFailure(..))) => {
                Err(ResolveError::MalformedRecord(format!(
                    "note at leaf {}: {}",
                    leaf_index, e
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Withdrawal that spent `note`, if any. A note without a nullifier
    /// has not been linked to a spend and counts as unspent.
    fn spent_by(&self, note: &Note) -> Result<Option<WithdrawalRecord>, ResolveError> {
        let Some(blob) = note.nullifier.as_deref() else {
            return Ok(None);
        };
        let nullifier = open_nullifier(blob, self.key).map_err(|e| {
            ResolveError::Decryption(format!("note at leaf {}: {}", note.leaf_index, e))
        })?;
        Ok(self.store.withdrawal_spending(&nullifier)?)
    }
}

/// Parse the change amount from secret-note text: the first 16 characters
/// as a signed hexadecimal integer.
pub fn parse_change_amount(text: Option<&str>) -> Result<i128, String> {
    let text = text.ok_or_else(|| "no secret note".to_string())?;
    let head = text
        .get(..AMOUNT_HEX_LEN)
        .ok_or_else(|| format!("need {} hex characters, found {:?}", AMOUNT_HEX_LEN, text))?;
    i128::from_str_radix(head, 16).map_err(|e| format!("{:?} is not hex: {}", head, e))
}
