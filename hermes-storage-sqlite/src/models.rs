//! Typed ledger rows
//!
//! Every table row is decoded into one of these structs at the storage
//! boundary; nothing above this module reads columns by name.

use hermes_core::Bytes32;
use rusqlite::types::Type;
use rusqlite::Row;
use serde::Serialize;

/// A note in the commitment tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    /// Position in the on-chain tree
    pub leaf_index: u64,
    /// Note commitment
    pub commitment: Bytes32,
    /// Creating transaction
    pub txn_id: String,
    /// Sealed nullifier (or legacy plaintext), once known
    pub nullifier: Option<Vec<u8>>,
}

impl Note {
    /// Note observed on chain, nullifier not yet known
    pub fn new(leaf_index: u64, commitment: Bytes32, txn_id: impl Into<String>) -> Self {
        Self {
            leaf_index,
            commitment,
            txn_id: txn_id.into(),
            nullifier: None,
        }
    }

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            leaf_index: u64_column(row, 0)?,
            commitment: bytes32_column(row, 1)?,
            txn_id: row.get(2)?,
            nullifier: row.get(3)?,
        })
    }
}

/// Deposit fields decoded from a deposit call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deposit {
    /// Leaf of the deposited note
    pub leaf_index: u64,
    /// Depositor address
    pub address: String,
    /// Amount in microunits
    pub amount: u64,
}

/// Withdrawal fields decoded from a withdraw call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Withdrawal {
    /// Leaf of the change note
    pub leaf_index: u64,
    /// Recipient address
    pub address: String,
    /// Plaintext nullifier of the spent note
    pub nullifier: Bytes32,
    /// Amount withdrawn in microunits
    pub amount: u64,
    /// Fee in microunits
    pub fee: u64,
}

/// A stored deposit row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositRecord {
    /// Leaf of the deposited note
    pub leaf_index: u64,
    /// Deposit transaction
    pub txn_id: String,
    /// Depositor address
    pub address: String,
    /// Amount in microunits
    pub amount: u64,
    /// Confirmation round
    pub confirmed_block: u64,
}

impl DepositRecord {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            leaf_index: u64_column(row, 0)?,
            txn_id: row.get(1)?,
            address: row.get(2)?,
            amount: u64_column(row, 3)?,
            confirmed_block: u64_column(row, 4)?,
        })
    }
}

/// A stored withdrawal row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalRecord {
    /// Leaf of the change note
    pub leaf_index: u64,
    /// Withdrawal transaction
    pub txn_id: String,
    /// Recipient address
    pub address: String,
    /// Amount withdrawn in microunits
    pub amount: u64,
    /// Fee in microunits
    pub fee: u64,
    /// Confirmation round
    pub confirmed_block: u64,
}

impl WithdrawalRecord {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            leaf_index: u64_column(row, 0)?,
            txn_id: row.get(1)?,
            address: row.get(2)?,
            amount: u64_column(row, 3)?,
            fee: u64_column(row, 4)?,
            confirmed_block: u64_column(row, 5)?,
        })
    }
}

/// Pending note written by a frontend before confirmation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnconfirmedNote {
    /// Row id
    pub id: i64,
    /// Note commitment
    pub commitment: Vec<u8>,
    /// Sealed (or legacy plaintext) nullifier
    pub nullifier: Option<Vec<u8>>,
    /// Submitted transaction, if any
    pub txn_id: Option<String>,
}

impl UnconfirmedNote {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            commitment: row.get(1)?,
            nullifier: row.get(2)?,
            txn_id: row.get(3)?,
        })
    }
}

/// Latest commitment tree root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeRoot {
    /// Root hash
    pub value: Bytes32,
    /// Leaves in the tree when this root was produced
    pub leaf_count: u64,
}

/// Running pool totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    /// Sum of deposit amounts
    pub total_deposits: u64,
    /// Sum of withdrawal amounts
    pub total_withdrawals: u64,
    /// Sum of withdrawal fees
    pub total_fees: u64,
    /// Number of deposits
    pub count_deposits: u64,
}

/// Convert for binding; SQLite integers are signed 64-bit
pub(crate) fn sql_int(value: u64) -> crate::Result<i64> {
    i64::try_from(value)
        .map_err(|_| crate::Error::Validation(format!("{} does not fit in an SQLite integer", value)))
}

pub(crate) fn u64_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(idx)?;
    u64::try_from(value).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            format!("negative value {} in unsigned column", value).into(),
        )
    })
}

pub(crate) fn bytes32_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Bytes32> {
    let value: Vec<u8> = row.get(idx)?;
    value.as_slice().try_into().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Blob,
            format!("expected 32 bytes, found {}", value.len()).into(),
        )
    })
}
