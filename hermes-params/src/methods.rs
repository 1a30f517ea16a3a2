//! ARC4 method signatures handled by the ledger
//!
//! Both methods return `(uint64 leaf_index, byte[32] tree_root)`. Changing
//! either signature changes the wire layout decoded by `hermes-core`.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512_256};

/// Deposit method signature
pub const DEPOSIT_SIGNATURE: &str = "deposit(byte[32][],byte[32][],address)(uint64,byte[32])";

/// Withdraw method signature
pub const WITHDRAW_SIGNATURE: &str =
    "withdraw(byte[32][],byte[32][],account,account,bool)(uint64,byte[32])";

/// Subscription filter name for deposits
pub const DEPOSIT_FILTER_NAME: &str = "deposit";

/// Subscription filter name for withdrawals
pub const WITHDRAW_FILTER_NAME: &str = "withdraw";

/// Kind of application call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodKind {
    /// Deposit into the pool
    Deposit,
    /// Withdrawal from the pool (may leave a change note)
    Withdraw,
}

impl MethodKind {
    /// All supported kinds
    pub const ALL: [MethodKind; 2] = [MethodKind::Deposit, MethodKind::Withdraw];

    /// Subscription filter name
    pub const fn filter_name(self) -> &'static str {
        match self {
            MethodKind::Deposit => DEPOSIT_FILTER_NAME,
            MethodKind::Withdraw => WITHDRAW_FILTER_NAME,
        }
    }

    /// ARC4 method signature
    pub const fn signature(self) -> &'static str {
        match self {
            MethodKind::Deposit => DEPOSIT_SIGNATURE,
            MethodKind::Withdraw => WITHDRAW_SIGNATURE,
        }
    }

    /// ARC4 method selector (first argument of every call)
    pub fn selector(self) -> [u8; 4] {
        method_selector(self.signature())
    }

    /// Value stored in the `txns.txn_type` column
    pub const fn txn_type(self) -> i64 {
        match self {
            MethodKind::Deposit => 0,
            MethodKind::Withdraw => 1,
        }
    }

    /// Resolve a kind from its filter name
    pub fn from_filter_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.filter_name() == name)
    }
}

/// First four bytes of SHA-512/256 over an ARC4 method signature
pub fn method_selector(signature: &str) -> [u8; 4] {
    let digest = Sha512_256::digest(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}
