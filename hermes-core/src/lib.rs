//! HermesVault ledger core
//!
//! Decoding of the on-chain wire format (transaction logs and ARC4 call
//! arguments), sealing and opening of nullifiers at rest, and the small
//! value types shared by the storage and ingestion crates.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod address;
pub mod amount;
pub mod error;
pub mod nullifier;
pub mod wire;

pub use address::{decode_address, encode_address, ADDRESS_LENGTH, PUBLIC_KEY_LENGTH};
pub use amount::format_microunits;
pub use error::{Error, ErrorCategory, Result};
pub use nullifier::{
    generate_keypair, looks_encrypted, open_nullifier, NullifierPublicKey, NullifierSecretKey,
    EPHEMERAL_KEY_SIZE, MIN_ENCRYPTED_LEN, NONCE_SIZE, NULLIFIER_SIZE,
};
pub use wire::{
    decode_deposit_args, decode_log, decode_log_base64, decode_withdraw_args, Bytes32Array,
    DepositArgs, TxnResult, WithdrawArgs, ELEMENT_SIZE, TXN_RESULT_LEN,
};

/// 32-byte value as carried in `byte[32]` ARC4 elements
pub type Bytes32 = [u8; 32];
