//! On-chain wire format
//!
//! Decodes the method result log and the ARC4 arguments of the two
//! supported application calls. All offsets are fixed by the method
//! signatures in `hermes-params`.
//!
//! Layouts:
//!
//! - result log: `prefix(4) ‖ leaf_index(8, big-endian) ‖ tree_root(32)`
//! - `byte[32][]`: `count(2, big-endian) ‖ element(32) * count`

use crate::address::{encode_address, PUBLIC_KEY_LENGTH};
use crate::{Bytes32, Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

/// Length of a method result log
pub const TXN_RESULT_LEN: usize = 44;

/// ARC4 return-value prefix length
pub const RETURN_PREFIX_LEN: usize = 4;

/// Size of one `byte[32]` element
pub const ELEMENT_SIZE: usize = 32;

/// Length prefix of a dynamic ARC4 array
pub const ARRAY_HEADER_LEN: usize = 2;

const ARG_PUBLIC_INPUTS: usize = 2;
const ARG_DEPOSIT_ADDRESS: usize = 3;
const ARG_WITHDRAW_RECIPIENT: usize = 4;

const DEPOSIT_AMOUNT: usize = 0;
const DEPOSIT_COMMITMENT: usize = 1;

const WITHDRAW_AMOUNT: usize = 1;
const WITHDRAW_FEE: usize = 2;
const WITHDRAW_COMMITMENT: usize = 3;
const WITHDRAW_NULLIFIER: usize = 4;

/// Decoded method result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxnResult {
    /// Position assigned in the commitment tree
    pub leaf_index: u64,
    /// Tree root after the insertion
    pub tree_root: Bytes32,
}

/// Decoded deposit arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositArgs {
    /// Note commitment
    pub commitment: Bytes32,
    /// Depositor address
    pub address: String,
    /// Amount in microunits
    pub amount: u64,
}

/// Decoded withdraw arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawArgs {
    /// Commitment of the change note
    pub commitment: Bytes32,
    /// Address receiving the withdrawal
    pub recipient: String,
    /// Plaintext nullifier of the spent note
    pub nullifier: Bytes32,
    /// Amount withdrawn in microunits
    pub amount: u64,
    /// Fee in microunits
    pub fee: u64,
}

/// Decode a method result log
pub fn decode_log(log: &[u8]) -> Result<TxnResult> {
    if log.len() != TXN_RESULT_LEN {
        return Err(Error::MalformedLog(format!(
            "invalid length {}; expected {} bytes",
            log.len(),
            TXN_RESULT_LEN
        )));
    }

    let payload = &log[RETURN_PREFIX_LEN..];
    let mut index_bytes = [0u8; 8];
    index_bytes.copy_from_slice(&payload[..8]);
    let mut tree_root = [0u8; 32];
    tree_root.copy_from_slice(&payload[8..]);

    Ok(TxnResult {
        leaf_index: u64::from_be_bytes(index_bytes),
        tree_root,
    })
}

/// Decode a base64 method result log, as delivered by algod
pub fn decode_log_base64(log: &str) -> Result<TxnResult> {
    let raw = BASE64
        .decode(log)
        .map_err(|e| Error::MalformedLog(format!("base64: {}", e)))?;
    decode_log(&raw)
}

/// Decode `deposit(byte[32][],byte[32][],address)` arguments.
///
/// `args[0]` is the method selector; `args[2]` holds the public inputs
/// `[amount, commitment]` and `args[3]` the depositor's ABI address.
pub fn decode_deposit_args<S: AsRef<str>>(args: &[S]) -> Result<DepositArgs> {
    let inputs = Bytes32Array::parse(decode_arg(args, ARG_PUBLIC_INPUTS)?)?;

    let amount = element_as_u64(inputs.element(DEPOSIT_AMOUNT)?, "amount")?;
    let commitment = *inputs.element(DEPOSIT_COMMITMENT)?;

    let address_bytes = decode_arg(args, ARG_DEPOSIT_ADDRESS)?;
    let public_key: [u8; PUBLIC_KEY_LENGTH] = address_bytes.as_slice().try_into().map_err(|_| {
        Error::MalformedArgs(format!(
            "address argument is {} bytes; expected {}",
            address_bytes.len(),
            PUBLIC_KEY_LENGTH
        ))
    })?;

    Ok(DepositArgs {
        commitment,
        address: encode_address(&public_key),
        amount,
    })
}

/// Decode `withdraw(byte[32][],byte[32][],account,account,bool)` arguments.
///
/// Public inputs are `[recipient_mod, amount, fee, commitment, nullifier,
/// merkle_root]`. `args[4]` is a 1-based reference into `accounts`.
pub fn decode_withdraw_args<S: AsRef<str>, A: AsRef<str>>(
    args: &[S],
    accounts: &[A],
) -> Result<WithdrawArgs> {
    let inputs = Bytes32Array::parse(decode_arg(args, ARG_PUBLIC_INPUTS)?)?;

    let amount = element_as_u64(inputs.element(WITHDRAW_AMOUNT)?, "amount")?;
    let fee = element_as_u64(inputs.element(WITHDRAW_FEE)?, "fee")?;
    let commitment = *inputs.element(WITHDRAW_COMMITMENT)?;
    let nullifier = *inputs.element(WITHDRAW_NULLIFIER)?;

    let reference = account_reference(&decode_arg(args, ARG_WITHDRAW_RECIPIENT)?)?;
    let position = reference
        .checked_sub(1)
        .ok_or_else(|| Error::MalformedArgs("recipient account reference is 0".to_string()))?;
    let recipient = accounts
        .get(position)
        .ok_or_else(|| {
            Error::MalformedArgs(format!(
                "recipient account reference {} out of bounds ({} accounts)",
                reference,
                accounts.len()
            ))
        })?
        .as_ref()
        .to_string();

    Ok(WithdrawArgs {
        commitment,
        recipient,
        nullifier,
        amount,
        fee,
    })
}

fn decode_arg<S: AsRef<str>>(args: &[S], index: usize) -> Result<Vec<u8>> {
    let arg = args.get(index).ok_or_else(|| {
        Error::MalformedArgs(format!("missing argument {} ({} given)", index, args.len()))
    })?;
    BASE64
        .decode(arg.as_ref())
        .map_err(|e| Error::MalformedArgs(format!("argument {} base64: {}", index, e)))
}

fn account_reference(raw: &[u8]) -> Result<usize> {
    if raw.is_empty() {
        return Err(Error::MalformedArgs("empty account reference".to_string()));
    }
    raw.iter().try_fold(0usize, |acc, b| {
        acc.checked_mul(256)
            .and_then(|v| v.checked_add(usize::from(*b)))
            .ok_or_else(|| Error::MalformedArgs("account reference overflows".to_string()))
    })
}

/// Low 8 bytes of a `byte[32]` element. The contract writes uint64
/// values left-padded with zeros, so any nonzero high byte is rejected
/// rather than truncated.
fn element_as_u64(element: &Bytes32, field: &str) -> Result<u64> {
    let (high, low) = element.split_at(ELEMENT_SIZE - 8);
    if high.iter().any(|b| *b != 0) {
        return Err(Error::MalformedArgs(format!("{} does not fit in uint64", field)));
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(low);
    Ok(u64::from_be_bytes(bytes))
}

/// ARC4 dynamic array of `byte[32]`
#[derive(Debug, Clone)]
pub struct Bytes32Array {
    elements: Vec<Bytes32>,
}

impl Bytes32Array {
    /// Parse `count(2) ‖ element(32) * count`
    pub fn parse(raw: Vec<u8>) -> Result<Self> {
        if raw.len() < ARRAY_HEADER_LEN {
            return Err(Error::MalformedArgs("byte[32][] missing length prefix".to_string()));
        }
        let count = usize::from(u16::from_be_bytes([raw[0], raw[1]]));
        let expected = ARRAY_HEADER_LEN + count * ELEMENT_SIZE;
        if raw.len() != expected {
            return Err(Error::MalformedArgs(format!(
                "byte[32][] of {} elements is {} bytes; expected {}",
                count,
                raw.len(),
                expected
            )));
        }

        let elements = raw[ARRAY_HEADER_LEN..]
            .chunks_exact(ELEMENT_SIZE)
            .map(|chunk| {
                let mut element = [0u8; ELEMENT_SIZE];
                element.copy_from_slice(chunk);
                element
            })
            .collect();
        Ok(Self { elements })
    }

    /// Element `i`, read at offset `2 + i*32`
    pub fn element(&self, i: usize) -> Result<&Bytes32> {
        self.elements.get(i).ok_or_else(|| {
            Error::MalformedArgs(format!(
                "byte[32][] has {} elements; element {} requested",
                self.elements.len(),
                i
            ))
        })
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// True if the array has no elements
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// Encoders producing the on-chain layouts, for tests and fixtures.
#[cfg(any(test, feature = "test-helpers"))]
pub mod testing {
    use super::*;

    /// Result log bytes for `(leaf_index, tree_root)`
    pub fn encode_log(leaf_index: u64, tree_root: &Bytes32) -> Vec<u8> {
        let mut out = Vec::with_capacity(TXN_RESULT_LEN);
        out.extend_from_slice(&[0x15, 0x1f, 0x7c, 0x75]);
        out.extend_from_slice(&leaf_index.to_be_bytes());
        out.extend_from_slice(tree_root);
        out
    }

    /// `uint64` left-padded into a `byte[32]` element
    pub fn u64_element(value: u64) -> Bytes32 {
        let mut out = [0u8; ELEMENT_SIZE];
        out[ELEMENT_SIZE - 8..].copy_from_slice(&value.to_be_bytes());
        out
    }

    /// Encode a `byte[32][]`
    pub fn encode_array(elements: &[Bytes32]) -> Vec<u8> {
        let mut out = Vec::with_capacity(ARRAY_HEADER_LEN + elements.len() * ELEMENT_SIZE);
        out.extend_from_slice(&(elements.len() as u16).to_be_bytes());
        for element in elements {
            out.extend_from_slice(element);
        }
        out
    }

    /// Base64 helper
    pub fn b64(raw: &[u8]) -> String {
        BASE64.encode(raw)
    }

    /// Deposit call arguments as delivered by algod
    pub fn deposit_args(commitment: &Bytes32, depositor_key: &Bytes32, amount: u64) -> Vec<String> {
        vec![
            b64(b"\x01\x02\x03\x04"),
            b64(&encode_array(&[[0xaa; 32], [0xbb; 32]])),
            b64(&encode_array(&[u64_element(amount), *commitment])),
            b64(depositor_key),
        ]
    }

    /// Withdraw call arguments as delivered by algod; `recipient_ref` is 1-based
    pub fn withdraw_args(
        commitment: &Bytes32,
        nullifier: &Bytes32,
        amount: u64,
        fee: u64,
        recipient_ref: u8,
    ) -> Vec<String> {
        vec![
            b64(b"\x05\x06\x07\x08"),
            b64(&encode_array(&[[0xaa; 32], [0xbb; 32]])),
            b64(&encode_array(&[
                [0u8; 32],
                u64_element(amount),
                u64_element(fee),
                *commitment,
                *nullifier,
                [0xcc; 32],
            ])),
            b64(&[1]),
            b64(&[recipient_ref]),
            b64(&[0]),
        ]
    }
}
