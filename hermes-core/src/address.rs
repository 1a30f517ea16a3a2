//! Algorand address codec
//!
//! An ABI `address` is a 32-byte public key. Its textual form is the
//! unpadded base32 encoding of the key followed by the last four bytes of
//! its SHA-512/256 digest.

use crate::{Error, Result};
use data_encoding::BASE32_NOPAD;
use sha2::{Digest, Sha512_256};

/// Raw public key length
pub const PUBLIC_KEY_LENGTH: usize = 32;

/// Checksum length appended before encoding
pub const CHECKSUM_LENGTH: usize = 4;

/// Length of the textual address
pub const ADDRESS_LENGTH: usize = 58;

fn checksum(public_key: &[u8; PUBLIC_KEY_LENGTH]) -> [u8; CHECKSUM_LENGTH] {
    let digest = Sha512_256::digest(public_key);
    let mut out = [0u8; CHECKSUM_LENGTH];
    out.copy_from_slice(&digest[digest.len() - CHECKSUM_LENGTH..]);
    out
}

/// Encode a public key as an address string
pub fn encode_address(public_key: &[u8; PUBLIC_KEY_LENGTH]) -> String {
    let mut raw = Vec::with_capacity(PUBLIC_KEY_LENGTH + CHECKSUM_LENGTH);
    raw.extend_from_slice(public_key);
    raw.extend_from_slice(&checksum(public_key));
    BASE32_NOPAD.encode(&raw)
}

/// Decode and checksum-verify an address string
pub fn decode_address(address: &str) -> Result<[u8; PUBLIC_KEY_LENGTH]> {
    if address.len() != ADDRESS_LENGTH {
        return Err(Error::InvalidAddress(format!(
            "expected {} characters, got {}",
            ADDRESS_LENGTH,
            address.len()
        )));
    }

    let raw = BASE32_NOPAD
        .decode(address.as_bytes())
        .map_err(|e| Error::InvalidAddress(format!("base32: {}", e)))?;
    if raw.len() != PUBLIC_KEY_LENGTH + CHECKSUM_LENGTH {
        return Err(Error::InvalidAddress(format!(
            "decoded to {} bytes",
            raw.len()
        )));
    }

    let mut public_key = [0u8; PUBLIC_KEY_LENGTH];
    public_key.copy_from_slice(&raw[..PUBLIC_KEY_LENGTH]);
    if raw[PUBLIC_KEY_LENGTH..] != checksum(&public_key) {
        return Err(Error::InvalidAddress("checksum mismatch".to_string()));
    }

    Ok(public_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ZERO_ADDRESS: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAY5HFKQ";

    #[test]
    fn test_zero_key_address() {
        assert_eq!(encode_address(&[0u8; 32]), ZERO_ADDRESS);
        assert_eq!(decode_address(ZERO_ADDRESS).unwrap(), [0u8; 32]);
    }

    #[test]
    fn test_decode_recovers_key() {
        let key: [u8; 32] = core::array::from_fn(|i| (i * 7 + 3) as u8);
        let address = encode_address(&key);
        assert_eq!(address.len(), ADDRESS_LENGTH);
        assert_eq!(decode_address(&address).unwrap(), key);
    }

    #[test]
    fn test_checksum_mismatch_rejected() {
        let mut tampered = ZERO_ADDRESS.to_string();
        tampered.replace_range(0..1, "B");
        assert!(matches!(
            decode_address(&tampered),
            Err(Error::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_wrong_length_rejected() {
        assert!(decode_address("AAAA").is_err());
        assert!(decode_address(&format!("{}A", ZERO_ADDRESS)).is_err());
    }
}
