//! Nullifier sealing at rest
//!
//! Nullifiers are sealed to a fixed recipient key with a NaCl box
//! (X25519 + XSalsa20-Poly1305) under a fresh ephemeral key pair, so that
//! anyone with the public key can write them but only the holder of the
//! secret key can link a note to its spend.
//!
//! Stored layout: `ephemeral_public_key(32) ‖ nonce(24) ‖ ciphertext`.
//! Other services read and write the same column; the layout must stay
//! byte-compatible with libsodium/NaCl `crypto_box`.

use crate::{Bytes32, Error, Result};
use crypto_box::aead::generic_array::GenericArray;
use crypto_box::aead::{Aead, AeadCore, OsRng};
use crypto_box::{PublicKey, SalsaBox, SecretKey};
use std::path::Path;
use zeroize::Zeroizing;

/// Ephemeral public key length
pub const EPHEMERAL_KEY_SIZE: usize = 32;

/// Box nonce length
pub const NONCE_SIZE: usize = 24;

/// Anything shorter than this is a legacy plaintext nullifier
pub const MIN_ENCRYPTED_LEN: usize = EPHEMERAL_KEY_SIZE + NONCE_SIZE;

/// Plaintext nullifier length
pub const NULLIFIER_SIZE: usize = 32;

/// Recipient public key used to seal nullifiers
#[derive(Clone, PartialEq, Eq)]
pub struct NullifierPublicKey(PublicKey);

impl NullifierPublicKey {
    /// From raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(PublicKey::from(bytes))
    }

    /// From a raw slice of exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; 32] = bytes.try_into().map_err(|_| {
            Error::InvalidKey(format!("public key is {} bytes; expected 32", bytes.len()))
        })?;
        Ok(Self::from_bytes(raw))
    }

    /// Read a raw 32-byte key file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        Self::from_slice(&bytes)
    }

    /// Write the raw 32-byte key file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path.as_ref(), self.as_bytes())?;
        Ok(())
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

impl std::fmt::Debug for NullifierPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NullifierPublicKey({})", hex::encode(self.as_bytes()))
    }
}

/// Recipient secret key used to open nullifiers
#[derive(Clone)]
pub struct NullifierSecretKey(SecretKey);

impl NullifierSecretKey {
    /// Generate a fresh key
    pub fn generate() -> Self {
        Self(SecretKey::generate(&mut OsRng))
    }

    /// From raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(SecretKey::from(bytes))
    }

    /// Parse a 64-character hex secret
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let raw = Zeroizing::new(
            hex::decode(hex_str.trim())
                .map_err(|_| Error::InvalidKey("secret key must be a valid hex string".to_string()))?,
        );
        let bytes: [u8; 32] = raw.as_slice().try_into().map_err(|_| {
            Error::InvalidKey("secret key must be 32 bytes (64 hex characters)".to_string())
        })?;
        Ok(Self::from_bytes(bytes))
    }

    /// Hex encoding of the secret; callers must not persist it
    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.0.to_bytes()))
    }

    /// Matching public key
    pub fn public_key(&self) -> NullifierPublicKey {
        NullifierPublicKey(self.0.public_key())
    }
}

impl std::fmt::Debug for NullifierSecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("NullifierSecretKey(..)")
    }
}

/// Generate a recipient key pair
pub fn generate_keypair() -> (NullifierSecretKey, NullifierPublicKey) {
    let secret = NullifierSecretKey::generate();
    let public = secret.public_key();
    (secret, public)
}

/// Seal a nullifier to `recipient`. `None` passes through as `None`.
pub fn encrypt(nullifier: Option<&[u8]>, recipient: &NullifierPublicKey) -> Result<Option<Vec<u8>>> {
    let Some(plaintext) = nullifier else {
        return Ok(None);
    };

    let ephemeral = SecretKey::generate(&mut OsRng);
    let nonce = SalsaBox::generate_nonce(&mut OsRng);
    let ciphertext = SalsaBox::new(&recipient.0, &ephemeral)
        .encrypt(&nonce, plaintext)
        .map_err(|e| Error::Encryption(e.to_string()))?;

    let mut sealed = Vec::with_capacity(MIN_ENCRYPTED_LEN + ciphertext.len());
    sealed.extend_from_slice(ephemeral.public_key().as_bytes());
    sealed.extend_from_slice(nonce.as_slice());
    sealed.extend_from_slice(&ciphertext);
    Ok(Some(sealed))
}

/// Open a stored nullifier.
///
/// Values shorter than [`MIN_ENCRYPTED_LEN`] are legacy plaintext and are
/// returned unchanged. A failed authentication is reported as
/// [`Error::DecryptionFailure`] rather than handing back the ciphertext.
pub fn decrypt(blob: &[u8], recipient: &NullifierSecretKey) -> Result<Vec<u8>> {
    if !looks_encrypted(blob) {
        tracing::trace!(len = blob.len(), "Passing through legacy plaintext nullifier");
        return Ok(blob.to_vec());
    }

    let mut ephemeral = [0u8; EPHEMERAL_KEY_SIZE];
    ephemeral.copy_from_slice(&blob[..EPHEMERAL_KEY_SIZE]);
    let nonce = GenericArray::from_slice(&blob[EPHEMERAL_KEY_SIZE..MIN_ENCRYPTED_LEN]);
    let ciphertext = &blob[MIN_ENCRYPTED_LEN..];

    SalsaBox::new(&PublicKey::from(ephemeral), &recipient.0)
        .decrypt(nonce, ciphertext)
        .map_err(|_| {
            Error::DecryptionFailure(format!(
                "authentication failed for {}-byte sealed nullifier",
                blob.len()
            ))
        })
}

/// Open a stored nullifier and require a 32-byte result
pub fn open_nullifier(blob: &[u8], recipient: &NullifierSecretKey) -> Result<Bytes32> {
    let plaintext = decrypt(blob, recipient)?;
    plaintext.as_slice().try_into().map_err(|_| {
        Error::DecryptionFailure(format!(
            "opened nullifier is {} bytes; expected {}",
            plaintext.len(),
            NULLIFIER_SIZE
        ))
    })
}

/// Heuristic used by migrations to skip values already sealed.
/// Not a security check.
pub fn looks_encrypted(blob: &[u8]) -> bool {
    blob.len() >= MIN_ENCRYPTED_LEN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_and_open() {
        let (secret, public) = generate_keypair();
        let nullifier = [0x5au8; 32];

        let sealed = encrypt(Some(&nullifier[..]), &public).unwrap().unwrap();
        // 16-byte Poly1305 tag
        assert_eq!(sealed.len(), MIN_ENCRYPTED_LEN + NULLIFIER_SIZE + 16);
        assert!(looks_encrypted(&sealed));

        assert_eq!(open_nullifier(&sealed, &secret).unwrap(), nullifier);
    }

    #[test]
    fn test_encrypt_is_randomized() {
        let (_, public) = generate_keypair();
        let a = encrypt(Some(&[1u8; 32][..]), &public).unwrap().unwrap();
        let b = encrypt(Some(&[1u8; 32][..]), &public).unwrap().unwrap();
        assert_ne!(a, b);
        assert_ne!(a[..EPHEMERAL_KEY_SIZE], b[..EPHEMERAL_KEY_SIZE]);
    }

    #[test]
    fn test_none_passes_through() {
        let (_, public) = generate_keypair();
        assert_eq!(encrypt(None, &public).unwrap(), None);
    }

    #[test]
    fn test_legacy_plaintext_returned_unchanged() {
        let (secret, _) = generate_keypair();
        let legacy = [9u8; 32];
        assert!(!looks_encrypted(&legacy));
        assert_eq!(decrypt(&legacy, &secret).unwrap(), legacy.to_vec());
        assert_eq!(open_nullifier(&legacy, &secret).unwrap(), legacy);
    }

    #[test]
    fn test_wrong_key_is_decryption_failure() {
        let (_, public) = generate_keypair();
        let (other_secret, _) = generate_keypair();
        let sealed = encrypt(Some(&[3u8; 32][..]), &public).unwrap().unwrap();

        assert!(matches!(
            decrypt(&sealed, &other_secret),
            Err(Error::DecryptionFailure(_))
        ));
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let (secret, public) = generate_keypair();
        let mut sealed = encrypt(Some(&[3u8; 32][..]), &public).unwrap().unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(
            decrypt(&sealed, &secret),
            Err(Error::DecryptionFailure(_))
        ));
    }

    #[test]
    fn test_open_requires_32_bytes() {
        let (secret, public) = generate_keypair();
        let sealed = encrypt(Some(&b"short"[..]), &public).unwrap().unwrap();
        assert_eq!(decrypt(&sealed, &secret).unwrap(), b"short".to_vec());
        assert!(matches!(
            open_nullifier(&sealed, &secret),
            Err(Error::DecryptionFailure(_))
        ));
        assert!(open_nullifier(&[1u8; 16], &secret).is_err());
    }

    #[test]
    fn test_secret_hex_round_trip() {
        let secret = NullifierSecretKey::generate();
        let parsed = NullifierSecretKey::from_hex(&secret.to_hex()).unwrap();
        assert_eq!(parsed.public_key(), secret.public_key());

        assert!(NullifierSecretKey::from_hex("abcd").is_err());
        assert!(NullifierSecretKey::from_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn test_public_key_file() {
        let (_, public) = generate_keypair();
        let file = tempfile::NamedTempFile::new().unwrap();
        public.save(file.path()).unwrap();
        assert_eq!(NullifierPublicKey::load(file.path()).unwrap(), public);

        std::fs::write(file.path(), [0u8; 31]).unwrap();
        assert!(matches!(
            NullifierPublicKey::load(file.path()),
            Err(Error::InvalidKey(_))
        ));
    }
}
