//! Property-based tests for hermes-core
//!
//! Uses proptest to verify invariants across randomized inputs

use hermes_core::nullifier::{self, NullifierSecretKey};
use hermes_core::wire::testing::encode_log;
use hermes_core::{decode_log, looks_encrypted, MIN_ENCRYPTED_LEN, TXN_RESULT_LEN};
use proptest::prelude::*;

fn fixed_secret() -> NullifierSecretKey {
    NullifierSecretKey::from_bytes([0x24; 32])
}

proptest! {
    /// Property: decrypt(encrypt(n, pub), priv) == n
    #[test]
    fn prop_seal_open_round_trip(plain in prop::collection::vec(any::<u8>(), 0..96)) {
        let secret = fixed_secret();
        let sealed = nullifier::encrypt(Some(plain.as_slice()), &secret.public_key())
            .unwrap()
            .unwrap();
        prop_assert!(looks_encrypted(&sealed));
        prop_assert_eq!(nullifier::decrypt(&sealed, &secret).unwrap(), plain);
    }

    /// Property: values shorter than 56 bytes are legacy plaintext
    #[test]
    fn prop_legacy_pass_through(blob in prop::collection::vec(any::<u8>(), 0..MIN_ENCRYPTED_LEN)) {
        prop_assert!(!looks_encrypted(&blob));
        prop_assert_eq!(nullifier::decrypt(&blob, &fixed_secret()).unwrap(), blob);
    }

    /// Property: a 44-byte log decodes to exactly the encoded pair
    #[test]
    fn prop_decode_log_exact(leaf_index in any::<u64>(), root in any::<[u8; 32]>()) {
        let decoded = decode_log(&encode_log(leaf_index, &root)).unwrap();
        prop_assert_eq!(decoded.leaf_index, leaf_index);
        prop_assert_eq!(decoded.tree_root, root);
    }

    /// Property: any other length fails
    #[test]
    fn prop_decode_log_rejects_other_lengths(raw in prop::collection::vec(any::<u8>(), 0..128)) {
        prop_assume!(raw.len() != TXN_RESULT_LEN);
        prop_assert!(decode_log(&raw).is_err());
    }
}
