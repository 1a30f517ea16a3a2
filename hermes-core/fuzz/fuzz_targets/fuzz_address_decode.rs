//! Fuzz test for address decoding
//!
//! Ensures address parser handles malformed input gracefully

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // Should never panic, only return Err for invalid input
        if let Ok(key) = hermes_core::decode_address(s) {
            assert_eq!(hermes_core::encode_address(&key), s);
        }
    }
});
