//! Fuzz test for log and argument decoding
//!
//! Arbitrary logs and ARC4 arrays must decode or fail, never panic.

#![no_main]

use hermes_core::wire::Bytes32Array;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = hermes_core::decode_log(data);

    if let Ok(array) = Bytes32Array::parse(data.to_vec()) {
        for i in 0..=array.len() {
            let _ = array.element(i);
        }
    }

    if let Ok(s) = std::str::from_utf8(data) {
        let parts: Vec<&str> = s.split(',').collect();
        let _ = hermes_core::decode_deposit_args(&parts);
        let _ = hermes_core::decode_withdraw_args(&parts, &parts);
    }
});
