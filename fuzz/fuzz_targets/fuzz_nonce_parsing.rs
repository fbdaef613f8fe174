//! Fuzz target for response nonce parsing.
//!
//! Nonces arrive in assertions from arbitrary Relying Parties and are
//! parsed before any signature check, so parsing must never panic.
//!
//! Run with:
//! cargo +nightly fuzz run fuzz_nonce_parsing -- -max_total_time=600

#![no_main]

use libfuzzer_sys::fuzz_target;
use xavyo_openid::ResponseNonce;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(nonce) = ResponseNonce::parse(s) {
            assert!(nonce.unique.bytes().all(|b| (33..=126).contains(&b)));
            let _ = nonce.to_string();
        }
    }
});
