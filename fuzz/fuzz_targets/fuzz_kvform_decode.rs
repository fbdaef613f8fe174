//! Fuzz target for key-value form decoding.
//!
//! Direct response bodies come from the network; decoding must reject
//! malformed documents without panicking, and anything it accepts must
//! re-encode to a document that decodes to the same pairs.
//!
//! Run with:
//! cargo +nightly fuzz run fuzz_kvform_decode -- -max_total_time=600

#![no_main]

use libfuzzer_sys::fuzz_target;
use xavyo_openid::message::{kvform, MessageKind};
use xavyo_openid::channel::read_direct_response;

fuzz_target!(|data: &[u8]| {
    let Ok(body) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(pairs) = kvform::decode(body) {
        if let Ok(encoded) = kvform::encode(&pairs) {
            let again = kvform::decode(&encoded).unwrap();
            assert_eq!(pairs, again);
        }
    }

    // Typed decoding of every direct response kind
    for kind in [
        MessageKind::AssociateResponse,
        MessageKind::AssociateUnsuccessfulResponse,
        MessageKind::CheckAuthenticationResponse,
        MessageKind::DirectErrorResponse,
    ] {
        let _ = read_direct_response(kind, body);
    }
});
