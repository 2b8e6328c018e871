//! Fuzz target for handshake frame and key payload decoding
//!
//! Every decoder is fed the same bytes. None may panic; malformed input must
//! come back as a `ProtocolError`.
//!
//! # Invariants
//!
//! - A frame that decodes re-encodes to exactly the input bytes
//! - A frame whose first four bytes are not the magic never decodes

#![no_main]

use keyshake_proto::{KeyPayload, MAGIC, PublicKeyFrame, WrappedKeyFrame};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let magic_ok = data.len() >= 4 && data[..4] == MAGIC.to_be_bytes();

    if let Ok(frame) = PublicKeyFrame::decode(data) {
        assert!(magic_ok);
        assert_eq!(frame.to_bytes().unwrap().as_ref(), data);
    }

    if let Ok(frame) = WrappedKeyFrame::decode(data) {
        assert!(magic_ok);
        assert_eq!(frame.to_bytes().unwrap().as_ref(), data);
    }

    if let Ok(payload) = KeyPayload::decode(data) {
        assert_eq!(payload.to_bytes().unwrap().as_slice(), data);
    }
});
