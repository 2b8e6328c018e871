//! Fuzz target for session ciphertext handling
//!
//! Established connections decrypt whatever the peer sends. Arbitrary
//! ciphertext, fed whole or in arbitrary chunks, must fail with a
//! `CryptoError` and never panic or yield plaintext without a valid tag.

#![no_main]

use arbitrary::Arbitrary;
use keyshake_crypto::{Cipher, Direction, SessionCipher, SessionKey};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    key: [u8; 16],
    ciphertext: Vec<u8>,
    chunks: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let Ok(key) = SessionKey::from_parts("AES", &input.key) else {
        return;
    };
    let cipher = SessionCipher::new(key);

    let whole = cipher.decrypt(&input.ciphertext);

    // Chunked decryption must agree with one-shot decryption
    let mut operation = cipher.new_operation(Direction::Decrypt).unwrap();
    let mut rest = input.ciphertext.as_slice();
    let mut output = Vec::new();
    let mut chunked_ok = true;
    for &size in &input.chunks {
        let take = (size as usize).min(rest.len());
        let (head, tail) = rest.split_at(take);
        match operation.update(head) {
            Ok(bytes) => output.extend_from_slice(&bytes),
            Err(_) => {
                chunked_ok = false;
                break;
            },
        }
        rest = tail;
    }

    if chunked_ok {
        let finished = operation.update(rest).and_then(|bytes| {
            output.extend_from_slice(&bytes);
            operation.finish()
        });
        match (&whole, finished) {
            (Ok(plain), Ok(tail)) => {
                output.extend_from_slice(&tail);
                assert_eq!(plain, &output);
            },
            (Err(_), Err(_)) => {},
            (a, b) => panic!("one-shot {a:?} disagrees with chunked {b:?}"),
        }
    }
});
