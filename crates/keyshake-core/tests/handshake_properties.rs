//! Property-based tests for the handshake and connection state machine
//!
//! These tests verify the invariants of the key exchange:
//!
//! 1. **Convergence**: both ends derive ciphers that encrypt identically and
//!    decrypt each other's output
//! 2. **Gating**: no `Deliver` action is ever produced before the frame that
//!    completes the handshake
//! 3. **Magic rejection**: any handshake frame with the wrong magic fails with
//!    a framing error
//! 4. **Round-trip**: every application message arrives unchanged

use std::{
    sync::{Arc, LazyLock, Mutex},
    time::Duration,
};

use bytes::Bytes;
use keyshake_core::{
    Connection, ConnectionAction, ConnectionConfig, ConnectionState, Environment, ErrorKind,
    Initiator, InitiatorRole, Responder, ResponderRole,
};
use keyshake_crypto::{Cipher, KeyPair, bootstrap::MIN_KEY_BITS};
use proptest::prelude::*;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// RSA key generation dominates test time; share one pair across cases
static KEY_PAIR: LazyLock<KeyPair> = LazyLock::new(|| {
    let mut rng = ChaCha20Rng::seed_from_u64(0x5EED);
    KeyPair::generate(&mut rng, MIN_KEY_BITS).unwrap()
});

#[derive(Clone)]
struct TestEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
}

impl TestEnv {
    fn seeded(seed: u64) -> Self {
        Self { rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))) }
    }
}

impl Environment for TestEnv {
    type Instant = Duration;

    fn now(&self) -> Duration {
        Duration::ZERO
    }

    fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        async {}
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap().fill_bytes(buffer);
    }
}

fn sent(actions: &[ConnectionAction]) -> Vec<Bytes> {
    actions
        .iter()
        .filter_map(|a| match a {
            ConnectionAction::SendFrame(bytes) => Some(bytes.clone()),
            _ => None,
        })
        .collect()
}

fn delivered(actions: &[ConnectionAction]) -> usize {
    actions.iter().filter(|a| matches!(a, ConnectionAction::Deliver(_))).count()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_handshake_converges(
        seed in any::<u64>(),
        algorithm in prop_oneof![Just("AES"), Just("AES-128"), Just("AES-192"), Just("AES-256")],
        plaintext in prop::collection::vec(any::<u8>(), 0..512),
    ) {
        let responder = Responder::new(&KEY_PAIR).unwrap();
        let initiator = Initiator::from_public_key_frame(&responder.initiate().unwrap()).unwrap();

        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let (ours, wrapped) = initiator.generate_session_cipher(algorithm, &mut rng).unwrap();
        let theirs = responder.complete_handshake(&wrapped).unwrap();

        // PROPERTY: Identical ciphertext for identical plaintext
        let a = ours.encrypt(&plaintext).unwrap();
        let b = theirs.encrypt(&plaintext).unwrap();
        prop_assert_eq!(&a, &b);

        // PROPERTY: Each side decrypts the other's output
        prop_assert_eq!(theirs.decrypt(&a).unwrap(), plaintext.clone());
        prop_assert_eq!(ours.decrypt(&b).unwrap(), plaintext);
    }

    #[test]
    fn prop_wrong_magic_is_framing_error(
        magic in any::<[u8; 4]>(),
    ) {
        prop_assume!(magic != keyshake_proto::MAGIC.to_be_bytes());

        let responder = Responder::new(&KEY_PAIR).unwrap();
        let mut frame = responder.initiate().unwrap().to_vec();
        frame[..4].copy_from_slice(&magic);

        // PROPERTY: Magic mismatch is a framing error, never a crypto error
        let err = Initiator::from_public_key_frame(&frame).unwrap_err();
        prop_assert_eq!(err.kind(), ErrorKind::ProtocolFraming);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn prop_no_delivery_before_handshake_completes(
        seed in any::<u64>(),
        early in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..5),
        messages in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..256), 1..8),
    ) {
        let env = TestEnv::seeded(seed);
        let config = ConnectionConfig::default();

        let (mut responder, opening) = Connection::open(
            ResponderRole::with_key_bits(MIN_KEY_BITS),
            config.clone(),
            &env,
        ).unwrap();
        let (mut initiator, _) = Connection::open(InitiatorRole::new(), config, &env).unwrap();

        // Responder app sends immediately after ready; queued until established
        for payload in &early {
            let actions = responder.send(Bytes::from(payload.clone())).unwrap();
            prop_assert!(actions.is_empty());
        }

        let reply = initiator.handle_frame(&sent(&opening)[0], &env).unwrap();

        // PROPERTY: Completing the handshake delivers nothing
        prop_assert_eq!(delivered(&reply), 0);

        let flushed = responder.handle_frame(&sent(&reply)[0], &env).unwrap();
        prop_assert_eq!(delivered(&flushed), 0);
        prop_assert_eq!(responder.state(), ConnectionState::Established);

        // Early messages arrive in order
        let mut received = Vec::new();
        for frame in sent(&flushed) {
            for action in initiator.handle_frame(&frame, &env).unwrap() {
                if let ConnectionAction::Deliver(bytes) = action {
                    received.push(bytes.to_vec());
                }
            }
        }
        prop_assert_eq!(&received, &early);

        // PROPERTY: Established traffic round-trips unchanged
        for message in &messages {
            let frames = sent(&initiator.send(Bytes::from(message.clone())).unwrap());
            let actions = responder.handle_frame(&frames[0], &env).unwrap();
            prop_assert_eq!(actions, vec![ConnectionAction::Deliver(Bytes::from(message.clone()))]);
        }
    }
}
