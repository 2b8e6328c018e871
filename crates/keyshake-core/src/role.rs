//! Role strategies for the two ends of a connection.
//!
//! The connection state machine owns everything both sides share (queueing,
//! established-phase encryption, timeouts). A [`Role`] supplies only what
//! differs: what to send on open and how to turn the peer's handshake frame
//! into a session cipher.

use bytes::Bytes;
use keyshake_crypto::{DEFAULT_KEY_BITS, SessionCipher};
use rand::{CryptoRng, RngCore};

use crate::{
    error::ConnectionError,
    handshake::{DEFAULT_SESSION_ALGORITHM, Initiator, Responder},
};

/// Result of processing the peer's handshake frame.
#[derive(Debug)]
pub struct Completed {
    /// Session cipher for the established connection
    pub cipher: SessionCipher,
    /// Handshake frame to send back, if this role replies
    pub reply: Option<Bytes>,
}

/// Handshake behaviour of one end of a connection.
pub trait Role {
    /// State carried from `on_open` to `on_handshake_frame`.
    type Pending;

    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Start the handshake. Returns the pending state and, for roles that
    /// speak first, the opening handshake frame.
    fn on_open<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
    ) -> Result<(Self::Pending, Option<Bytes>), ConnectionError>;

    /// Consume the peer's handshake frame and produce the session cipher.
    fn on_handshake_frame<R: RngCore + CryptoRng>(
        &self,
        pending: Self::Pending,
        frame: &[u8],
        rng: &mut R,
    ) -> Result<Completed, ConnectionError>;
}

/// Publishes a public key on open and waits for the wrapped session key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponderRole {
    key_bits: usize,
}

impl ResponderRole {
    /// Responder with a [`DEFAULT_KEY_BITS`]-bit RSA modulus.
    pub fn new() -> Self {
        Self { key_bits: DEFAULT_KEY_BITS }
    }

    /// Responder with a custom RSA modulus size.
    pub fn with_key_bits(key_bits: usize) -> Self {
        Self { key_bits }
    }

    /// RSA modulus size in bits.
    pub fn key_bits(&self) -> usize {
        self.key_bits
    }
}

impl Default for ResponderRole {
    fn default() -> Self {
        Self::new()
    }
}

impl Role for ResponderRole {
    type Pending = Responder;

    fn name(&self) -> &'static str {
        "responder"
    }

    fn on_open<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
    ) -> Result<(Responder, Option<Bytes>), ConnectionError> {
        let responder = Responder::generate(rng, self.key_bits)?;
        let frame = responder.initiate()?;
        Ok((responder, Some(frame)))
    }

    fn on_handshake_frame<R: RngCore + CryptoRng>(
        &self,
        pending: Responder,
        frame: &[u8],
        _rng: &mut R,
    ) -> Result<Completed, ConnectionError> {
        let cipher = pending.complete_handshake(frame)?;
        Ok(Completed { cipher, reply: None })
    }
}

/// Waits for the peer's public key and replies with a wrapped session key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiatorRole {
    algorithm: String,
}

impl InitiatorRole {
    /// Initiator generating [`DEFAULT_SESSION_ALGORITHM`] keys.
    pub fn new() -> Self {
        Self { algorithm: DEFAULT_SESSION_ALGORITHM.to_string() }
    }

    /// Initiator generating keys for `algorithm` (e.g. `"AES-256"`).
    pub fn with_algorithm(algorithm: impl Into<String>) -> Self {
        Self { algorithm: algorithm.into() }
    }

    /// Session algorithm name.
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }
}

impl Default for InitiatorRole {
    fn default() -> Self {
        Self::new()
    }
}

impl Role for InitiatorRole {
    type Pending = ();

    fn name(&self) -> &'static str {
        "initiator"
    }

    fn on_open<R: RngCore + CryptoRng>(
        &self,
        _rng: &mut R,
    ) -> Result<((), Option<Bytes>), ConnectionError> {
        Ok(((), None))
    }

    fn on_handshake_frame<R: RngCore + CryptoRng>(
        &self,
        (): (),
        frame: &[u8],
        rng: &mut R,
    ) -> Result<Completed, ConnectionError> {
        let initiator = Initiator::from_public_key_frame(frame)?;
        let (cipher, reply) = initiator.generate_session_cipher(&self.algorithm, rng)?;
        Ok(Completed { cipher, reply: Some(reply) })
    }
}
