//! The two halves of the key exchange.
//!
//! ```text
//! Responder                                  Initiator
//!   generate RSA key pair
//!   initiate() ──── PublicKeyFrame ────────►  from_public_key_frame()
//!                                             generate_session_cipher()
//!   complete_handshake() ◄── WrappedKeyFrame ─┘
//!   SessionCipher                             SessionCipher
//! ```
//!
//! Both sides end up with a [`SessionCipher`] built from the same key bytes,
//! so they encrypt identically.

use bytes::Bytes;
use keyshake_crypto::{
    BootstrapCipher, CryptoError, Direction, KeyPair, RSA_ALGORITHM, SessionCipher, SessionKey,
    SymmetricAlgorithm, session::AES_ALGORITHM,
};
use keyshake_proto::{KeyPayload, PublicKeyFrame, WrappedKeyFrame};
use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::error::ConnectionError;

/// Session algorithm the initiator uses unless configured otherwise.
pub const DEFAULT_SESSION_ALGORITHM: &str = AES_ALGORITHM;

/// Publishes a public key and recovers the session key wrapped under it.
#[derive(Debug)]
pub struct Responder {
    cipher: BootstrapCipher,
    public_key: Bytes,
}

impl Responder {
    /// Generate a fresh key pair with a `key_bits`-bit modulus.
    pub fn generate<R: RngCore + CryptoRng>(
        rng: &mut R,
        key_bits: usize,
    ) -> Result<Self, ConnectionError> {
        let key_pair = KeyPair::generate(rng, key_bits)?;
        Self::new(&key_pair)
    }

    /// Use an existing key pair.
    pub fn new(key_pair: &KeyPair) -> Result<Self, ConnectionError> {
        Ok(Self {
            cipher: key_pair.cipher(),
            public_key: Bytes::from(key_pair.public_key_der()?),
        })
    }

    /// Encoded public key frame to send to the initiator.
    pub fn initiate(&self) -> Result<Bytes, ConnectionError> {
        Ok(PublicKeyFrame::new(RSA_ALGORITHM, self.public_key.clone()).to_bytes()?)
    }

    /// Recover the session cipher from the initiator's wrapped key frame.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::Protocol` if the frame is malformed
    /// - `CryptoError::Operation` if the ciphertext does not decrypt or the
    ///   key payload lengths are inconsistent
    /// - `CryptoError::Initialization` for an unsupported algorithm or key
    ///   size
    pub fn complete_handshake(&self, frame: &[u8]) -> Result<SessionCipher, ConnectionError> {
        let frame = WrappedKeyFrame::decode(frame)?;
        let plaintext = Zeroizing::new(self.cipher.unwrap_key(&frame.ciphertext)?);

        let payload = KeyPayload::decode(&plaintext).map_err(|e| CryptoError::Operation {
            direction: Direction::Decrypt,
            reason: format!("malformed key payload: {e}"),
        })?;

        let key = SessionKey::from_parts(&payload.algorithm, &payload.key)?;
        Ok(SessionCipher::new(key))
    }
}

/// Wraps a freshly generated session key under the responder's public key.
#[derive(Debug)]
pub struct Initiator {
    cipher: BootstrapCipher,
}

impl Initiator {
    /// Parse the responder's public key frame.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::Protocol` if the frame is malformed
    /// - `CryptoError::Initialization` for an unknown algorithm or a key that
    ///   does not decode
    pub fn from_public_key_frame(frame: &[u8]) -> Result<Self, ConnectionError> {
        let frame = PublicKeyFrame::decode(frame)?;
        let cipher = BootstrapCipher::from_public_key(&frame.algorithm, &frame.public_key)?;
        Ok(Self { cipher })
    }

    /// Generate a session key, returning its cipher and the wrapped key
    /// frame for the responder.
    pub fn generate_session_cipher<R: RngCore + CryptoRng>(
        &self,
        algorithm: &str,
        rng: &mut R,
    ) -> Result<(SessionCipher, Bytes), ConnectionError> {
        let algorithm = SymmetricAlgorithm::from_name(algorithm)?;
        let key = SessionKey::generate(algorithm, rng);

        let payload = KeyPayload::new(key.name(), key.as_bytes()).to_bytes()?;
        let wrapped = self.cipher.wrap_key(rng, &payload)?;
        let frame = WrappedKeyFrame::new(wrapped).to_bytes()?;

        Ok((SessionCipher::new(key), frame))
    }
}
