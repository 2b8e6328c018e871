//! Asymmetric bootstrap cipher (RSA, PKCS#1 v1.5 encryption padding).
//!
//! Used once per connection to wrap the session key. The responder holds the
//! full [`KeyPair`]; the initiator only ever sees the DER-encoded
//! `SubjectPublicKeyInfo` and builds an encrypt-only [`BootstrapCipher`] from
//! it.
//!
//! Arbitrary-length input is split into chunks of `modulus_len - 11` bytes,
//! each encrypted to exactly one modulus-sized block. Empty input still
//! produces one block so the output is never empty.
//!
//! The handshake wraps keys through [`BootstrapCipher::wrap_key`] with the
//! caller's RNG. [`Cipher`] operations take no RNG, so their padding comes
//! from `OsRng`; this is the only place in the workspace that reads OS
//! entropy outside an `Environment`.

use rand::{CryptoRng, RngCore, rngs::OsRng};
use rsa::{
    Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey,
    pkcs8::{DecodePublicKey, EncodePublicKey},
    traits::PublicKeyParts,
};

use crate::{
    cipher::{Cipher, CipherOperation, Direction},
    error::CryptoError,
};

/// Name of the bootstrap algorithm, as carried in the public key frame.
pub const RSA_ALGORITHM: &str = "RSA";

/// Default modulus size for generated key pairs.
pub const DEFAULT_KEY_BITS: usize = 2048;

/// Smallest modulus accepted for generated key pairs.
pub const MIN_KEY_BITS: usize = 1024;

/// PKCS#1 v1.5 encryption padding overhead in bytes.
const PKCS1_OVERHEAD: usize = 11;

/// Freshly generated RSA key pair.
#[derive(Clone)]
pub struct KeyPair {
    private: RsaPrivateKey,
}

impl KeyPair {
    /// Generate a key pair with a `bits`-bit modulus.
    ///
    /// # Errors
    ///
    /// - `CryptoError::Initialization` if `bits` is below [`MIN_KEY_BITS`] or
    ///   generation fails
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R, bits: usize) -> Result<Self, CryptoError> {
        if bits < MIN_KEY_BITS {
            return Err(CryptoError::init(format!(
                "RSA modulus of {bits} bits is below the {MIN_KEY_BITS}-bit minimum"
            )));
        }

        let private = RsaPrivateKey::new(rng, bits)
            .map_err(|e| CryptoError::init(format!("RSA key generation failed: {e}")))?;

        Ok(Self { private })
    }

    /// Algorithm name (`"RSA"`).
    pub fn algorithm(&self) -> &'static str {
        RSA_ALGORITHM
    }

    /// Modulus size in bits.
    pub fn bits(&self) -> usize {
        self.private.size() * 8
    }

    /// DER-encoded `SubjectPublicKeyInfo` for the public half.
    pub fn public_key_der(&self) -> Result<Vec<u8>, CryptoError> {
        self.private
            .to_public_key()
            .to_public_key_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|e| CryptoError::init(format!("public key encoding failed: {e}")))
    }

    /// Bootstrap cipher able to both wrap and unwrap.
    pub fn cipher(&self) -> BootstrapCipher {
        BootstrapCipher {
            public: self.private.to_public_key(),
            private: Some(self.private.clone()),
        }
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair").field("bits", &self.bits()).finish_non_exhaustive()
    }
}

/// RSA cipher over a public key and, on the responder side, its private key.
#[derive(Clone)]
pub struct BootstrapCipher {
    public: RsaPublicKey,
    private: Option<RsaPrivateKey>,
}

impl BootstrapCipher {
    /// Build an encrypt-only cipher from a peer's encoded public key.
    ///
    /// # Errors
    ///
    /// - `CryptoError::Initialization` if `algorithm` is not RSA, the key
    ///   does not parse as a DER `SubjectPublicKeyInfo`, or the modulus is
    ///   smaller than [`MIN_KEY_BITS`]
    pub fn from_public_key(algorithm: &str, encoded: &[u8]) -> Result<Self, CryptoError> {
        if !algorithm.eq_ignore_ascii_case(RSA_ALGORITHM) {
            return Err(CryptoError::init(format!(
                "unsupported bootstrap algorithm: {algorithm:?}"
            )));
        }

        let public = RsaPublicKey::from_public_key_der(encoded)
            .map_err(|e| CryptoError::init(format!("invalid RSA public key: {e}")))?;

        if public.size() * 8 < MIN_KEY_BITS {
            return Err(CryptoError::init(format!(
                "peer RSA modulus of {} bits is below the {MIN_KEY_BITS}-bit minimum",
                public.size() * 8
            )));
        }

        Ok(Self { public, private: None })
    }

    /// Whether this cipher holds the private key.
    pub fn can_decrypt(&self) -> bool {
        self.private.is_some()
    }

    /// Size of one ciphertext block in bytes.
    pub fn modulus_len(&self) -> usize {
        self.public.size()
    }

    /// Largest plaintext that fits in one block.
    pub fn max_chunk_len(&self) -> usize {
        self.modulus_len().saturating_sub(PKCS1_OVERHEAD)
    }

    /// Encrypt a payload that fits in a single block.
    ///
    /// # Errors
    ///
    /// - `CryptoError::Operation` if `plaintext` is longer than
    ///   [`max_chunk_len`](Self::max_chunk_len)
    pub fn wrap_key<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if plaintext.len() > self.max_chunk_len() {
            return Err(CryptoError::op(
                Direction::Encrypt,
                format!(
                    "payload of {} bytes exceeds the {}-byte RSA block limit",
                    plaintext.len(),
                    self.max_chunk_len()
                ),
            ));
        }

        self.public
            .encrypt(rng, Pkcs1v15Encrypt, plaintext)
            .map_err(|e| CryptoError::op(Direction::Encrypt, e.to_string()))
    }

    /// Decrypt a single block produced by [`wrap_key`](Self::wrap_key).
    ///
    /// # Errors
    ///
    /// - `CryptoError::Initialization` without a private key
    /// - `CryptoError::Operation` if the block has the wrong size or fails to
    ///   decrypt
    pub fn unwrap_key(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let private = self.private_key()?;

        if ciphertext.len() != self.modulus_len() {
            return Err(CryptoError::op(
                Direction::Decrypt,
                format!(
                    "RSA block is {} bytes, expected {}",
                    ciphertext.len(),
                    self.modulus_len()
                ),
            ));
        }

        private
            .decrypt(Pkcs1v15Encrypt, ciphertext)
            .map_err(|e| CryptoError::op(Direction::Decrypt, e.to_string()))
    }

    fn private_key(&self) -> Result<&RsaPrivateKey, CryptoError> {
        self.private
            .as_ref()
            .ok_or_else(|| CryptoError::init("bootstrap cipher has no private key"))
    }
}

impl std::fmt::Debug for BootstrapCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapCipher")
            .field("modulus_len", &self.modulus_len())
            .field("can_decrypt", &self.can_decrypt())
            .finish()
    }
}

/// Encryption pads with randomness from `OsRng`, so encrypting the same input
/// twice gives different blocks.
impl Cipher for BootstrapCipher {
    fn new_operation(&self, direction: Direction) -> Result<CipherOperation, CryptoError> {
        if direction == Direction::Decrypt {
            self.private_key()?;
        }

        Ok(CipherOperation::rsa(RsaOperation {
            cipher: self.clone(),
            direction,
            pending: Vec::new(),
            produced: false,
        }))
    }
}

/// Chunked RSA operation.
///
/// Encryption emits a block per `max_chunk_len` bytes of input; decryption
/// consumes one `modulus_len` block at a time.
pub(crate) struct RsaOperation {
    cipher: BootstrapCipher,
    direction: Direction,
    pending: Vec<u8>,
    produced: bool,
}

impl RsaOperation {
    pub(crate) fn direction(&self) -> Direction {
        self.direction
    }

    pub(crate) fn update(&mut self, input: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.pending.extend_from_slice(input);

        let chunk_len = self.chunk_len();
        let ready = self.pending.len() / chunk_len * chunk_len;
        if ready == 0 {
            return Ok(Vec::new());
        }

        let chunks: Vec<u8> = self.pending.drain(..ready).collect();
        self.process(&chunks)
    }

    pub(crate) fn finish(mut self) -> Result<Vec<u8>, CryptoError> {
        let rest = std::mem::take(&mut self.pending);

        match self.direction {
            Direction::Encrypt if rest.is_empty() && self.produced => Ok(Vec::new()),
            Direction::Encrypt => self.cipher.wrap_key(&mut OsRng, &rest),
            Direction::Decrypt if !rest.is_empty() => Err(CryptoError::op(
                Direction::Decrypt,
                format!(
                    "{} trailing bytes are not a whole RSA block of {}",
                    rest.len(),
                    self.cipher.modulus_len()
                ),
            )),
            Direction::Decrypt if !self.produced => {
                Err(CryptoError::op(Direction::Decrypt, "empty RSA ciphertext"))
            },
            Direction::Decrypt => Ok(Vec::new()),
        }
    }

    fn chunk_len(&self) -> usize {
        match self.direction {
            Direction::Encrypt => self.cipher.max_chunk_len(),
            Direction::Decrypt => self.cipher.modulus_len(),
        }
    }

    fn process(&mut self, chunks: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut output = Vec::new();

        for chunk in chunks.chunks_exact(self.chunk_len()) {
            let block = match self.direction {
                Direction::Encrypt => self.cipher.wrap_key(&mut OsRng, chunk)?,
                Direction::Decrypt => self.cipher.unwrap_key(chunk)?,
            };
            output.extend_from_slice(&block);
            self.produced = true;
        }

        Ok(output)
    }
}
