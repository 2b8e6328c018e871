//! Symmetric session cipher
//!
//! AES-CBC with PKCS#7 padding, authenticated with HMAC-SHA256 over the
//! ciphertext (encrypt-then-MAC).
//!
//! ```text
//! [CBC ciphertext: n * 16 bytes, n >= 1] || [HMAC-SHA256 tag: 32 bytes]
//! ```
//!
//! The IV and the MAC key are derived from the session key with HKDF, so the
//! two ends of a handshake hold identical cipher state and produce identical
//! ciphertext for identical plaintext.
//!
//! # Security
//!
//! - Deterministic IV: equal plaintexts encrypt to equal ciphertexts under
//!   one key. This preserves the wire behaviour of the protocol; it is not a
//!   model for new designs.
//! - Tag verification happens before the final block is unpadded, so a
//!   tampered message never reaches the padding check.

use aes::{Aes128, Aes192, Aes256};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, generic_array::GenericArray};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::{CryptoRng, RngCore};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::{
    cipher::{Cipher, CipherOperation, Direction},
    error::CryptoError,
};

type HmacSha256 = Hmac<Sha256>;

/// AES block size (16 bytes)
pub const BLOCK_LEN: usize = 16;

/// CBC initialization vector size (16 bytes)
pub const IV_LEN: usize = 16;

/// HMAC-SHA256 tag size (32 bytes)
pub const TAG_LEN: usize = 32;

/// Algorithm name carried on the wire for every AES key size.
pub const AES_ALGORITHM: &str = "AES";

/// Label for deriving the CBC IV from the session key
const IV_LABEL: &[u8] = b"keyshake session iv";

/// Label for deriving the HMAC key from the session key
const MAC_LABEL: &[u8] = b"keyshake session mac";

/// Supported symmetric algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymmetricAlgorithm {
    /// AES with a 128-bit key (the default for `"AES"`)
    Aes128,
    /// AES with a 192-bit key
    Aes192,
    /// AES with a 256-bit key
    Aes256,
}

impl SymmetricAlgorithm {
    /// Resolve a user-facing algorithm name.
    ///
    /// Accepts `"AES"` (128-bit) and the sized forms `"AES-128"`,
    /// `"AES-192"`, `"AES-256"`, case-insensitively.
    pub fn from_name(name: &str) -> Result<Self, CryptoError> {
        match name.to_ascii_uppercase().as_str() {
            "AES" | "AES-128" | "AES128" => Ok(Self::Aes128),
            "AES-192" | "AES192" => Ok(Self::Aes192),
            "AES-256" | "AES256" => Ok(Self::Aes256),
            _ => Err(CryptoError::init(format!("unsupported symmetric algorithm: {name:?}"))),
        }
    }

    fn from_key_len(len: usize) -> Result<Self, CryptoError> {
        match len {
            16 => Ok(Self::Aes128),
            24 => Ok(Self::Aes192),
            32 => Ok(Self::Aes256),
            _ => Err(invalid_key_len(len)),
        }
    }

    /// Key length in bytes.
    pub fn key_len(self) -> usize {
        match self {
            Self::Aes128 => 16,
            Self::Aes192 => 24,
            Self::Aes256 => 32,
        }
    }

    /// Name written into the wrapped key payload.
    pub fn wire_name(self) -> &'static str {
        AES_ALGORITHM
    }
}

/// Symmetric key material plus its algorithm.
///
/// Immutable once created. Key bytes are zeroized on drop.
#[derive(Clone)]
pub struct SessionKey {
    algorithm: SymmetricAlgorithm,
    bytes: Zeroizing<Vec<u8>>,
}

impl SessionKey {
    /// Generate a fresh random key.
    pub fn generate<R: RngCore + CryptoRng>(algorithm: SymmetricAlgorithm, rng: &mut R) -> Self {
        let mut bytes = Zeroizing::new(vec![0u8; algorithm.key_len()]);
        rng.fill_bytes(&mut bytes);
        Self { algorithm, bytes }
    }

    /// Rebuild a key received from a peer.
    ///
    /// The key length selects the AES variant. A sized name (`"AES-256"`)
    /// must agree with the key length.
    ///
    /// # Errors
    ///
    /// - `CryptoError::Initialization` for a non-AES name or an invalid key
    ///   length
    pub fn from_parts(name: &str, bytes: &[u8]) -> Result<Self, CryptoError> {
        let named = SymmetricAlgorithm::from_name(name)?;
        let algorithm = SymmetricAlgorithm::from_key_len(bytes.len())?;

        if !name.eq_ignore_ascii_case(AES_ALGORITHM) && named != algorithm {
            return Err(CryptoError::init(format!(
                "{name} expects a {}-byte key, got {} bytes",
                named.key_len(),
                bytes.len()
            )));
        }

        Ok(Self::from_raw(algorithm, bytes))
    }

    pub(crate) fn from_raw(algorithm: SymmetricAlgorithm, bytes: &[u8]) -> Self {
        debug_assert_eq!(bytes.len(), algorithm.key_len());
        Self { algorithm, bytes: Zeroizing::new(bytes.to_vec()) }
    }

    /// Algorithm this key is for.
    pub fn algorithm(&self) -> SymmetricAlgorithm {
        self.algorithm
    }

    /// Wire name of the algorithm (`"AES"`).
    pub fn name(&self) -> &'static str {
        self.algorithm.wire_name()
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey").field("algorithm", &self.algorithm).finish_non_exhaustive()
    }
}

/// Symmetric cipher used for all post-handshake traffic.
///
/// Stateless between operations: every operation restarts the CBC chain from
/// the fixed IV.
#[derive(Clone)]
pub struct SessionCipher {
    key: SessionKey,
    iv: [u8; IV_LEN],
    mac_key: Zeroizing<[u8; 32]>,
}

impl SessionCipher {
    /// Build a session cipher with the IV derived from the key.
    pub fn new(key: SessionKey) -> Self {
        let mut iv = [0u8; IV_LEN];
        expand(key.as_bytes(), IV_LABEL, &mut iv);
        Self::with_iv(key, iv)
    }

    /// Build a session cipher with an explicit IV.
    pub fn with_iv(key: SessionKey, iv: [u8; IV_LEN]) -> Self {
        let mut mac_key = Zeroizing::new([0u8; 32]);
        expand(key.as_bytes(), MAC_LABEL, &mut mac_key[..]);
        Self { key, iv, mac_key }
    }

    /// Key this cipher encrypts with.
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// CBC initialization vector.
    pub fn iv(&self) -> &[u8; IV_LEN] {
        &self.iv
    }
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCipher").field("key", &self.key).finish_non_exhaustive()
    }
}

impl Cipher for SessionCipher {
    fn new_operation(&self, direction: Direction) -> Result<CipherOperation, CryptoError> {
        let chain = block_chain(self.key.as_bytes(), &self.iv, direction)?;
        let mac = <HmacSha256 as Mac>::new_from_slice(&self.mac_key[..])
            .map_err(|_| CryptoError::init("invalid MAC key length"))?;

        Ok(CipherOperation::block(BlockOperation { direction, chain, mac, pending: Vec::new() }))
    }
}

/// HKDF-SHA256 expand with no salt.
fn expand(ikm: &[u8], info: &[u8], okm: &mut [u8]) {
    let hkdf = Hkdf::<Sha256>::new(None, ikm);
    let Ok(()) = hkdf.expand(info, okm) else {
        unreachable!("IV and MAC key lengths are valid HKDF-SHA256 output lengths");
    };
}

fn invalid_key_len(len: usize) -> CryptoError {
    CryptoError::init(format!("invalid AES key length: {len} bytes (expected 16, 24 or 32)"))
}

/// One CBC chain in one direction, processing a block in place.
trait BlockChain: Send {
    fn process(&mut self, block: &mut [u8]);
}

struct Encrypting<C>(C);

struct Decrypting<C>(C);

impl<C: BlockEncryptMut + Send> BlockChain for Encrypting<C> {
    fn process(&mut self, block: &mut [u8]) {
        self.0.encrypt_block_mut(GenericArray::from_mut_slice(block));
    }
}

impl<C: BlockDecryptMut + Send> BlockChain for Decrypting<C> {
    fn process(&mut self, block: &mut [u8]) {
        self.0.decrypt_block_mut(GenericArray::from_mut_slice(block));
    }
}

fn block_chain(
    key: &[u8],
    iv: &[u8; IV_LEN],
    direction: Direction,
) -> Result<Box<dyn BlockChain>, CryptoError> {
    use SymmetricAlgorithm::{Aes128 as A128, Aes192 as A192, Aes256 as A256};

    match (direction, SymmetricAlgorithm::from_key_len(key.len())?) {
        (Direction::Encrypt, A128) => encrypting::<cbc::Encryptor<Aes128>>(key, iv),
        (Direction::Encrypt, A192) => encrypting::<cbc::Encryptor<Aes192>>(key, iv),
        (Direction::Encrypt, A256) => encrypting::<cbc::Encryptor<Aes256>>(key, iv),
        (Direction::Decrypt, A128) => decrypting::<cbc::Decryptor<Aes128>>(key, iv),
        (Direction::Decrypt, A192) => decrypting::<cbc::Decryptor<Aes192>>(key, iv),
        (Direction::Decrypt, A256) => decrypting::<cbc::Decryptor<Aes256>>(key, iv),
    }
}

fn encrypting<C>(key: &[u8], iv: &[u8]) -> Result<Box<dyn BlockChain>, CryptoError>
where
    C: KeyIvInit + BlockEncryptMut + Send + 'static,
{
    let chain = C::new_from_slices(key, iv).map_err(|_| invalid_key_len(key.len()))?;
    Ok(Box::new(Encrypting(chain)))
}

fn decrypting<C>(key: &[u8], iv: &[u8]) -> Result<Box<dyn BlockChain>, CryptoError>
where
    C: KeyIvInit + BlockDecryptMut + Send + 'static,
{
    let chain = C::new_from_slices(key, iv).map_err(|_| invalid_key_len(key.len()))?;
    Ok(Box::new(Decrypting(chain)))
}

/// Incremental AES-CBC + HMAC operation.
///
/// Encryption emits every complete block as soon as it is available.
/// Decryption holds back the final block and the tag until `finish`, because
/// only then is it known which bytes are the tag and which block carries the
/// padding.
pub(crate) struct BlockOperation {
    direction: Direction,
    chain: Box<dyn BlockChain>,
    mac: HmacSha256,
    pending: Vec<u8>,
}

impl BlockOperation {
    pub(crate) fn direction(&self) -> Direction {
        self.direction
    }

    pub(crate) fn update(&mut self, input: &[u8]) -> Vec<u8> {
        self.pending.extend_from_slice(input);

        let reserved = match self.direction {
            Direction::Encrypt => 0,
            Direction::Decrypt => BLOCK_LEN + TAG_LEN,
        };
        let ready = self.pending.len().saturating_sub(reserved) / BLOCK_LEN * BLOCK_LEN;
        if ready == 0 {
            return Vec::new();
        }

        let mut blocks: Vec<u8> = self.pending.drain(..ready).collect();
        self.process(&mut blocks);
        blocks
    }

    pub(crate) fn finish(self) -> Result<Vec<u8>, CryptoError> {
        match self.direction {
            Direction::Encrypt => Ok(self.finish_encrypt()),
            Direction::Decrypt => self.finish_decrypt(),
        }
    }

    /// Run whole blocks through the chain and the MAC. The MAC always covers
    /// ciphertext.
    fn process(&mut self, blocks: &mut [u8]) {
        debug_assert_eq!(blocks.len() % BLOCK_LEN, 0);

        match self.direction {
            Direction::Encrypt => {
                for block in blocks.chunks_exact_mut(BLOCK_LEN) {
                    self.chain.process(block);
                }
                self.mac.update(blocks);
            },
            Direction::Decrypt => {
                self.mac.update(blocks);
                for block in blocks.chunks_exact_mut(BLOCK_LEN) {
                    self.chain.process(block);
                }
            },
        }
    }

    fn finish_encrypt(mut self) -> Vec<u8> {
        let mut last = std::mem::take(&mut self.pending);
        debug_assert!(last.len() < BLOCK_LEN);

        // PKCS#7: always 1..=16 bytes of padding, a full block when aligned
        let pad = BLOCK_LEN - last.len();
        last.resize(BLOCK_LEN, pad as u8);
        self.process(&mut last);

        last.extend_from_slice(&self.mac.finalize().into_bytes());
        last
    }

    fn finish_decrypt(mut self) -> Result<Vec<u8>, CryptoError> {
        let rest = std::mem::take(&mut self.pending);

        if rest.len() < BLOCK_LEN + TAG_LEN {
            return Err(CryptoError::op(
                Direction::Decrypt,
                format!(
                    "ciphertext too short: {} trailing bytes, need at least {}",
                    rest.len(),
                    BLOCK_LEN + TAG_LEN
                ),
            ));
        }

        let (body, tag) = rest.split_at(rest.len() - TAG_LEN);
        if body.len() % BLOCK_LEN != 0 {
            return Err(CryptoError::op(
                Direction::Decrypt,
                "ciphertext is not a whole number of blocks",
            ));
        }

        self.mac.update(body);
        self.mac
            .verify_slice(tag)
            .map_err(|_| CryptoError::op(Direction::Decrypt, "authentication failed"))?;

        let mut plaintext = body.to_vec();
        for block in plaintext.chunks_exact_mut(BLOCK_LEN) {
            self.chain.process(block);
        }

        unpad(&mut plaintext)?;
        Ok(plaintext)
    }
}

fn unpad(plaintext: &mut Vec<u8>) -> Result<(), CryptoError> {
    let pad = plaintext.last().map_or(0, |&b| usize::from(b));

    let valid = (1..=BLOCK_LEN).contains(&pad)
        && pad <= plaintext.len()
        && plaintext[plaintext.len() - pad..].iter().all(|&b| usize::from(b) == pad);

    if !valid {
        return Err(CryptoError::op(Direction::Decrypt, "invalid padding"));
    }

    plaintext.truncate(plaintext.len() - pad);
    Ok(())
}
