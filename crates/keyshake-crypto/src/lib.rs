//! Keyshake Cryptographic Primitives
//!
//! Ciphers for the keyshake handshake and for local file encryption. Every
//! cipher implements the [`Cipher`] capability: it hands out independent
//! encrypt/decrypt [`CipherOperation`]s that run over whole buffers, over
//! `std::io` streams, or over files.
//!
//! # Cipher Variants
//!
//! ```text
//! BootstrapCipher  RSA PKCS#1 v1.5, wraps the session key once per connection
//!        │
//!        ▼
//! SessionKey ─────► SessionCipher   AES-CBC + HMAC-SHA256, all traffic
//!
//! password ─PBKDF2─► PasswordCipher AES-CBC + HMAC-SHA256, files
//! ```
//!
//! # Security
//!
//! Authenticity:
//! - Session ciphertext carries an HMAC-SHA256 tag over the CBC ciphertext
//! - Tag verification happens before unpadding; any bit flip is rejected
//!
//! Known weaknesses kept for wire compatibility:
//! - The session IV is derived from the key, so ciphertext is deterministic
//! - [`PasswordCipher::from_password`] uses a zero salt and one PBKDF2 round
//! - PKCS#1 v1.5 encryption padding (no OAEP)

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod bootstrap;
pub mod cipher;
pub mod error;
pub mod file;
pub mod password;
pub mod session;
pub mod stream;

pub use bootstrap::{BootstrapCipher, DEFAULT_KEY_BITS, KeyPair, RSA_ALGORITHM};
pub use cipher::{AnyCipher, Cipher, CipherOperation, Direction};
pub use error::CryptoError;
pub use file::{decrypt_file, encrypt_file};
pub use password::PasswordCipher;
pub use session::{AES_ALGORITHM, SessionCipher, SessionKey, SymmetricAlgorithm};
pub use stream::{DecryptingReader, EncryptingWriter};
