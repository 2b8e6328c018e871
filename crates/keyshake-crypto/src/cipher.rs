//! Cipher capability shared by every cipher variant.
//!
//! A cipher is anything that can produce a configured encrypt or decrypt
//! [`CipherOperation`]. The session, bootstrap, and password-derived ciphers
//! all implement [`Cipher`], so callers never special-case which one is
//! active. [`AnyCipher`] is the closed set of variants for code that needs to
//! hold "some cipher" by value.

use std::{
    fmt,
    io::{Read, Write},
};

use crate::{
    bootstrap::{BootstrapCipher, RsaOperation},
    error::CryptoError,
    password::PasswordCipher,
    session::{BlockOperation, SessionCipher},
    stream::{DecryptingReader, EncryptingWriter},
};

/// Direction of a cipher operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Plaintext in, ciphertext out
    Encrypt,
    /// Ciphertext in, plaintext out
    Decrypt,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encrypt => f.write_str("encrypt"),
            Self::Decrypt => f.write_str("decrypt"),
        }
    }
}

/// Produces configured encrypt/decrypt operations.
///
/// Every call to [`new_operation`](Cipher::new_operation) starts from the
/// cipher's fixed key material, so operations are independent of each other
/// and a cipher can be shared freely between them.
pub trait Cipher {
    /// Create a fresh operation for `direction`.
    ///
    /// # Errors
    ///
    /// - `CryptoError::Initialization` if the key material cannot be used in
    ///   this direction (e.g. decrypting with a public-only bootstrap cipher)
    fn new_operation(&self, direction: Direction) -> Result<CipherOperation, CryptoError>;

    /// Encrypt `plaintext` in one shot.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.new_operation(Direction::Encrypt)?.apply(plaintext)
    }

    /// Decrypt `ciphertext` in one shot.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.new_operation(Direction::Decrypt)?.apply(ciphertext)
    }

    /// Wrap `sink` so everything written to it is encrypted.
    ///
    /// The returned writer must be closed with
    /// [`EncryptingWriter::finish`] to emit the final block.
    fn encrypting_writer<W: Write>(&self, sink: W) -> Result<EncryptingWriter<W>, CryptoError>
    where
        Self: Sized,
    {
        Ok(EncryptingWriter::new(self.new_operation(Direction::Encrypt)?, sink))
    }

    /// Wrap `source` so everything read from it is decrypted.
    fn decrypting_reader<R: Read>(&self, source: R) -> Result<DecryptingReader<R>, CryptoError>
    where
        Self: Sized,
    {
        Ok(DecryptingReader::new(self.new_operation(Direction::Decrypt)?, source))
    }
}

/// A configured, single-use encrypt or decrypt operation.
///
/// Feed input with [`update`](Self::update) (which returns whatever output is
/// ready) and complete with [`finish`](Self::finish). For whole buffers use
/// [`apply`](Self::apply).
pub struct CipherOperation {
    kind: OperationKind,
}

enum OperationKind {
    Block(BlockOperation),
    Rsa(RsaOperation),
}

impl CipherOperation {
    pub(crate) fn block(operation: BlockOperation) -> Self {
        Self { kind: OperationKind::Block(operation) }
    }

    pub(crate) fn rsa(operation: RsaOperation) -> Self {
        Self { kind: OperationKind::Rsa(operation) }
    }

    /// Direction this operation was configured for.
    pub fn direction(&self) -> Direction {
        match &self.kind {
            OperationKind::Block(op) => op.direction(),
            OperationKind::Rsa(op) => op.direction(),
        }
    }

    /// Feed more input; returns output that no longer depends on later input.
    pub fn update(&mut self, input: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match &mut self.kind {
            OperationKind::Block(op) => Ok(op.update(input)),
            OperationKind::Rsa(op) => op.update(input),
        }
    }

    /// Complete the operation and return the remaining output.
    ///
    /// # Errors
    ///
    /// - `CryptoError::Operation` on authentication, padding, or length
    ///   failures when decrypting
    pub fn finish(self) -> Result<Vec<u8>, CryptoError> {
        match self.kind {
            OperationKind::Block(op) => op.finish(),
            OperationKind::Rsa(op) => op.finish(),
        }
    }

    /// Run the whole of `input` through the operation.
    pub fn apply(mut self, input: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut output = self.update(input)?;
        output.extend_from_slice(&self.finish()?);
        Ok(output)
    }
}

impl fmt::Debug for CipherOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let variant = match self.kind {
            OperationKind::Block(_) => "block",
            OperationKind::Rsa(_) => "rsa",
        };
        f.debug_struct("CipherOperation")
            .field("variant", &variant)
            .field("direction", &self.direction())
            .finish()
    }
}

/// The closed set of cipher variants.
#[derive(Debug, Clone)]
pub enum AnyCipher {
    /// Symmetric cipher negotiated by the handshake
    Session(SessionCipher),
    /// Asymmetric cipher that wraps the session key
    Bootstrap(BootstrapCipher),
    /// Symmetric cipher keyed from a password
    Password(PasswordCipher),
}

impl Cipher for AnyCipher {
    fn new_operation(&self, direction: Direction) -> Result<CipherOperation, CryptoError> {
        match self {
            Self::Session(cipher) => cipher.new_operation(direction),
            Self::Bootstrap(cipher) => cipher.new_operation(direction),
            Self::Password(cipher) => cipher.new_operation(direction),
        }
    }
}

impl From<SessionCipher> for AnyCipher {
    fn from(cipher: SessionCipher) -> Self {
        Self::Session(cipher)
    }
}

impl From<BootstrapCipher> for AnyCipher {
    fn from(cipher: BootstrapCipher) -> Self {
        Self::Bootstrap(cipher)
    }
}

impl From<PasswordCipher> for AnyCipher {
    fn from(cipher: PasswordCipher) -> Self {
        Self::Password(cipher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_display() {
        assert_eq!(Direction::Encrypt.to_string(), "encrypt");
        assert_eq!(Direction::Decrypt.to_string(), "decrypt");
    }

    #[test]
    fn any_cipher_dispatches_to_variant() {
        let cipher = AnyCipher::from(PasswordCipher::from_password("hunter2"));
        let op = cipher.new_operation(Direction::Decrypt).unwrap();
        assert_eq!(op.direction(), Direction::Decrypt);

        let ciphertext = cipher.encrypt(b"payload").unwrap();
        assert_eq!(cipher.decrypt(&ciphertext).unwrap(), b"payload");
    }

    #[test]
    fn incremental_update_matches_apply() {
        let cipher = PasswordCipher::from_password("correct horse");
        let plaintext: Vec<u8> = (0..=255u8).cycle().take(1000).collect();

        let one_shot = cipher.encrypt(&plaintext).unwrap();

        let mut op = cipher.new_operation(Direction::Encrypt).unwrap();
        let mut incremental = Vec::new();
        for chunk in plaintext.chunks(7) {
            incremental.extend(op.update(chunk).unwrap());
        }
        incremental.extend(op.finish().unwrap());

        assert_eq!(incremental, one_shot);
    }
}
