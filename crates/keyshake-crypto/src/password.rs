//! Password-derived symmetric cipher.
//!
//! The key is PBKDF2-HMAC-SHA256 over the password; everything after
//! derivation is the session cipher (AES-128-CBC + HMAC-SHA256).
//!
//! # Security
//!
//! [`PasswordCipher::from_password`] uses a fixed all-zero salt, a single
//! PBKDF2 iteration, and an all-zero IV. It exists for interoperability with
//! files written that way and offers almost no protection against offline
//! guessing. Prefer [`PasswordCipher::derive`] with a random salt.

use sha2::Sha256;
use zeroize::Zeroizing;

use crate::{
    cipher::{Cipher, CipherOperation, Direction},
    error::CryptoError,
    session::{IV_LEN, SessionCipher, SessionKey, SymmetricAlgorithm},
};

/// PBKDF2 iterations for salted derivation.
pub const DERIVE_ITERATIONS: u32 = 65_536;

/// Recommended salt length for [`PasswordCipher::derive`].
pub const SALT_LEN: usize = 16;

const CONVENIENCE_ITERATIONS: u32 = 1;
const CONVENIENCE_SALT: [u8; SALT_LEN] = [0; SALT_LEN];

/// Symmetric cipher keyed from a password.
#[derive(Debug, Clone)]
pub struct PasswordCipher {
    inner: SessionCipher,
}

impl PasswordCipher {
    /// Derive a cipher from a password, salt, and IV.
    ///
    /// Uses [`DERIVE_ITERATIONS`] rounds of PBKDF2-HMAC-SHA256 and a 128-bit
    /// key.
    pub fn derive(password: &str, salt: &[u8], iv: [u8; IV_LEN]) -> Self {
        Self::build(password, salt, DERIVE_ITERATIONS, iv)
    }

    /// Derive a cipher with a fixed zero salt, one iteration, and a zero IV.
    ///
    /// The same password always yields the same cipher. See the module docs
    /// before using this.
    pub fn from_password(password: &str) -> Self {
        Self::build(password, &CONVENIENCE_SALT, CONVENIENCE_ITERATIONS, [0u8; IV_LEN])
    }

    fn build(password: &str, salt: &[u8], iterations: u32, iv: [u8; IV_LEN]) -> Self {
        let algorithm = SymmetricAlgorithm::Aes128;
        let mut key = Zeroizing::new(vec![0u8; algorithm.key_len()]);
        pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key);

        let key = SessionKey::from_raw(algorithm, &key);
        Self { inner: SessionCipher::with_iv(key, iv) }
    }

    /// Underlying session cipher.
    pub fn session_cipher(&self) -> &SessionCipher {
        &self.inner
    }
}

impl Cipher for PasswordCipher {
    fn new_operation(&self, direction: Direction) -> Result<CipherOperation, CryptoError> {
        self.inner.new_operation(direction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_password_same_cipher() {
        let a = PasswordCipher::from_password("hunter2");
        let b = PasswordCipher::from_password("hunter2");

        assert_eq!(a.session_cipher().key().as_bytes(), b.session_cipher().key().as_bytes());
        assert_eq!(a.encrypt(b"data").unwrap(), b.encrypt(b"data").unwrap());
    }

    #[test]
    fn different_passwords_do_not_interoperate() {
        let a = PasswordCipher::from_password("hunter2");
        let b = PasswordCipher::from_password("hunter3");

        let ciphertext = a.encrypt(b"data").unwrap();
        assert!(b.decrypt(&ciphertext).is_err());
    }

    #[test]
    fn derive_depends_on_salt() {
        let iv = [7u8; IV_LEN];
        let a = PasswordCipher::derive("pw", b"salt-one--------", iv);
        let b = PasswordCipher::derive("pw", b"salt-two--------", iv);

        assert_ne!(a.session_cipher().key().as_bytes(), b.session_cipher().key().as_bytes());
        assert_eq!(a.session_cipher().iv(), &iv);

        let ciphertext = a.encrypt(b"data").unwrap();
        assert_eq!(a.decrypt(&ciphertext).unwrap(), b"data");
        assert!(b.decrypt(&ciphertext).is_err());
    }

    #[test]
    fn convenience_and_derived_differ() {
        let convenience = PasswordCipher::from_password("pw");
        let derived = PasswordCipher::derive("pw", &CONVENIENCE_SALT, [0u8; IV_LEN]);

        // Same salt and IV, different iteration count
        assert_ne!(
            convenience.session_cipher().key().as_bytes(),
            derived.session_cipher().key().as_bytes()
        );
    }

    #[test]
    fn convenience_uses_zero_iv_and_aes128() {
        let cipher = PasswordCipher::from_password("pw");
        assert_eq!(cipher.session_cipher().iv(), &[0u8; IV_LEN]);
        assert_eq!(cipher.session_cipher().key().algorithm(), SymmetricAlgorithm::Aes128);
    }
}
