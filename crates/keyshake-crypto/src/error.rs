//! Error types for cipher construction and operation.

use std::io;

use thiserror::Error;

use crate::cipher::Direction;

/// Errors from cipher construction and encrypt/decrypt operations.
///
/// The two variants map onto the two failure points of every cipher:
/// building it (bad algorithm, bad key) and running it (bad input).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Cipher could not be constructed: unsupported algorithm, invalid key
    /// size or key encoding, or a direction the cipher cannot perform.
    #[error("cipher initialization failed: {reason}")]
    Initialization {
        /// What was wrong with the algorithm or key
        reason: String,
    },

    /// An encrypt or decrypt call failed: authentication tag mismatch,
    /// invalid padding, truncated ciphertext, or wrong key.
    #[error("{direction} failed: {reason}")]
    Operation {
        /// Direction of the failed operation
        direction: Direction,
        /// Why the operation failed
        reason: String,
    },
}

impl CryptoError {
    pub(crate) fn init(reason: impl Into<String>) -> Self {
        Self::Initialization { reason: reason.into() }
    }

    pub(crate) fn op(direction: Direction, reason: impl Into<String>) -> Self {
        Self::Operation { direction, reason: reason.into() }
    }

    /// Returns true if the error happened while constructing a cipher.
    pub fn is_initialization(&self) -> bool {
        matches!(self, Self::Initialization { .. })
    }
}

/// Convert `CryptoError` to `io::Error` for the stream wrappers.
///
/// Boundary conversion only; cipher code returns `CryptoError`.
impl From<CryptoError> for io::Error {
    fn from(err: CryptoError) -> Self {
        Self::new(io::ErrorKind::InvalidData, err)
    }
}
