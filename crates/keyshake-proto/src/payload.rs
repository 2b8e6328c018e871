//! Key payload carried inside a [`WrappedKeyFrame`](crate::WrappedKeyFrame).
//!
//! ```text
//! [alg_len: u8][key_len: u8][alg name][key bytes]
//! ```
//!
//! The payload is the plaintext of the RSA ciphertext, so both lengths are
//! single bytes and the buffer must be consumed exactly.

use bytes::{Buf, BufMut};
use zeroize::Zeroizing;

use crate::errors::{ProtocolError, Result};

/// Largest field a u8 length prefix can describe.
pub const MAX_PAYLOAD_FIELD_LEN: usize = u8::MAX as usize;

/// Symmetric algorithm name and key bytes, as sent by the initiator.
///
/// Key bytes are zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPayload {
    /// Symmetric algorithm name (`"AES"`)
    pub algorithm: String,

    /// Raw symmetric key
    pub key: Zeroizing<Vec<u8>>,
}

impl KeyPayload {
    /// Create a payload.
    pub fn new(algorithm: impl Into<String>, key: &[u8]) -> Self {
        Self { algorithm: algorithm.into(), key: Zeroizing::new(key.to_vec()) }
    }

    /// Encode to a fresh, zeroize-on-drop buffer.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FieldTooLong` if either field exceeds 255 bytes
    pub fn to_bytes(&self) -> Result<Zeroizing<Vec<u8>>> {
        check_len("algorithm", self.algorithm.len())?;
        check_len("key", self.key.len())?;

        let mut buf = Zeroizing::new(Vec::with_capacity(2 + self.algorithm.len() + self.key.len()));
        buf.put_u8(self.algorithm.len() as u8);
        buf.put_u8(self.key.len() as u8);
        buf.put_slice(self.algorithm.as_bytes());
        buf.put_slice(&self.key);
        Ok(buf)
    }

    /// Decode a payload, requiring the lengths to account for every byte.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooShort` without both length bytes
    /// - `ProtocolError::FieldTruncated` if the declared lengths overrun
    /// - `ProtocolError::TrailingBytes` if bytes remain
    /// - `ProtocolError::InvalidUtf8` for a non-UTF-8 algorithm name
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut buf = bytes;
        if buf.remaining() < 2 {
            return Err(ProtocolError::FrameTooShort { expected: 2, actual: buf.remaining() });
        }

        let alg_len = usize::from(buf.get_u8());
        let key_len = usize::from(buf.get_u8());

        if alg_len > buf.remaining() {
            return Err(ProtocolError::FieldTruncated {
                field: "algorithm",
                declared: alg_len,
                available: buf.remaining(),
            });
        }
        let (algorithm, rest) = buf.split_at(alg_len);

        if key_len > rest.len() {
            return Err(ProtocolError::FieldTruncated {
                field: "key",
                declared: key_len,
                available: rest.len(),
            });
        }
        let (key, rest) = rest.split_at(key_len);

        if !rest.is_empty() {
            return Err(ProtocolError::TrailingBytes { frame: "key payload", count: rest.len() });
        }

        let algorithm = std::str::from_utf8(algorithm)
            .map_err(|_| ProtocolError::InvalidUtf8 { field: "algorithm" })?;

        Ok(Self::new(algorithm, key))
    }
}

impl std::fmt::Debug for KeyPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPayload")
            .field("algorithm", &self.algorithm)
            .field("key_len", &self.key.len())
            .finish()
    }
}

fn check_len(field: &'static str, len: usize) -> Result<()> {
    if len > MAX_PAYLOAD_FIELD_LEN {
        return Err(ProtocolError::FieldTooLong { field, len, max: MAX_PAYLOAD_FIELD_LEN });
    }
    Ok(())
}
