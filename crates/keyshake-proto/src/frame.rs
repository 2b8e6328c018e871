//! Handshake frames.
//!
//! Both frames start with the 4-byte magic followed by u16-length-prefixed
//! fields, all big-endian:
//!
//! ```text
//! PublicKeyFrame:  [magic: u32][alg_len: u16][alg][key_len: u16][SubjectPublicKeyInfo DER]
//! WrappedKeyFrame: [magic: u32][ct_len: u16][RSA ciphertext]
//! ```
//!
//! A frame is exactly one transport message. Decoding rejects anything after
//! the last field.
//!
//! # Security
//!
//! Structural validity only: the public key is not authenticated (trust on
//! first use) and the ciphertext is not decrypted here.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::errors::{ProtocolError, Result};

/// Magic number that opens every handshake frame.
pub const MAGIC: u32 = 0xAEF8_5217;

/// Largest field a u16 length prefix can describe (65 535 bytes).
pub const MAX_FIELD_LEN: usize = u16::MAX as usize;

const MAGIC_LEN: usize = 4;
const PREFIX_LEN: usize = 2;

/// Returns true if `bytes` starts with the handshake magic.
///
/// Does not validate the rest of the frame.
pub fn is_handshake_frame(bytes: &[u8]) -> bool {
    bytes.get(..MAGIC_LEN).is_some_and(|m| m == MAGIC.to_be_bytes())
}

/// Responder's opening frame: bootstrap algorithm and encoded public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyFrame {
    /// Asymmetric algorithm name (`"RSA"`)
    pub algorithm: String,

    /// X.509 `SubjectPublicKeyInfo`, DER
    pub public_key: Bytes,
}

impl PublicKeyFrame {
    /// Create a frame.
    pub fn new(algorithm: impl Into<String>, public_key: impl Into<Bytes>) -> Self {
        Self { algorithm: algorithm.into(), public_key: public_key.into() }
    }

    /// Encode into `dst`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FieldTooLong` if either field exceeds
    ///   [`MAX_FIELD_LEN`]
    /// - `ProtocolError::EmptyField` if the algorithm name is empty
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        if self.algorithm.is_empty() {
            return Err(ProtocolError::EmptyField { field: "algorithm" });
        }
        check_field_len("algorithm", self.algorithm.len())?;
        check_field_len("public key", self.public_key.len())?;

        dst.put_u32(MAGIC);
        put_field(dst, self.algorithm.as_bytes());
        put_field(dst, &self.public_key);
        Ok(())
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(
            MAGIC_LEN + 2 * PREFIX_LEN + self.algorithm.len() + self.public_key.len(),
        );
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode from wire bytes.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::InvalidMagic` if the magic does not match (nothing
    ///   else is parsed)
    /// - `ProtocolError::FieldTruncated` if a length prefix overruns the buffer
    /// - `ProtocolError::InvalidUtf8` / `EmptyField` for a bad algorithm name
    /// - `ProtocolError::TrailingBytes` if bytes follow the public key
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut buf = bytes;
        read_magic(&mut buf)?;

        let algorithm = read_field(&mut buf, "algorithm")?;
        let algorithm = String::from_utf8(algorithm.to_vec())
            .map_err(|_| ProtocolError::InvalidUtf8 { field: "algorithm" })?;
        if algorithm.is_empty() {
            return Err(ProtocolError::EmptyField { field: "algorithm" });
        }

        let public_key = read_field(&mut buf, "public key")?;
        expect_end(buf, "public key frame")?;

        Ok(Self { algorithm, public_key })
    }
}

/// Initiator's reply: the key payload encrypted under the responder's public
/// key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedKeyFrame {
    /// Asymmetric ciphertext of the key payload
    pub ciphertext: Bytes,
}

impl WrappedKeyFrame {
    /// Create a frame.
    pub fn new(ciphertext: impl Into<Bytes>) -> Self {
        Self { ciphertext: ciphertext.into() }
    }

    /// Encode into `dst`.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        check_field_len("ciphertext", self.ciphertext.len())?;

        dst.put_u32(MAGIC);
        put_field(dst, &self.ciphertext);
        Ok(())
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(MAGIC_LEN + PREFIX_LEN + self.ciphertext.len());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode from wire bytes.
    ///
    /// Same error rules as [`PublicKeyFrame::decode`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut buf = bytes;
        read_magic(&mut buf)?;

        let ciphertext = read_field(&mut buf, "ciphertext")?;
        expect_end(buf, "wrapped key frame")?;

        Ok(Self { ciphertext })
    }
}

fn check_field_len(field: &'static str, len: usize) -> Result<()> {
    if len > MAX_FIELD_LEN {
        return Err(ProtocolError::FieldTooLong { field, len, max: MAX_FIELD_LEN });
    }
    Ok(())
}

fn put_field(dst: &mut impl BufMut, field: &[u8]) {
    debug_assert!(field.len() <= MAX_FIELD_LEN);
    dst.put_u16(field.len() as u16);
    dst.put_slice(field);
}

fn read_magic(buf: &mut &[u8]) -> Result<()> {
    if buf.remaining() < MAGIC_LEN {
        return Err(ProtocolError::FrameTooShort { expected: MAGIC_LEN, actual: buf.remaining() });
    }

    let found = buf.get_u32();
    if found != MAGIC {
        return Err(ProtocolError::InvalidMagic { expected: MAGIC, found });
    }
    Ok(())
}

fn read_field(buf: &mut &[u8], field: &'static str) -> Result<Bytes> {
    if buf.remaining() < PREFIX_LEN {
        return Err(ProtocolError::FrameTooShort { expected: PREFIX_LEN, actual: buf.remaining() });
    }

    let declared = usize::from(buf.get_u16());
    if declared > buf.remaining() {
        return Err(ProtocolError::FieldTruncated {
            field,
            declared,
            available: buf.remaining(),
        });
    }

    Ok(buf.copy_to_bytes(declared))
}

fn expect_end(buf: &[u8], frame: &'static str) -> Result<()> {
    if !buf.is_empty() {
        return Err(ProtocolError::TrailingBytes { frame, count: buf.len() });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_key_frame_layout() {
        let frame = PublicKeyFrame::new("RSA", vec![0xAA, 0xBB]);
        let bytes = frame.to_bytes().unwrap();

        assert_eq!(
            bytes.as_ref(),
            &[0xAE, 0xF8, 0x52, 0x17, 0x00, 0x03, b'R', b'S', b'A', 0x00, 0x02, 0xAA, 0xBB]
        );
        assert_eq!(PublicKeyFrame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn wrapped_key_frame_layout() {
        let frame = WrappedKeyFrame::new(vec![1, 2, 3]);
        let bytes = frame.to_bytes().unwrap();

        assert_eq!(bytes.as_ref(), &[0xAE, 0xF8, 0x52, 0x17, 0x00, 0x03, 1, 2, 3]);
        assert_eq!(WrappedKeyFrame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn wrong_magic_rejected() {
        let mut bytes = WrappedKeyFrame::new(vec![1, 2, 3]).to_bytes().unwrap().to_vec();
        bytes[0] = 0x00;

        assert_eq!(
            WrappedKeyFrame::decode(&bytes),
            Err(ProtocolError::InvalidMagic { expected: MAGIC, found: 0x00F8_5217 })
        );
        assert!(!is_handshake_frame(&bytes));
    }

    #[test]
    fn short_buffers_rejected() {
        assert!(matches!(
            WrappedKeyFrame::decode(&[0xAE, 0xF8]),
            Err(ProtocolError::FrameTooShort { expected: 4, actual: 2 })
        ));
        assert!(matches!(
            WrappedKeyFrame::decode(&MAGIC.to_be_bytes()),
            Err(ProtocolError::FrameTooShort { expected: 2, actual: 0 })
        ));
    }

    #[test]
    fn declared_length_beyond_buffer_rejected() {
        let mut bytes = MAGIC.to_be_bytes().to_vec();
        bytes.extend_from_slice(&10u16.to_be_bytes());
        bytes.extend_from_slice(&[0u8; 9]);

        assert_eq!(
            WrappedKeyFrame::decode(&bytes),
            Err(ProtocolError::FieldTruncated { field: "ciphertext", declared: 10, available: 9 })
        );
    }

    #[test]
    fn max_field_accepted_when_backed() {
        let frame = WrappedKeyFrame::new(vec![0x42; MAX_FIELD_LEN]);
        let bytes = frame.to_bytes().unwrap();
        assert_eq!(bytes.len(), MAGIC_LEN + PREFIX_LEN + MAX_FIELD_LEN);
        assert_eq!(WrappedKeyFrame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn oversized_field_rejected_on_encode() {
        let frame = WrappedKeyFrame::new(vec![0u8; MAX_FIELD_LEN + 1]);
        assert!(matches!(
            frame.to_bytes(),
            Err(ProtocolError::FieldTooLong { field: "ciphertext", len, .. }) if len == MAX_FIELD_LEN + 1
        ));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = WrappedKeyFrame::new(vec![1]).to_bytes().unwrap().to_vec();
        bytes.push(0xFF);

        assert_eq!(
            WrappedKeyFrame::decode(&bytes),
            Err(ProtocolError::TrailingBytes { frame: "wrapped key frame", count: 1 })
        );
    }

    #[test]
    fn algorithm_must_be_utf8_and_non_empty() {
        let mut bytes = MAGIC.to_be_bytes().to_vec();
        bytes.extend_from_slice(&[0x00, 0x01, 0xFF, 0x00, 0x00]);
        assert_eq!(
            PublicKeyFrame::decode(&bytes),
            Err(ProtocolError::InvalidUtf8 { field: "algorithm" })
        );

        let mut bytes = MAGIC.to_be_bytes().to_vec();
        bytes.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
        assert_eq!(
            PublicKeyFrame::decode(&bytes),
            Err(ProtocolError::EmptyField { field: "algorithm" })
        );

        assert!(PublicKeyFrame::new("", vec![1]).to_bytes().is_err());
    }

    #[test]
    fn magic_detection() {
        assert!(is_handshake_frame(&[0xAE, 0xF8, 0x52, 0x17]));
        assert!(is_handshake_frame(&[0xAE, 0xF8, 0x52, 0x17, 0x99]));
        assert!(!is_handshake_frame(&[0xAE, 0xF8, 0x52]));
        assert!(!is_handshake_frame(&[]));
    }
}
