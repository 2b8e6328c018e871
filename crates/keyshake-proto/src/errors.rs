//! Framing errors for handshake messages.

use thiserror::Error;

/// Result alias for frame encoding and decoding.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Structural errors in handshake frames and key payloads.
///
/// Every variant means the peer sent bytes that are not a well-formed frame.
/// None of them are recoverable on the same connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// First four bytes are not the handshake magic
    #[error("invalid magic number: expected {expected:#010x}, found {found:#010x}")]
    InvalidMagic {
        /// Magic this protocol uses
        expected: u32,
        /// Value that was on the wire
        found: u32,
    },

    /// Buffer ends before a fixed-size header or length prefix
    #[error("frame too short: need {expected} bytes, have {actual}")]
    FrameTooShort {
        /// Bytes needed to continue parsing
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// Length prefix claims more bytes than remain
    #[error("{field} truncated: declared {declared} bytes, {available} available")]
    FieldTruncated {
        /// Which field
        field: &'static str,
        /// Length from the prefix
        declared: usize,
        /// Bytes remaining in the buffer
        available: usize,
    },

    /// Field does not fit its length prefix
    #[error("{field} too long: {len} bytes exceeds {max}")]
    FieldTooLong {
        /// Which field
        field: &'static str,
        /// Actual length
        len: usize,
        /// Largest encodable length
        max: usize,
    },

    /// Bytes left over after the last field
    #[error("{count} trailing bytes after {frame}")]
    TrailingBytes {
        /// Which frame or payload
        frame: &'static str,
        /// Number of unexpected bytes
        count: usize,
    },

    /// Text field is not UTF-8
    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 {
        /// Which field
        field: &'static str,
    },

    /// Required field is empty
    #[error("{field} must not be empty")]
    EmptyField {
        /// Which field
        field: &'static str,
    },
}
