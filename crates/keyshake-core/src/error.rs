//! Error types for the keyshake handshake and connection state machine.
//!
//! Each layer keeps its own error: [`CryptoError`] from the ciphers,
//! [`ProtocolError`] from frame parsing, and [`ConnectionError`] for state
//! machine violations. `ConnectionError` wraps the other two so callers see a
//! single type, and [`ConnectionError::kind`] classifies it.
//!
//! Every error is fatal to the connection it occurred on.

use std::{fmt, io, time::Duration};

use keyshake_crypto::CryptoError;
use keyshake_proto::ProtocolError;
use thiserror::Error;

use crate::connection::ConnectionState;

/// Coarse classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unsupported algorithm, invalid key size or key encoding
    CryptoInitialization,
    /// Encrypt/decrypt failed (MAC, padding, truncation, wrong key)
    CryptoOperation,
    /// Handshake frame is malformed
    ProtocolFraming,
    /// Operation is not valid in the current connection state
    HandshakeState,
    /// Underlying transport failed
    TransportPropagation,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CryptoInitialization => "crypto initialization",
            Self::CryptoOperation => "crypto operation",
            Self::ProtocolFraming => "protocol framing",
            Self::HandshakeState => "handshake state",
            Self::TransportPropagation => "transport",
        };
        f.write_str(name)
    }
}

/// Errors that can occur during handshake and connection operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Cipher construction or operation failed
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Handshake frame failed to parse
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Operation attempted in a state that does not allow it
    #[error("invalid state: cannot {operation} while {state:?}")]
    InvalidState {
        /// Current state when error occurred
        state: ConnectionState,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Too many application sends queued before the handshake completed
    #[error("send queue full: {limit} messages already waiting for the handshake")]
    QueueFull {
        /// Configured queue bound
        limit: usize,
    },

    /// Peer sent a handshake frame after the session was established
    #[error("handshake frame received after session was established")]
    HandshakeAfterEstablished,

    /// Handshake did not complete within timeout
    #[error("handshake timeout after {elapsed:?}")]
    HandshakeTimeout {
        /// How long we waited
        elapsed: Duration,
    },
}

impl ConnectionError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Crypto(err) if err.is_initialization() => ErrorKind::CryptoInitialization,
            Self::Crypto(_) => ErrorKind::CryptoOperation,
            Self::Protocol(_) => ErrorKind::ProtocolFraming,
            Self::InvalidState { .. }
            | Self::QueueFull { .. }
            | Self::HandshakeAfterEstablished
            | Self::HandshakeTimeout { .. } => ErrorKind::HandshakeState,
        }
    }
}

/// Convert `ConnectionError` to `io::Error` for compatibility with async I/O
/// APIs.
///
/// This is only for boundary conversion - internally we use `ConnectionError`.
impl From<ConnectionError> for io::Error {
    fn from(err: ConnectionError) -> Self {
        let kind = match &err {
            ConnectionError::HandshakeTimeout { .. } => io::ErrorKind::TimedOut,
            _ => io::ErrorKind::InvalidData,
        };
        Self::new(kind, err)
    }
}
