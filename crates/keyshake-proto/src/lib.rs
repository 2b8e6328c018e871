//! Keyshake Wire Protocol
//!
//! Byte layouts for the two handshake frames and the key payload they carry.
//! Pure encode/decode; no cryptography and no I/O.
//!
//! Application traffic after the handshake is unframed session-cipher output,
//! one ciphertext per transport message. Handshake frames are told apart by
//! their magic number ([`is_handshake_frame`]).

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod errors;
pub mod frame;
pub mod payload;

pub use errors::{ProtocolError, Result};
pub use frame::{MAGIC, MAX_FIELD_LEN, PublicKeyFrame, WrappedKeyFrame, is_handshake_frame};
pub use payload::{KeyPayload, MAX_PAYLOAD_FIELD_LEN};
