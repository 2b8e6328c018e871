//! Keyshake Protocol Core
//!
//! Bootstraps an encrypted session over an existing message channel without a
//! pre-shared key. The responder publishes an RSA public key; the initiator
//! answers with a fresh AES session key wrapped under it. From then on every
//! application message is encrypted with the session cipher.
//!
//! # Components
//!
//! - [`handshake`]: the two halves of the key exchange, usable on their own
//! - [`role`]: per-end strategies plugged into the state machine
//! - [`connection`]: sans-IO state machine gating traffic behind the handshake
//! - [`env`]: time and randomness, injected for deterministic tests
//!
//! # Security
//!
//! - No identity authentication: the public key is trusted on first use
//! - No forward secrecy across reconnects and no replay protection
//! - Integrity: every session message carries an HMAC-SHA256 tag

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod connection;
pub mod env;
pub mod error;
pub mod handshake;
pub mod role;

pub use connection::{
    Connection, ConnectionAction, ConnectionConfig, ConnectionState, DEFAULT_HANDSHAKE_TIMEOUT,
    DEFAULT_MAX_QUEUED_SENDS,
};
pub use env::{EnvRng, Environment};
pub use error::{ConnectionError, ErrorKind};
pub use handshake::{DEFAULT_SESSION_ALGORITHM, Initiator, Responder};
pub use role::{Completed, InitiatorRole, ResponderRole, Role};
