//! Keyshake session runtime.
//!
//! Production glue that wraps [`keyshake_core`]'s action-based connection
//! state machine with real I/O: tokio tasks, message transports, the system
//! clock and OS entropy.
//!
//! # Components
//!
//! - [`spawn_session`]: runs one connection as a tokio task
//! - [`Transport`]: message boundary the session sends and receives through,
//!   split into a [`SendHalf`] and a [`RecvHalf`], with [`MemoryTransport`]
//!   and [`TcpTransport`] implementations
//! - [`SystemEnv`]: production environment (real time, crypto RNG)
//! - [`echo`]: the echo service behind the `keyshake` binary

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod echo;
pub mod session;
mod system_env;
pub mod transport;

pub use echo::{request_replies, serve_echo};
pub use session::{
    CloseReason, DEFAULT_CHANNEL_CAPACITY, SessionConfig, SessionError, SessionEvent,
    SessionHandle, spawn_session,
};
pub use system_env::SystemEnv;
pub use transport::{
    MAX_MESSAGE_LEN, MemoryTransport, RecvHalf, SendHalf, TcpReceiver, TcpSender, TcpTransport,
    Transport, TransportError,
};
