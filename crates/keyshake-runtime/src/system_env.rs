//! Production environment backed by the OS clock and OS entropy.
//!
//! Sessions driven by [`SystemEnv`] are not reproducible: handshake timeouts
//! follow wall-clock time and every RSA key pair and session key comes from
//! getrandom.

use std::time::Duration;

use keyshake_core::Environment;

/// Production environment using system time and cryptographic RNG.
///
/// # Security
///
/// The RNG is getrandom (`/dev/urandom` on Linux, `BCryptGenRandom` on
/// Windows), suitable for RSA key generation and session keys.
///
/// # Panics
///
/// Panics if the OS RNG fails. Key material cannot be generated without it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG failure is unrecoverable, no key material can be made");
    }
}
