//! Connection state machine.
//!
//! Gates application traffic behind the key exchange and then runs every
//! message through the session cipher. Uses the action pattern: methods take
//! input (frames, payloads, time) and return actions for the driver to
//! execute. The state machine does no I/O.
//!
//! # State Machine
//!
//! ```text
//!   open   ┌───────────────────┐  handshake frame   ┌─────────────┐
//! ────────>│ AwaitingHandshake │───────────────────>│ Established │
//!          └───────────────────┘                    └─────────────┘
//!                    │                                     │
//!                    │ error / timeout / close             │ error / close
//!                    ↓                                     ↓
//!               ┌────────┐                            ┌────────┐
//!               │ Closed │                            │ Closed │
//!               └────────┘                            └────────┘
//! ```
//!
//! Transitions are computed by pure step functions that take the current
//! phase by value and return the next one. The session cipher lives inside
//! the `Established` phase, so it exists exactly when the connection is
//! established. A failed step leaves the connection `Closed`.

use std::{
    collections::VecDeque,
    ops::Sub,
    time::{Duration, Instant},
};

use bytes::Bytes;
use keyshake_crypto::{Cipher, SessionCipher};
use keyshake_proto::is_handshake_frame;
use rand::{CryptoRng, RngCore};

use crate::{
    env::Environment,
    error::ConnectionError,
    role::{Completed, Role},
};

/// Time allowed for the key exchange to complete after `open`.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Application sends held while the handshake is in progress.
pub const DEFAULT_MAX_QUEUED_SENDS: usize = 64;

/// Actions returned by the connection state machine.
///
/// The driver executes these in order. `SendFrame` must complete before the
/// next action runs, so `NotifyReady` is never surfaced before the handshake
/// frame that precedes it is on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Send these bytes to the peer as one transport message
    SendFrame(Bytes),

    /// The application may start sending
    NotifyReady,

    /// Decrypted application data for the application
    Deliver(Bytes),
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Key exchange in progress; no application data is delivered
    AwaitingHandshake,
    /// Session cipher agreed; traffic is encrypted
    Established,
    /// Connection closed (graceful or error)
    Closed,
}

/// Connection configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Timeout for completing the handshake
    pub handshake_timeout: Duration,
    /// Maximum application sends queued before the handshake completes
    pub max_queued_sends: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_queued_sends: DEFAULT_MAX_QUEUED_SENDS,
        }
    }
}

enum Phase<P> {
    AwaitingHandshake { pending: P, queued: VecDeque<Bytes> },
    Established(SessionCipher),
    Closed,
}

impl<P> Phase<P> {
    fn state(&self) -> ConnectionState {
        match self {
            Self::AwaitingHandshake { .. } => ConnectionState::AwaitingHandshake,
            Self::Established(_) => ConnectionState::Established,
            Self::Closed => ConnectionState::Closed,
        }
    }
}

type Step<P> = Result<(Phase<P>, Vec<ConnectionAction>), ConnectionError>;

/// Connection state machine
///
/// One per logical connection, driven sequentially. Generic over the role
/// (which end of the handshake this is) and over `Instant` so tests can use
/// virtual time.
pub struct Connection<R, I = Instant>
where
    R: Role,
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    role: R,
    config: ConnectionConfig,
    phase: Phase<R::Pending>,
    opened_at: I,
}

impl<R, I> Connection<R, I>
where
    R: Role,
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Open a connection and start the handshake.
    ///
    /// A responder returns `[SendFrame(public key frame), NotifyReady]`; an
    /// initiator returns no actions and waits for the peer.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::Crypto` if key generation fails
    pub fn open<E>(
        role: R,
        config: ConnectionConfig,
        env: &E,
    ) -> Result<(Self, Vec<ConnectionAction>), ConnectionError>
    where
        E: Environment<Instant = I>,
    {
        let (pending, opening) = role.on_open(&mut env.rng())?;

        let mut actions = Vec::new();
        if let Some(frame) = opening {
            actions.push(ConnectionAction::SendFrame(frame));
            actions.push(ConnectionAction::NotifyReady);
        }

        tracing::debug!(role = role.name(), "connection opened, awaiting handshake");

        let connection = Self {
            role,
            config,
            phase: Phase::AwaitingHandshake { pending, queued: VecDeque::new() },
            opened_at: env.now(),
        };
        Ok((connection, actions))
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.phase.state()
    }

    /// Role strategy this connection runs.
    pub fn role(&self) -> &R {
        &self.role
    }

    /// Time left before the handshake times out. `None` unless awaiting the
    /// handshake.
    pub fn handshake_time_remaining(&self, now: I) -> Option<Duration> {
        match self.phase {
            Phase::AwaitingHandshake { .. } => {
                Some(self.config.handshake_timeout.saturating_sub(now - self.opened_at))
            },
            _ => None,
        }
    }

    /// Whether [`send`](Self::send) would accept a payload right now.
    ///
    /// False once the pre-handshake queue holds `max_queued_sends` payloads
    /// and after close. Drivers stop pulling application data while this is
    /// false instead of failing the connection with `QueueFull`.
    pub fn accepts_send(&self) -> bool {
        match &self.phase {
            Phase::AwaitingHandshake { queued, .. } => queued.len() < self.config.max_queued_sends,
            Phase::Established(_) => true,
            Phase::Closed => false,
        }
    }

    /// Process one inbound transport message.
    ///
    /// While awaiting the handshake the message must be the peer's handshake
    /// frame. Once established every message is application ciphertext and
    /// is returned as `Deliver`.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::Protocol` if the handshake frame is malformed
    ///   (including a magic mismatch)
    /// - `ConnectionError::Crypto` if the handshake or an application message
    ///   fails to decrypt
    /// - `ConnectionError::HandshakeAfterEstablished` for a second handshake
    /// - `ConnectionError::InvalidState` once closed
    pub fn handle_frame<E: Environment>(
        &mut self,
        frame: &[u8],
        env: &E,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        let Self { role, phase, .. } = self;
        transition(phase, role.name(), |phase| inbound(role, phase, frame, &mut env.rng()))
    }

    /// Submit application data for the peer.
    ///
    /// Queued while the handshake is in progress and flushed, in order, when
    /// it completes.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::QueueFull` if `max_queued_sends` payloads are
    ///   already waiting
    /// - `ConnectionError::InvalidState` once closed
    pub fn send(&mut self, payload: Bytes) -> Result<Vec<ConnectionAction>, ConnectionError> {
        let Self { role, config, phase, .. } = self;
        transition(phase, role.name(), |phase| outbound(config, phase, payload))
    }

    /// Enforce the handshake timeout.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::HandshakeTimeout` once `handshake_timeout` has
    ///   elapsed since `open` without the handshake completing
    pub fn tick(&mut self, now: I) -> Result<(), ConnectionError> {
        if !matches!(self.phase, Phase::AwaitingHandshake { .. }) {
            return Ok(());
        }

        let elapsed = now - self.opened_at;
        if elapsed < self.config.handshake_timeout {
            return Ok(());
        }

        let err = ConnectionError::HandshakeTimeout { elapsed };
        tracing::warn!(role = self.role.name(), error = %err, "connection failed");
        self.phase = Phase::Closed;
        Err(err)
    }

    /// Mark connection as closed. Key material is dropped.
    pub fn close(&mut self) {
        if self.state() != ConnectionState::Closed {
            tracing::debug!(role = self.role.name(), from = ?self.state(), "connection closed");
        }
        self.phase = Phase::Closed;
    }
}

impl<R, I> std::fmt::Debug for Connection<R, I>
where
    R: Role + std::fmt::Debug,
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role)
            .field("state", &self.state())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Run one step, leaving `phase` Closed if it fails.
fn transition<P>(
    phase: &mut Phase<P>,
    role: &'static str,
    step: impl FnOnce(Phase<P>) -> Step<P>,
) -> Result<Vec<ConnectionAction>, ConnectionError> {
    let current = std::mem::replace(phase, Phase::Closed);
    let from = current.state();

    match step(current) {
        Ok((next, actions)) => {
            if next.state() != from {
                tracing::debug!(role, ?from, to = ?next.state(), "connection state changed");
            }
            *phase = next;
            Ok(actions)
        },
        Err(err) => {
            tracing::warn!(role, ?from, error = %err, "connection failed");
            Err(err)
        },
    }
}

fn inbound<R, G>(role: &R, phase: Phase<R::Pending>, frame: &[u8], rng: &mut G) -> Step<R::Pending>
where
    R: Role,
    G: RngCore + CryptoRng,
{
    match phase {
        Phase::AwaitingHandshake { pending, queued } => {
            let Completed { cipher, reply } = role.on_handshake_frame(pending, frame, rng)?;

            let mut actions = Vec::with_capacity(queued.len() + 2);
            if let Some(reply) = reply {
                actions.push(ConnectionAction::SendFrame(reply));
                actions.push(ConnectionAction::NotifyReady);
            }
            for payload in queued {
                actions.push(ConnectionAction::SendFrame(Bytes::from(cipher.encrypt(&payload)?)));
            }

            Ok((Phase::Established(cipher), actions))
        },
        Phase::Established(cipher) => match cipher.decrypt(frame) {
            Ok(plaintext) => {
                Ok((Phase::Established(cipher), vec![ConnectionAction::Deliver(plaintext.into())]))
            },
            Err(_) if is_handshake_frame(frame) => Err(ConnectionError::HandshakeAfterEstablished),
            Err(err) => Err(err.into()),
        },
        Phase::Closed => Err(ConnectionError::InvalidState {
            state: ConnectionState::Closed,
            operation: "receive",
        }),
    }
}

fn outbound<P>(config: &ConnectionConfig, phase: Phase<P>, payload: Bytes) -> Step<P> {
    match phase {
        Phase::AwaitingHandshake { pending, mut queued } => {
            if queued.len() >= config.max_queued_sends {
                return Err(ConnectionError::QueueFull { limit: config.max_queued_sends });
            }
            queued.push_back(payload);
            Ok((Phase::AwaitingHandshake { pending, queued }, Vec::new()))
        },
        Phase::Established(cipher) => {
            let ciphertext = cipher.encrypt(&payload)?;
            Ok((Phase::Established(cipher), vec![ConnectionAction::SendFrame(ciphertext.into())]))
        },
        Phase::Closed => Err(ConnectionError::InvalidState {
            state: ConnectionState::Closed,
            operation: "send",
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use keyshake_crypto::bootstrap::MIN_KEY_BITS;
    use keyshake_proto::{PublicKeyFrame, WrappedKeyFrame};
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;
    use crate::{
        error::ErrorKind,
        role::{InitiatorRole, ResponderRole},
    };

    /// Seeded RNG plus a manually advanced virtual clock
    #[derive(Clone)]
    struct TestEnv {
        rng: Arc<Mutex<ChaCha20Rng>>,
        clock: Arc<Mutex<Duration>>,
    }

    impl TestEnv {
        fn new(seed: u64) -> Self {
            Self {
                rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
                clock: Arc::new(Mutex::new(Duration::ZERO)),
            }
        }

        fn advance(&self, by: Duration) {
            *self.clock.lock().unwrap() += by;
        }
    }

    impl Environment for TestEnv {
        type Instant = Duration;

        fn now(&self) -> Duration {
            *self.clock.lock().unwrap()
        }

        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            async {}
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            self.rng.lock().unwrap().fill_bytes(buffer);
        }
    }

    type Responder = Connection<ResponderRole, Duration>;
    type Initiator = Connection<InitiatorRole, Duration>;

    fn sent_frames(actions: &[ConnectionAction]) -> Vec<Bytes> {
        actions
            .iter()
            .filter_map(|a| match a {
                ConnectionAction::SendFrame(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    fn open_pair(env: &TestEnv, config: ConnectionConfig) -> (Responder, Initiator, Bytes) {
        let (responder, actions) =
            Connection::open(ResponderRole::with_key_bits(MIN_KEY_BITS), config.clone(), env)
                .unwrap();
        let (initiator, none) = Connection::open(InitiatorRole::new(), config, env).unwrap();
        assert!(none.is_empty());

        let public_key_frame = sent_frames(&actions).remove(0);
        (responder, initiator, public_key_frame)
    }

    /// Drive both ends to Established
    fn established_pair(env: &TestEnv) -> (Responder, Initiator) {
        let (mut responder, mut initiator, public_key_frame) =
            open_pair(env, ConnectionConfig::default());

        let actions = initiator.handle_frame(&public_key_frame, env).unwrap();
        let wrapped = sent_frames(&actions).remove(0);
        let actions = responder.handle_frame(&wrapped, env).unwrap();
        assert!(actions.is_empty());

        (responder, initiator)
    }

    #[test]
    fn responder_sends_public_key_then_ready() {
        let env = TestEnv::new(1);
        let role = ResponderRole::with_key_bits(MIN_KEY_BITS);
        let (responder, actions) =
            Connection::open(role, ConnectionConfig::default(), &env).unwrap();

        assert_eq!(responder.state(), ConnectionState::AwaitingHandshake);
        assert_eq!(actions.len(), 2);
        let ConnectionAction::SendFrame(frame) = &actions[0] else {
            panic!("expected SendFrame first, got {:?}", actions[0]);
        };
        assert_eq!(PublicKeyFrame::decode(frame).unwrap().algorithm, "RSA");
        assert_eq!(actions[1], ConnectionAction::NotifyReady);
    }

    #[test]
    fn initiator_replies_then_ready() {
        let env = TestEnv::new(2);
        let (_responder, mut initiator, public_key_frame) =
            open_pair(&env, ConnectionConfig::default());

        assert_eq!(initiator.state(), ConnectionState::AwaitingHandshake);

        let actions = initiator.handle_frame(&public_key_frame, &env).unwrap();
        assert_eq!(initiator.state(), ConnectionState::Established);
        assert_eq!(actions.len(), 2);
        let ConnectionAction::SendFrame(frame) = &actions[0] else {
            panic!("expected SendFrame first, got {:?}", actions[0]);
        };
        assert!(WrappedKeyFrame::decode(frame).is_ok());
        assert_eq!(actions[1], ConnectionAction::NotifyReady);
    }

    #[test]
    fn hello_world_end_to_end() {
        let env = TestEnv::new(3);
        let (mut responder, mut initiator) = established_pair(&env);
        assert_eq!(responder.state(), ConnectionState::Established);

        let actions = initiator.send(Bytes::from_static(b"Hello World!")).unwrap();
        let ciphertext = sent_frames(&actions).remove(0);
        assert_ne!(ciphertext.as_ref(), b"Hello World!");

        let actions = responder.handle_frame(&ciphertext, &env).unwrap();
        assert_eq!(actions, vec![ConnectionAction::Deliver(Bytes::from_static(b"Hello World!"))]);

        let actions = responder.send(Bytes::from_static(b"Hello back")).unwrap();
        let reply = sent_frames(&actions).remove(0);
        let actions = initiator.handle_frame(&reply, &env).unwrap();
        assert_eq!(actions, vec![ConnectionAction::Deliver(Bytes::from_static(b"Hello back"))]);
    }

    #[test]
    fn both_ends_encrypt_identically() {
        let env = TestEnv::new(4);
        let (mut responder, mut initiator) = established_pair(&env);

        let a = initiator.send(Bytes::from_static(b"same")).unwrap();
        let b = responder.send(Bytes::from_static(b"same")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn nothing_delivered_before_handshake() {
        let env = TestEnv::new(5);
        let (mut responder, _initiator, _) = open_pair(&env, ConnectionConfig::default());

        // Application-looking data while awaiting the wrapped key
        let err = responder.handle_frame(b"plaintext app data", &env).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolFraming);
        assert_eq!(responder.state(), ConnectionState::Closed);
    }

    #[test]
    fn queued_sends_flush_in_order_after_handshake() {
        let env = TestEnv::new(6);
        let (mut responder, mut initiator, public_key_frame) =
            open_pair(&env, ConnectionConfig::default());

        assert!(responder.send(Bytes::from_static(b"first")).unwrap().is_empty());
        assert!(responder.send(Bytes::from_static(b"second")).unwrap().is_empty());

        let actions = initiator.handle_frame(&public_key_frame, &env).unwrap();
        let wrapped = sent_frames(&actions).remove(0);
        let flushed = sent_frames(&responder.handle_frame(&wrapped, &env).unwrap());
        assert_eq!(flushed.len(), 2);

        let delivered: Vec<_> = flushed
            .iter()
            .flat_map(|frame| initiator.handle_frame(frame, &env).unwrap())
            .collect();
        assert_eq!(delivered, vec![
            ConnectionAction::Deliver(Bytes::from_static(b"first")),
            ConnectionAction::Deliver(Bytes::from_static(b"second")),
        ]);
    }

    #[test]
    fn queue_overflow_closes_connection() {
        let env = TestEnv::new(7);
        let config = ConnectionConfig { max_queued_sends: 2, ..ConnectionConfig::default() };
        let (mut responder, _initiator, _) = open_pair(&env, config);

        responder.send(Bytes::from_static(b"1")).unwrap();
        responder.send(Bytes::from_static(b"2")).unwrap();
        let err = responder.send(Bytes::from_static(b"3")).unwrap_err();

        assert_eq!(err, ConnectionError::QueueFull { limit: 2 });
        assert_eq!(err.kind(), ErrorKind::HandshakeState);
        assert_eq!(responder.state(), ConnectionState::Closed);
    }

    #[test]
    fn accepts_send_tracks_queue_room() {
        let env = TestEnv::new(21);
        let config = ConnectionConfig { max_queued_sends: 1, ..ConnectionConfig::default() };
        let (mut responder, mut initiator, public_key_frame) = open_pair(&env, config);

        assert!(responder.accepts_send());
        responder.send(Bytes::from_static(b"early")).unwrap();
        assert!(!responder.accepts_send());

        let wrapped = sent_frames(&initiator.handle_frame(&public_key_frame, &env).unwrap());
        responder.handle_frame(&wrapped[0], &env).unwrap();
        assert!(responder.accepts_send());

        responder.close();
        assert!(!responder.accepts_send());
    }

    #[test]
    fn second_handshake_is_rejected() {
        let env = TestEnv::new(8);
        let (mut responder, mut initiator, public_key_frame) =
            open_pair(&env, ConnectionConfig::default());

        let actions = initiator.handle_frame(&public_key_frame, &env).unwrap();
        let wrapped = sent_frames(&actions).remove(0);
        responder.handle_frame(&wrapped, &env).unwrap();

        let err = responder.handle_frame(&wrapped, &env).unwrap_err();
        assert_eq!(err, ConnectionError::HandshakeAfterEstablished);
        assert_eq!(responder.state(), ConnectionState::Closed);

        let err = initiator.handle_frame(&public_key_frame, &env).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HandshakeState);
    }

    #[test]
    fn corrupted_message_is_crypto_failure() {
        let env = TestEnv::new(9);
        let (mut responder, mut initiator) = established_pair(&env);

        let actions = initiator.send(Bytes::from_static(b"payload")).unwrap();
        let mut ciphertext = sent_frames(&actions).remove(0).to_vec();
        ciphertext[0] ^= 0x80;

        let err = responder.handle_frame(&ciphertext, &env).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CryptoOperation);
        assert_eq!(responder.state(), ConnectionState::Closed);
    }

    #[test]
    fn handshake_times_out() {
        let env = TestEnv::new(10);
        let (_responder, mut initiator, _) = open_pair(&env, ConnectionConfig::default());

        env.advance(Duration::from_secs(10));
        initiator.tick(env.now()).unwrap();
        assert_eq!(
            initiator.handshake_time_remaining(env.now()),
            Some(DEFAULT_HANDSHAKE_TIMEOUT - Duration::from_secs(10))
        );

        env.advance(Duration::from_secs(25));
        let err = initiator.tick(env.now()).unwrap_err();
        assert_eq!(err, ConnectionError::HandshakeTimeout { elapsed: Duration::from_secs(35) });
        assert_eq!(initiator.state(), ConnectionState::Closed);
    }

    #[test]
    fn established_connection_never_times_out() {
        let env = TestEnv::new(11);
        let (mut responder, _initiator) = established_pair(&env);

        env.advance(Duration::from_secs(3600));
        responder.tick(env.now()).unwrap();
        assert_eq!(responder.handshake_time_remaining(env.now()), None);
        assert_eq!(responder.state(), ConnectionState::Established);
    }

    #[test]
    fn closed_connection_rejects_everything() {
        let env = TestEnv::new(12);
        let (mut responder, _initiator) = established_pair(&env);
        responder.close();

        assert_eq!(responder.state(), ConnectionState::Closed);
        assert!(matches!(
            responder.send(Bytes::from_static(b"late")),
            Err(ConnectionError::InvalidState { state: ConnectionState::Closed, operation: "send" })
        ));
        assert!(matches!(
            responder.handle_frame(b"late", &env),
            Err(ConnectionError::InvalidState { operation: "receive", .. })
        ));
    }
}
