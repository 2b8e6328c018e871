//! Async session runtime.
//!
//! Executes a [`Connection`]'s actions against a [`Transport`]. Each session
//! is one tokio task that owns the state machine and multiplexes its event
//! sources:
//!
//! ```text
//!   receive half ──────┐                       ┌──> frame queue ──> send half
//!   SessionHandle ─────┼──> select! ──> Connection
//!   handshake timer ───┘                       └──> event queue ──> events
//! ```
//!
//! Frames are written one at a time while reads continue, so a peer that is
//! slow to read never stops the session from accepting its messages, and an
//! application blocked on [`SessionHandle::send`] never stops event delivery.
//! An event waits until every frame queued before it has been handed to the
//! transport, so [`SessionEvent::Ready`] is never observed before the
//! handshake frame that precedes it.
//!
//! Backpressure: reads pause while `channel_capacity` events are undelivered,
//! and application sends are not pulled while `channel_capacity` frames are
//! unwritten or the pre-handshake queue is full.
//!
//! Any error ends the session: it is reported as [`SessionEvent::Failed`] and
//! returned from [`SessionHandle::join`]. Aborting the task drops all key
//! material.

use std::{collections::VecDeque, future::Future, pin::Pin, time::Duration};

use bytes::Bytes;
use keyshake_core::{
    Connection, ConnectionAction, ConnectionConfig, ConnectionError, Environment, ErrorKind, Role,
};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::transport::{RecvHalf, SendHalf, Transport, TransportError};

/// Default capacity of the command and event channels and the session's
/// internal frame and event queues.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 32;

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// State machine configuration
    pub connection: ConnectionConfig,
    /// Capacity of the command and event channels, and of the unwritten
    /// frame and undelivered event queues
    pub channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { connection: ConnectionConfig::default(), channel_capacity: DEFAULT_CHANNEL_CAPACITY }
    }
}

/// Errors that end a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The state machine rejected a frame, payload, or timed out
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The transport failed
    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),

    /// The session has already ended
    #[error("session closed")]
    Closed,

    /// The session task panicked or was aborted
    #[error("session task ended abnormally: {0}")]
    Aborted(String),
}

impl SessionError {
    /// Error category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection(err) => err.kind(),
            Self::Closed => ErrorKind::HandshakeState,
            Self::Transport(_) | Self::Aborted(_) => ErrorKind::TransportPropagation,
        }
    }
}

/// Why a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the transport
    PeerClosed,
    /// [`SessionHandle::close`] was called or every handle was dropped
    Local,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PeerClosed => write!(f, "peer closed"),
            Self::Local => write!(f, "closed locally"),
        }
    }
}

/// Events reported to the application, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The application may start sending
    Ready,
    /// A decrypted message from the peer
    Message(Bytes),
    /// The session ended cleanly; always the last event
    Closed {
        /// Which side ended it
        reason: CloseReason,
    },
    /// The session failed; always the last event
    Failed(SessionError),
}

enum Command {
    Send(Bytes),
    Close,
}

/// Application handle to a running session.
#[derive(Debug)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<Result<CloseReason, SessionError>>,
}

impl SessionHandle {
    /// Submit a message for the peer.
    ///
    /// Sends made before [`SessionEvent::Ready`] are queued and flushed when
    /// the handshake completes. Once the state machine's queue is full, this
    /// waits for the handshake instead of failing.
    pub async fn send(&self, payload: Bytes) -> Result<(), SessionError> {
        self.commands.send(Command::Send(payload)).await.map_err(|_| SessionError::Closed)
    }

    /// Ask the session to close. Does nothing if it has already ended.
    pub async fn close(&self) {
        let _ = self.commands.send(Command::Close).await;
    }

    /// Whether the session task has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the session immediately, dropping its keys.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Wait for the session to end.
    pub async fn join(self) -> Result<CloseReason, SessionError> {
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(SessionError::Aborted(err.to_string())),
        }
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Send(payload) => f.debug_tuple("Send").field(&payload.len()).finish(),
            Self::Close => f.write_str("Close"),
        }
    }
}

/// Spawn a session task running `role` over `transport`.
///
/// The handshake starts immediately. Must be called from within a tokio
/// runtime.
pub fn spawn_session<R, T, E>(
    role: R,
    transport: T,
    env: E,
    config: SessionConfig,
) -> (SessionHandle, mpsc::Receiver<SessionEvent>)
where
    R: Role + Send + 'static,
    R::Pending: Send,
    T: Transport,
    E: Environment,
{
    let capacity = config.channel_capacity.max(1);
    let (command_tx, command_rx) = mpsc::channel(capacity);
    let (event_tx, event_rx) = mpsc::channel(capacity);

    let (sender, receiver) = transport.split();
    let session = Session {
        inbound: receiver,
        outbound: Outbound::new(sender),
        pending: VecDeque::new(),
        commands: command_rx,
        events: event_tx,
        capacity,
    };
    let task = tokio::spawn(session.run(role, env, config.connection));

    (SessionHandle { commands: command_tx, task }, event_rx)
}

/// In-flight write. Owns the sender so it can sit in a struct across
/// `select!` iterations.
type Write<S> = Pin<Box<dyn Future<Output = (S, Result<(), TransportError>)> + Send>>;

/// Frames waiting for the transport, written strictly in order.
struct Outbound<S> {
    queue: VecDeque<Bytes>,
    idle: Option<S>,
    in_flight: Option<Write<S>>,
    /// Frames ever queued
    queued: u64,
    /// Frames whose send has completed
    sent: u64,
}

impl<S: SendHalf> Outbound<S> {
    fn new(sender: S) -> Self {
        Self { queue: VecDeque::new(), idle: Some(sender), in_flight: None, queued: 0, sent: 0 }
    }

    fn push(&mut self, frame: Bytes) {
        self.queue.push_back(frame);
        self.queued += 1;
    }

    fn backlog(&self) -> usize {
        self.queue.len()
    }

    fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.queue.is_empty()
    }

    /// Complete one frame send. Cancel-safe: a write interrupted here resumes
    /// on the next call.
    async fn write_next(&mut self) -> Result<(), TransportError> {
        if self.in_flight.is_none() {
            let Some(frame) = self.queue.pop_front() else {
                return Ok(());
            };
            let Some(mut sender) = self.idle.take() else {
                return Err(TransportError::Closed);
            };
            self.in_flight = Some(Box::pin(async move {
                let result = sender.send(frame).await;
                (sender, result)
            }));
        }

        if let Some(write) = self.in_flight.as_mut() {
            let (sender, result) = write.await;
            self.in_flight = None;
            self.idle = Some(sender);
            result?;
            self.sent += 1;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        while !self.is_idle() {
            self.write_next().await?;
        }
        Ok(())
    }
}

/// Everything one session task owns besides the state machine.
struct Session<S, D> {
    inbound: D,
    outbound: Outbound<S>,
    /// Events for the application, each tagged with the number of frames
    /// that must be sent before it may be delivered
    pending: VecDeque<(u64, SessionEvent)>,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<SessionEvent>,
    capacity: usize,
}

impl<S: SendHalf, D: RecvHalf> Session<S, D> {
    async fn run<R, E>(
        mut self,
        role: R,
        env: E,
        config: ConnectionConfig,
    ) -> Result<CloseReason, SessionError>
    where
        R: Role,
        E: Environment,
    {
        let role_name = role.name();
        let result = self.drive(role, &env, config).await;
        self.commands.close();

        let last = match &result {
            Ok(reason) => {
                tracing::info!(role = role_name, %reason, "session closed");
                SessionEvent::Closed { reason: *reason }
            },
            Err(err) => {
                let kind = err.kind();
                tracing::warn!(role = role_name, %kind, error = %err, "session failed");
                SessionEvent::Failed(err.clone())
            },
        };

        // Events gated on frames that never went out are dropped
        let sent = self.outbound.sent;
        while let Some((after, event)) = self.pending.pop_front() {
            if after <= sent {
                emit(&self.events, event).await;
            }
        }
        emit(&self.events, last).await;

        result
    }

    async fn drive<R, E>(
        &mut self,
        role: R,
        env: &E,
        config: ConnectionConfig,
    ) -> Result<CloseReason, SessionError>
    where
        R: Role,
        E: Environment,
    {
        let (mut connection, actions) = Connection::open(role, config, env)?;
        self.apply(actions);

        loop {
            let remaining = connection.handshake_time_remaining(env.now());
            let reading = self.pending.len() < self.capacity;
            let accepting = connection.accepts_send() && self.outbound.backlog() < self.capacity;
            let writing = !self.outbound.is_idle();
            let delivering = self.deliverable();
            let events = self.events.clone();

            tokio::select! {
                inbound = self.inbound.recv(), if reading => {
                    let Some(frame) = inbound? else {
                        connection.close();
                        return Ok(CloseReason::PeerClosed);
                    };

                    let before = connection.state();
                    let actions = connection.handle_frame(&frame, env)?;
                    if before != connection.state() {
                        tracing::info!(role = connection.role().name(), "handshake complete");
                    }
                    self.apply(actions);
                },

                command = self.commands.recv(), if accepting => match command {
                    Some(Command::Send(payload)) => {
                        let actions = connection.send(payload)?;
                        self.apply(actions);
                    },
                    Some(Command::Close) | None => {
                        connection.close();
                        self.outbound.flush().await?;
                        return Ok(CloseReason::Local);
                    },
                },

                written = self.outbound.write_next(), if writing => written?,

                permit = events.reserve(), if delivering => match permit {
                    Ok(permit) => {
                        if let Some((_, event)) = self.pending.pop_front() {
                            permit.send(event);
                        }
                    },
                    Err(_) => {
                        tracing::debug!("session event receiver dropped");
                        self.pending.clear();
                    },
                },

                () = handshake_deadline(env, remaining) => {
                    connection.tick(env.now())?;
                },
            }
        }
    }

    fn apply(&mut self, actions: Vec<ConnectionAction>) {
        for action in actions {
            match action {
                ConnectionAction::SendFrame(frame) => self.outbound.push(frame),
                ConnectionAction::NotifyReady => self.queue_event(SessionEvent::Ready),
                ConnectionAction::Deliver(payload) => {
                    self.queue_event(SessionEvent::Message(payload));
                },
            }
        }
    }

    fn queue_event(&mut self, event: SessionEvent) {
        if !self.events.is_closed() {
            self.pending.push_back((self.outbound.queued, event));
        }
    }

    fn deliverable(&self) -> bool {
        self.pending.front().is_some_and(|(after, _)| *after <= self.outbound.sent)
    }
}

/// Sleep until the handshake deadline; never completes once established.
async fn handshake_deadline<E: Environment>(env: &E, remaining: Option<Duration>) {
    match remaining {
        Some(remaining) => env.sleep(remaining).await,
        None => std::future::pending().await,
    }
}

async fn emit(events: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    if events.send(event).await.is_err() {
        tracing::debug!("session event receiver dropped");
    }
}
