//! Message transports for sessions.
//!
//! A transport moves whole messages: each `send` is delivered to the peer as
//! exactly one `recv`. The session runtime never looks inside a message.
//!
//! - [`MemoryTransport`]: in-process channel pair, for tests and embedding
//! - [`TcpTransport`]: TCP stream with a `u32` big-endian length prefix per
//!   message
//!
//! Both implementations read through a channel, so `recv` is cancel-safe and
//! can sit in a `tokio::select!` next to other event sources. Each splits into
//! a [`SendHalf`] and a [`RecvHalf`] that work independently.

use std::{future::Future, io, net::SocketAddr};

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream, ToSocketAddrs,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::mpsc,
    task::AbortHandle,
};

/// Largest message a [`TcpTransport`] sends or accepts (16 MiB).
pub const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

/// Size of the TCP length prefix.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Inbound messages buffered by the TCP reader task.
const INBOUND_CAPACITY: usize = 32;

/// Transport errors.
///
/// The session runtime only propagates these; it never retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The peer or the local side has gone away.
    #[error("transport closed")]
    Closed,

    /// Socket I/O failed.
    #[error("transport I/O failed: {0}")]
    Io(String),

    /// Message exceeds [`MAX_MESSAGE_LEN`].
    #[error("message of {len} bytes exceeds limit of {max}")]
    MessageTooLarge {
        /// Message length
        len: usize,
        /// Maximum allowed
        max: usize,
    },

    /// Stream ended inside a length prefix or message body.
    #[error("connection closed mid-message ({received} of {expected} bytes)")]
    Truncated {
        /// Bytes expected
        expected: usize,
        /// Bytes received before EOF
        received: usize,
    },
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Sending side of a transport.
pub trait SendHalf: Send + 'static {
    /// Hand one message to the transport.
    ///
    /// Completes once the message is accepted for delivery, so messages
    /// arrive in the order their sends completed.
    fn send(&mut self, message: Bytes) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Receiving side of a transport.
pub trait RecvHalf: Send + 'static {
    /// Receive the next message.
    ///
    /// Returns `Ok(None)` once the peer has closed cleanly. Cancel-safe: if
    /// the future is dropped before completing, no message is lost.
    fn recv(&mut self) -> impl Future<Output = Result<Option<Bytes>, TransportError>> + Send;
}

/// Message transport driven by the session runtime.
///
/// The session splits it so that a write waiting on the peer never stops
/// reads, and the other way round.
pub trait Transport: SendHalf + RecvHalf {
    /// Sending half after [`split`](Self::split)
    type Sender: SendHalf;
    /// Receiving half after [`split`](Self::split)
    type Receiver: RecvHalf;

    /// Separate the two directions.
    fn split(self) -> (Self::Sender, Self::Receiver);
}

impl SendHalf for mpsc::Sender<Bytes> {
    fn send(&mut self, message: Bytes) -> impl Future<Output = Result<(), TransportError>> + Send {
        async move { mpsc::Sender::send(self, message).await.map_err(|_| TransportError::Closed) }
    }
}

impl RecvHalf for mpsc::Receiver<Bytes> {
    fn recv(&mut self) -> impl Future<Output = Result<Option<Bytes>, TransportError>> + Send {
        async move { Ok(mpsc::Receiver::recv(self).await) }
    }
}

/// In-process transport over a pair of bounded channels.
#[derive(Debug)]
pub struct MemoryTransport {
    outbound: mpsc::Sender<Bytes>,
    inbound: mpsc::Receiver<Bytes>,
}

impl MemoryTransport {
    /// Two connected ends. Each direction buffers up to `capacity` messages
    /// before `send` waits.
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::channel(capacity);
        let (b_tx, b_rx) = mpsc::channel(capacity);
        (Self { outbound: a_tx, inbound: b_rx }, Self { outbound: b_tx, inbound: a_rx })
    }

    /// Take a message that has already arrived, without waiting.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.inbound.try_recv().ok()
    }
}

impl SendHalf for MemoryTransport {
    fn send(&mut self, message: Bytes) -> impl Future<Output = Result<(), TransportError>> + Send {
        SendHalf::send(&mut self.outbound, message)
    }
}

impl RecvHalf for MemoryTransport {
    fn recv(&mut self) -> impl Future<Output = Result<Option<Bytes>, TransportError>> + Send {
        RecvHalf::recv(&mut self.inbound)
    }
}

impl Transport for MemoryTransport {
    type Sender = mpsc::Sender<Bytes>;
    type Receiver = mpsc::Receiver<Bytes>;

    fn split(self) -> (Self::Sender, Self::Receiver) {
        (self.outbound, self.inbound)
    }
}

/// Length-prefixed messages over a TCP stream.
///
/// Writes happen inline in `send`. Reads run in a background task that feeds
/// a channel; the task is aborted when the receiving half is dropped.
#[derive(Debug)]
pub struct TcpTransport {
    sender: TcpSender,
    receiver: TcpReceiver,
    peer: SocketAddr,
}

/// Writing half of a [`TcpTransport`]. Dropping it shuts down the write side.
#[derive(Debug)]
pub struct TcpSender {
    writer: OwnedWriteHalf,
}

/// Reading half of a [`TcpTransport`].
#[derive(Debug)]
pub struct TcpReceiver {
    inbound: mpsc::Receiver<Result<Bytes, TransportError>>,
    reader: AbortHandle,
}

impl TcpTransport {
    /// Connect to `addr`.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        Self::new(stream)
    }

    /// Wrap an accepted or connected stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(stream: TcpStream) -> Result<Self, TransportError> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;

        let (read_half, writer) = stream.into_split();
        let (tx, inbound) = mpsc::channel(INBOUND_CAPACITY);
        let reader = tokio::spawn(read_messages(read_half, tx)).abort_handle();

        Ok(Self { sender: TcpSender { writer }, receiver: TcpReceiver { inbound, reader }, peer })
    }

    /// Address of the remote end.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl SendHalf for TcpSender {
    fn send(&mut self, message: Bytes) -> impl Future<Output = Result<(), TransportError>> + Send {
        async move {
            if message.len() > MAX_MESSAGE_LEN {
                return Err(TransportError::MessageTooLarge {
                    len: message.len(),
                    max: MAX_MESSAGE_LEN,
                });
            }

            let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_LEN + message.len());
            buf.put_u32(message.len() as u32);
            buf.put_slice(&message);

            self.writer.write_all(&buf).await?;
            self.writer.flush().await?;
            Ok(())
        }
    }
}

impl RecvHalf for TcpReceiver {
    fn recv(&mut self) -> impl Future<Output = Result<Option<Bytes>, TransportError>> + Send {
        async move { self.inbound.recv().await.transpose() }
    }
}

impl Drop for TcpReceiver {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl SendHalf for TcpTransport {
    fn send(&mut self, message: Bytes) -> impl Future<Output = Result<(), TransportError>> + Send {
        self.sender.send(message)
    }
}

impl RecvHalf for TcpTransport {
    fn recv(&mut self) -> impl Future<Output = Result<Option<Bytes>, TransportError>> + Send {
        self.receiver.recv()
    }
}

impl Transport for TcpTransport {
    type Sender = TcpSender;
    type Receiver = TcpReceiver;

    fn split(self) -> (Self::Sender, Self::Receiver) {
        (self.sender, self.receiver)
    }
}

/// Reader task: decode messages until EOF or the first error.
async fn read_messages(
    mut reader: OwnedReadHalf,
    tx: mpsc::Sender<Result<Bytes, TransportError>>,
) {
    loop {
        match read_message(&mut reader).await {
            Ok(Some(message)) => {
                if tx.send(Ok(message)).await.is_err() {
                    break;
                }
            },
            Ok(None) => break,
            Err(err) => {
                tracing::debug!(error = %err, "tcp read failed");
                let _ = tx.send(Err(err)).await;
                break;
            },
        }
    }
}

/// Read one message. `Ok(None)` on EOF at a message boundary.
async fn read_message(reader: &mut OwnedReadHalf) -> Result<Option<Bytes>, TransportError> {
    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
    let mut filled = 0;
    while filled < LENGTH_PREFIX_LEN {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(TransportError::Truncated {
                expected: LENGTH_PREFIX_LEN,
                received: filled,
            });
        }
        filled += n;
    }

    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_MESSAGE_LEN {
        return Err(TransportError::MessageTooLarge { len, max: MAX_MESSAGE_LEN });
    }

    let mut body = BytesMut::zeroed(len);
    let mut received = 0;
    while received < len {
        let n = reader.read(&mut body[received..]).await?;
        if n == 0 {
            return Err(TransportError::Truncated { expected: len, received });
        }
        received += n;
    }

    Ok(Some(body.freeze()))
}
