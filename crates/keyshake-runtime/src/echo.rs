//! Echo service over a session, used by the `listen` and `connect` commands.

use bytes::Bytes;
use keyshake_core::{Environment, InitiatorRole, ResponderRole};

use crate::{
    session::{CloseReason, SessionConfig, SessionError, SessionEvent, spawn_session},
    transport::Transport,
};

/// Run one responder session that sends every message straight back.
///
/// Returns once the peer closes or the session fails.
pub async fn serve_echo<T, E>(
    role: ResponderRole,
    transport: T,
    env: E,
    config: SessionConfig,
) -> Result<CloseReason, SessionError>
where
    T: Transport,
    E: Environment,
{
    let (handle, mut events) = spawn_session(role, transport, env, config);

    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Ready => tracing::debug!("echo session ready"),
            SessionEvent::Message(message) => {
                tracing::debug!(len = message.len(), "echoing message");
                if handle.send(message).await.is_err() {
                    break;
                }
            },
            SessionEvent::Closed { .. } | SessionEvent::Failed(_) => break,
        }
    }

    drop(events);
    handle.join().await
}

/// Run one initiator session: send each message, wait for its reply, then
/// close.
///
/// Replies are returned in order, one per message.
pub async fn request_replies<T, E>(
    role: InitiatorRole,
    transport: T,
    env: E,
    config: SessionConfig,
    messages: Vec<Bytes>,
) -> Result<Vec<Bytes>, SessionError>
where
    T: Transport,
    E: Environment,
{
    let (handle, mut events) = spawn_session(role, transport, env, config);

    let exchange = async {
        match events.recv().await {
            Some(SessionEvent::Ready) => {},
            other => return Err(ended(other)),
        }

        let mut replies = Vec::with_capacity(messages.len());
        for message in messages {
            handle.send(message).await?;
            match events.recv().await {
                Some(SessionEvent::Message(reply)) => replies.push(reply),
                other => return Err(ended(other)),
            }
        }
        Ok::<_, SessionError>(replies)
    };
    let result = exchange.await;
    drop(events);

    handle.close().await;
    let joined = handle.join().await;
    let replies = result?;
    joined?;
    Ok(replies)
}

/// Error for a session that ended where a specific event was expected.
fn ended(event: Option<SessionEvent>) -> SessionError {
    match event {
        Some(SessionEvent::Failed(err)) => err,
        _ => SessionError::Closed,
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use keyshake_crypto::bootstrap::MIN_KEY_BITS;
    use rand::{RngCore, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    use super::*;
    use crate::transport::MemoryTransport;

    #[derive(Clone)]
    struct TestEnv {
        rng: Arc<Mutex<ChaCha20Rng>>,
    }

    impl TestEnv {
        fn new(seed: u64) -> Self {
            Self { rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))) }
        }
    }

    impl Environment for TestEnv {
        type Instant = tokio::time::Instant;

        fn now(&self) -> tokio::time::Instant {
            tokio::time::Instant::now()
        }

        fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            tokio::time::sleep(duration)
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            self.rng.lock().unwrap().fill_bytes(buffer);
        }
    }

    #[tokio::test]
    async fn replies_match_requests() {
        let (a, b) = MemoryTransport::pair(4);
        let server = tokio::spawn(serve_echo(
            ResponderRole::with_key_bits(MIN_KEY_BITS),
            a,
            TestEnv::new(1),
            SessionConfig::default(),
        ));

        let messages =
            vec![Bytes::from_static(b"Hello World!"), Bytes::new(), Bytes::from(vec![9u8; 5000])];
        let replies = request_replies(
            InitiatorRole::with_algorithm("AES-256"),
            b,
            TestEnv::new(2),
            SessionConfig::default(),
            messages.clone(),
        )
        .await
        .unwrap();

        assert_eq!(replies, messages);
        assert_eq!(server.await.unwrap(), Ok(CloseReason::PeerClosed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pipelined_requests_all_echo() {
        const COUNT: usize = 500;

        let (a, b) = MemoryTransport::pair(4);
        let server = tokio::spawn(serve_echo(
            ResponderRole::with_key_bits(MIN_KEY_BITS),
            a,
            TestEnv::new(4),
            SessionConfig::default(),
        ));
        let (client, mut events) =
            spawn_session(InitiatorRole::new(), b, TestEnv::new(5), SessionConfig::default());
        assert_eq!(events.recv().await, Some(SessionEvent::Ready));

        // Requests go out far faster than replies come back
        let sender = tokio::spawn(async move {
            for i in 0..COUNT {
                client.send(Bytes::from(i.to_be_bytes().to_vec())).await.unwrap();
            }
            client
        });

        let replies = tokio::time::timeout(Duration::from_secs(60), async {
            let mut replies = Vec::with_capacity(COUNT);
            while replies.len() < COUNT {
                match events.recv().await {
                    Some(SessionEvent::Message(reply)) => replies.push(reply),
                    other => panic!("unexpected event {other:?}"),
                }
            }
            replies
        })
        .await
        .expect("echo pipeline stalled");

        let expected: Vec<_> = (0..COUNT).map(|i| Bytes::from(i.to_be_bytes().to_vec())).collect();
        assert_eq!(replies, expected);

        let client = sender.await.unwrap();
        client.close().await;
        drop(events);
        assert_eq!(client.join().await, Ok(CloseReason::Local));
        assert_eq!(server.await.unwrap(), Ok(CloseReason::PeerClosed));
    }

    #[tokio::test]
    async fn peer_vanishing_before_ready_is_closed() {
        let (a, b) = MemoryTransport::pair(4);
        drop(a);

        let err = request_replies(
            InitiatorRole::new(),
            b,
            TestEnv::new(3),
            SessionConfig::default(),
            vec![Bytes::from_static(b"anyone?")],
        )
        .await
        .unwrap_err();

        assert_eq!(err, SessionError::Closed);
    }
}
