// Common test utilities for integration tests
// This module contains shared code for all integration tests: logging setup,
// a scriptable in-memory transport, and client construction helpers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::LevelFilter;
use std::sync::Once;
use tokio::sync::{mpsc, Mutex as TokioMutex};

use chatline::{
    Ack, ChatClient, DeliveryStatus, Identity, Message, RetryPolicy, Transport, TransportError,
};

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .init();
    });
}

/// What the mock transport should do with the next send attempt.
#[derive(Debug, Clone)]
pub enum SendOutcome {
    Ack,
    /// Acknowledge, but for some other message id.
    StrayAck(String),
    Timeout,
    Reject(String),
    Disconnect,
}

/// In-memory transport double. Sends are scripted through `MockHandle`;
/// unscripted sends are acknowledged.
pub struct MockTransport {
    incoming_rx: mpsc::Receiver<Message>,
    script: Arc<TokioMutex<VecDeque<SendOutcome>>>,
    sent: Arc<TokioMutex<Vec<Message>>>,
    connected: Arc<AtomicBool>,
}

/// Test-side controls for a `MockTransport` already handed to the engine.
#[derive(Clone)]
pub struct MockHandle {
    incoming_tx: mpsc::Sender<Message>,
    script: Arc<TokioMutex<VecDeque<SendOutcome>>>,
    sent: Arc<TokioMutex<Vec<Message>>>,
    connected: Arc<AtomicBool>,
}

pub fn mock_transport() -> (MockTransport, MockHandle) {
    let (incoming_tx, incoming_rx) = mpsc::channel(64);
    let script = Arc::new(TokioMutex::new(VecDeque::new()));
    let sent = Arc::new(TokioMutex::new(Vec::new()));
    let connected = Arc::new(AtomicBool::new(true));

    let transport = MockTransport {
        incoming_rx,
        script: script.clone(),
        sent: sent.clone(),
        connected: connected.clone(),
    };
    let handle = MockHandle {
        incoming_tx,
        script,
        sent,
        connected,
    };
    (transport, handle)
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, message: &Message) -> Result<Ack, TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }

        self.sent.lock().await.push(message.clone());
        let outcome = self
            .script
            .lock()
            .await
            .pop_front()
            .unwrap_or(SendOutcome::Ack);
        match outcome {
            SendOutcome::Ack => Ok(Ack {
                message_id: message.id.clone(),
            }),
            SendOutcome::StrayAck(other_id) => Ok(Ack {
                message_id: other_id,
            }),
            SendOutcome::Timeout => Err(TransportError::Timeout),
            SendOutcome::Reject(reason) => Err(TransportError::Rejected(reason)),
            SendOutcome::Disconnect => {
                self.connected.store(false, Ordering::SeqCst);
                Err(TransportError::Disconnected)
            }
        }
    }

    async fn recv(&mut self) -> Option<Message> {
        self.incoming_rx.recv().await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl MockHandle {
    /// Queue outcomes for upcoming send attempts.
    pub async fn script(&self, outcomes: impl IntoIterator<Item = SendOutcome>) {
        self.script.lock().await.extend(outcomes);
    }

    /// Deliver a remote message to the engine.
    pub async fn deliver(&self, message: Message) {
        self.incoming_tx
            .send(message)
            .await
            .expect("engine receive side closed");
    }

    pub async fn sent_messages(&self) -> Vec<Message> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

/// Retry policy tuned so integration tests finish quickly.
pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
    }
}

/// Spawn a client named `me@test` over a fresh mock transport.
pub fn setup_test_client(max_attempts: u32) -> (ChatClient, MockHandle) {
    setup_logging();
    let (transport, handle) = mock_transport();
    let client = ChatClient::spawn(
        Identity::new("me@test"),
        transport,
        fast_policy(max_attempts),
    );
    (client, handle)
}

/// Build a remote message as it would arrive over the wire.
pub fn remote_message(id: &str, sender: &str, created_at: i64, content: &str) -> Message {
    Message {
        id: id.to_string(),
        sender_id: sender.to_string(),
        content: content.to_string(),
        created_at,
        delivery_status: DeliveryStatus::Acknowledged,
    }
}

/// Poll the store until the message reaches the wanted status or the timeout
/// expires. Panics on timeout with the last observed status.
pub async fn wait_for_status(
    client: &ChatClient,
    id: &str,
    wanted: DeliveryStatus,
    timeout: Duration,
) {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut last = None;
    while tokio::time::Instant::now() < deadline {
        if let Some(message) = client.store().get(id).await {
            if message.delivery_status == wanted {
                return;
            }
            last = Some(message.delivery_status);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "message {} never reached {:?}, last observed: {:?}",
        id, wanted, last
    );
}
