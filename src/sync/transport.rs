// Abstract delivery transport
// The core never talks to a network directly; the embedding environment
// provides an implementation of this trait (a websocket, a chat protocol
// stream, a test double).

use async_trait::async_trait;
use thiserror::Error;

use crate::models::Message;

/// Confirmation that the remote side accepted a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub message_id: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The send did not complete in time; the outcome is unknown and the
    /// message will be retried.
    #[error("transport timed out")]
    Timeout,

    /// The connection is down. Transmission is suspended, not failed; no
    /// retry attempt is charged.
    #[error("transport disconnected")]
    Disconnected,

    /// The remote side rejected the message outright.
    #[error("transport rejected message: {0}")]
    Rejected(String),
}

/// Bidirectional message transport.
///
/// `recv` is a lazy, infinite stream of remote messages; `None` means the
/// stream has ended for good. Implementations must tolerate the `recv` future
/// being dropped and re-created (the engine races it against its retry tick).
#[async_trait]
pub trait Transport: Send {
    async fn send(&self, message: &Message) -> Result<Ack, TransportError>;

    async fn recv(&mut self) -> Option<Message>;

    /// Whether the underlying connection is currently usable. The engine
    /// polls this to resume transmission after a disconnect.
    fn is_connected(&self) -> bool {
        true
    }
}
