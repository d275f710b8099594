use thiserror::Error;

use crate::models::DeliveryStatus;

/// Errors surfaced by the message store.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Message content was empty after trimming. Rejected locally; the
    /// message never reaches the outbound queue.
    #[error("message content is empty after trimming")]
    InvalidContent,

    /// An operation referenced an id the store has never seen. This is an
    /// integration error in the caller, not a recoverable network condition.
    #[error("no message with id {0}")]
    UnknownMessage(String),

    /// The requested delivery-status change is not reachable in the
    /// forward-only state graph.
    #[error("invalid delivery transition {from:?} -> {to:?} for message {id}")]
    InvalidTransition {
        id: String,
        from: DeliveryStatus,
        to: DeliveryStatus,
    },
}

/// Errors surfaced by the outbound queue.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// Only Pending messages may be enqueued for delivery.
    #[error("message {0} is not pending")]
    NotPending(String),

    /// The message already has an active outbound entry.
    #[error("message {0} is already queued")]
    AlreadyQueued(String),
}

/// Errors from saving or loading persisted state.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt saved state: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("could not determine a data directory for the default state path")]
    NoDataDir,
}
