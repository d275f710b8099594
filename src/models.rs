use serde::{Deserialize, Serialize};

/// A single chat message as it appears on the timeline.
///
/// Everything except `delivery_status` is immutable once the message has been
/// created. The status field is owned by the outbound queue and the sync
/// engine; UI code only ever reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub content: String,
    /// Logical timestamp in milliseconds, monotonic per sender.
    pub created_at: i64,
    pub delivery_status: DeliveryStatus,
}

impl Message {
    /// Ordering key for the timeline: (created_at, id). The id tie-break makes
    /// ordering deterministic when two senders stamp the same instant.
    pub fn timeline_key(&self) -> (i64, String) {
        (self.created_at, self.id.clone())
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Pending,      // Queued locally, not yet on the wire
    Sent,         // Handed to the transport, awaiting acknowledgment
    Acknowledged, // Confirmed accepted by the remote side
    Failed,       // Gave up after exhausting retries
}

impl DeliveryStatus {
    /// Dominance used by merge reconciliation: Acknowledged beats Sent beats
    /// Pending/Failed. Pending and Failed share the bottom rank, so a merge
    /// can never flap one into the other.
    pub fn rank(self) -> u8 {
        match self {
            DeliveryStatus::Pending | DeliveryStatus::Failed => 0,
            DeliveryStatus::Sent => 1,
            DeliveryStatus::Acknowledged => 2,
        }
    }

    /// Forward-only transition graph. Sent may fall back to Pending when a
    /// transmission attempt times out and gets rescheduled; Acknowledged is
    /// terminal.
    pub fn can_transition_to(self, next: DeliveryStatus) -> bool {
        use DeliveryStatus::*;
        matches!(
            (self, next),
            (Pending, Sent)
                | (Pending, Failed)
                | (Sent, Acknowledged)
                | (Sent, Pending)
                | (Sent, Failed)
                | (Failed, Pending)
        )
    }
}

/// What the UI hands over on a send intent: just the text. Id, timestamp and
/// sender are assigned by the store at append time.
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub content: String,
}

impl MessageDraft {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// Result of merging a remote message into the timeline, used to suppress
/// subscriber notifications when nothing observable changed.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum MergeOutcome {
    /// The message was new and has been inserted in timestamp order.
    Inserted,
    /// The message was known and its delivery status advanced.
    Updated,
    /// The message was known and the incoming copy carried nothing newer.
    Unchanged,
}

impl MergeOutcome {
    pub fn changed(self) -> bool {
        !matches!(self, MergeOutcome::Unchanged)
    }
}
