// Outbound queue
// Tracks messages awaiting acknowledgment and owns the retry schedule.
// Entries reference timeline messages by id only; the store keeps the single
// copy of the content.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::Mutex as TokioMutex;

use crate::error::QueueError;
use crate::models::{DeliveryStatus, Message};
use crate::store::MessageStore;

/// Retry behavior knobs. Defaults: 5 attempts, 500ms base doubling per
/// attempt, capped at 30s, with random jitter on top.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff with jitter to avoid thundering-herd retries.
    /// `attempt` counts failures so far, starting at 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let exp = attempt.saturating_sub(1).min(16);
        let raw = base_ms.saturating_mul(1u64 << exp);
        let capped = raw.min(self.max_delay.as_millis() as u64);
        let jitter = rand::random::<u64>() % base_ms.max(1);
        Duration::from_millis(capped.saturating_add(jitter).min(self.max_delay.as_millis() as u64))
    }
}

/// Retry bookkeeping for one unacknowledged message.
#[derive(Debug, Clone)]
pub struct OutboundEntry {
    pub message_id: String,
    /// Transmission failures so far.
    pub attempt: u32,
    /// Millisecond timestamp after which the entry is due for (re)transmit.
    pub next_retry_at: i64,
    /// True while a transmission is on the wire; due scans skip these.
    pub in_flight: bool,
}

pub struct OutboundQueue {
    store: Arc<MessageStore>,
    policy: RetryPolicy,
    entries: TokioMutex<HashMap<String, OutboundEntry>>,
}

impl OutboundQueue {
    pub fn new(store: Arc<MessageStore>, policy: RetryPolicy) -> Self {
        Self {
            store,
            policy,
            entries: TokioMutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Track a Pending message until it is acknowledged or permanently fails.
    /// Due immediately.
    pub async fn enqueue(&self, message: &Message) -> Result<(), QueueError> {
        if message.delivery_status != DeliveryStatus::Pending {
            return Err(QueueError::NotPending(message.id.clone()));
        }

        let mut entries = self.entries.lock().await;
        if entries.contains_key(&message.id) {
            return Err(QueueError::AlreadyQueued(message.id.clone()));
        }
        entries.insert(
            message.id.clone(),
            OutboundEntry {
                message_id: message.id.clone(),
                attempt: 0,
                next_retry_at: chrono::Utc::now().timestamp_millis(),
                in_flight: false,
            },
        );
        debug!("Enqueued message {} for delivery", message.id);
        Ok(())
    }

    /// Re-admit a persisted entry on reload, keeping its attempt count. The
    /// entry is due immediately.
    pub async fn readmit(&self, message_id: &str, attempt: u32) {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(message_id) {
            warn!("Message {} already queued, skipping re-admission", message_id);
            return;
        }
        entries.insert(
            message_id.to_string(),
            OutboundEntry {
                message_id: message_id.to_string(),
                attempt,
                next_retry_at: chrono::Utc::now().timestamp_millis(),
                in_flight: false,
            },
        );
        debug!(
            "Re-admitted message {} with {} prior attempts",
            message_id, attempt
        );
    }

    /// Ids of entries due for (re)transmission at `now`, oldest first.
    pub async fn due_entries(&self, now: i64) -> Vec<String> {
        let entries = self.entries.lock().await;
        let mut due: Vec<&OutboundEntry> = entries
            .values()
            .filter(|e| !e.in_flight && e.next_retry_at <= now)
            .collect();
        due.sort_by_key(|e| e.next_retry_at);
        due.iter().map(|e| e.message_id.clone()).collect()
    }

    /// Mark an entry as on the wire so due scans skip it until the attempt
    /// resolves.
    pub async fn mark_in_flight(&self, message_id: &str) {
        if let Some(entry) = self.entries.lock().await.get_mut(message_id) {
            entry.in_flight = true;
        }
    }

    /// Undo `mark_in_flight` without charging an attempt. Used when the
    /// transport reports a disconnect rather than a per-message failure.
    pub async fn release_in_flight(&self, message_id: &str) {
        if let Some(entry) = self.entries.lock().await.get_mut(message_id) {
            entry.in_flight = false;
        }
    }

    /// Acknowledgment arrived: drop the entry and settle the store state.
    /// Idempotent; a duplicate or stray ack is a no-op.
    pub async fn on_ack(&self, message_id: &str) {
        let removed = self.entries.lock().await.remove(message_id);
        if removed.is_none() {
            debug!("Ignoring ack for untracked message {}", message_id);
            return;
        }

        info!("Message {} acknowledged", message_id);
        if let Err(e) = self
            .store
            .update_status(message_id, DeliveryStatus::Acknowledged)
            .await
        {
            warn!("Could not settle acknowledged message {}: {}", message_id, e);
        }
    }

    /// A transmission attempt failed. Below the attempt limit the entry is
    /// rescheduled with backoff and the message returns to Pending; at the
    /// limit the entry is destroyed and the message is marked Failed (it
    /// stays visible on the timeline).
    pub async fn on_transport_failure(&self, message_id: &str, now: i64) {
        let exhausted = {
            let mut entries = self.entries.lock().await;
            let Some(entry) = entries.get_mut(message_id) else {
                debug!("Ignoring failure for untracked message {}", message_id);
                return;
            };

            entry.attempt += 1;
            entry.in_flight = false;
            if entry.attempt >= self.policy.max_attempts {
                entries.remove(message_id);
                true
            } else {
                let delay = self.policy.backoff(entry.attempt);
                entry.next_retry_at = now + delay.as_millis() as i64;
                info!(
                    "Message {} failed attempt {}, retrying in {:?}",
                    message_id, entry.attempt, delay
                );
                false
            }
        };

        let target = if exhausted {
            warn!(
                "Message {} failed permanently after {} attempts",
                message_id, self.policy.max_attempts
            );
            DeliveryStatus::Failed
        } else {
            DeliveryStatus::Pending
        };

        match self.store.update_status(message_id, target).await {
            Ok(_) => {}
            Err(e) => warn!("Could not update failed message {}: {}", message_id, e),
        }
    }

    /// Drop an entry without touching the store. Used when the engine finds
    /// the message already acknowledged (e.g. learned through a merge).
    pub async fn remove(&self, message_id: &str) {
        if self.entries.lock().await.remove(message_id).is_some() {
            debug!("Dropped outbound entry for {}", message_id);
        }
    }

    pub async fn contains(&self, message_id: &str) -> bool {
        self.entries.lock().await.contains_key(message_id)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Current entries, for persistence.
    pub async fn entries_snapshot(&self) -> Vec<OutboundEntry> {
        self.entries.lock().await.values().cloned().collect()
    }
}
