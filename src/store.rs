// Message store
// Append-only, deduplicated, ordered timeline. All mutation goes through one
// tokio mutex so order and dedup invariants are never observed torn; the sync
// engine and the UI only ever interact through these methods.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use log::{debug, info, warn};
use tokio::sync::Mutex as TokioMutex;

use crate::error::StoreError;
use crate::identity::Identity;
use crate::models::{DeliveryStatus, MergeOutcome, Message, MessageDraft};
use crate::observe::{ObserverRegistry, SubscriptionToken, TimelineWatcher};

/// Timeline state: ordered map keyed by (created_at, id) plus an id index.
/// Entries are never removed, only their delivery status moves forward.
struct Timeline {
    by_key: BTreeMap<(i64, String), Message>,
    index: HashMap<String, (i64, String)>,
}

impl Timeline {
    fn new() -> Self {
        Self {
            by_key: BTreeMap::new(),
            index: HashMap::new(),
        }
    }

    fn insert(&mut self, message: Message) {
        let key = message.timeline_key();
        self.index.insert(message.id.clone(), key.clone());
        self.by_key.insert(key, message);
    }

    fn get(&self, id: &str) -> Option<&Message> {
        self.index.get(id).and_then(|key| self.by_key.get(key))
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Message> {
        let key = self.index.get(id)?.clone();
        self.by_key.get_mut(&key)
    }

    fn snapshot(&self) -> Vec<Message> {
        self.by_key.values().cloned().collect()
    }
}

pub struct MessageStore {
    identity: Arc<Identity>,
    timeline: TokioMutex<Timeline>,
    // Publishing is synchronous (watch::send_replace never blocks), so the
    // registry sits behind a plain mutex. It is only ever locked while the
    // timeline lock is held, which keeps published snapshots in mutation
    // order.
    observers: StdMutex<ObserverRegistry>,
}

impl MessageStore {
    pub fn new(identity: Arc<Identity>) -> Self {
        Self {
            identity,
            timeline: TokioMutex::new(Timeline::new()),
            observers: StdMutex::new(ObserverRegistry::new()),
        }
    }

    pub fn identity(&self) -> &Arc<Identity> {
        &self.identity
    }

    /// Append a locally composed message. Id and timestamp are assigned
    /// before the lock is taken, so concurrent appends are totally ordered by
    /// call time rather than by lock acquisition.
    pub async fn append(&self, draft: MessageDraft) -> Result<Message, StoreError> {
        let content = draft.content.trim();
        if content.is_empty() {
            return Err(StoreError::InvalidContent);
        }

        let message = Message {
            id: self.identity.next_message_id(),
            sender_id: self.identity.participant_id().to_string(),
            content: content.to_string(),
            created_at: self.identity.timestamp(),
            delivery_status: DeliveryStatus::Pending,
        };

        {
            let mut timeline = self.timeline.lock().await;
            // A collision here means the identity provider handed out a
            // duplicate UUID. Nothing downstream can recover from that.
            assert!(
                timeline.get(&message.id).is_none(),
                "identity provider issued duplicate message id {}",
                message.id
            );
            timeline.insert(message.clone());
            self.notify(&timeline.snapshot());
        }

        debug!(
            "Appended message {} from {} at {}",
            message.id, message.sender_id, message.created_at
        );
        Ok(message)
    }

    /// Merge a remote message into the timeline. Idempotent: a known id only
    /// advances its delivery status when the incoming copy dominates, and an
    /// unknown id is inserted in timestamp order regardless of arrival order.
    pub async fn merge(&self, remote: Message) -> Result<MergeOutcome, StoreError> {
        if remote.content.trim().is_empty() {
            return Err(StoreError::InvalidContent);
        }

        let mut timeline = self.timeline.lock().await;
        let outcome = match timeline.get_mut(&remote.id) {
            Some(existing) => {
                if remote.delivery_status.rank() > existing.delivery_status.rank() {
                    debug!(
                        "Merge advanced message {} from {:?} to {:?}",
                        remote.id, existing.delivery_status, remote.delivery_status
                    );
                    existing.delivery_status = remote.delivery_status;
                    self.notify(&timeline.snapshot());
                    MergeOutcome::Updated
                } else {
                    MergeOutcome::Unchanged
                }
            }
            None => {
                debug!(
                    "Merge inserted remote message {} from {}",
                    remote.id, remote.sender_id
                );
                timeline.insert(remote);
                self.notify(&timeline.snapshot());
                MergeOutcome::Inserted
            }
        };
        Ok(outcome)
    }

    /// Move a message's delivery status forward. Returns Ok(true) when the
    /// status changed, Ok(false) for a same-state no-op.
    pub async fn update_status(
        &self,
        id: &str,
        next: DeliveryStatus,
    ) -> Result<bool, StoreError> {
        let mut timeline = self.timeline.lock().await;
        let message = timeline
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownMessage(id.to_string()))?;

        if message.delivery_status == next {
            return Ok(false);
        }
        if !message.delivery_status.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from: message.delivery_status,
                to: next,
            });
        }

        info!(
            "Message {} status {:?} -> {:?}",
            id, message.delivery_status, next
        );
        message.delivery_status = next;
        self.notify(&timeline.snapshot());
        Ok(true)
    }

    pub async fn get(&self, id: &str) -> Option<Message> {
        self.timeline.lock().await.get(id).cloned()
    }

    /// Consistent point-in-time view of the whole timeline.
    pub async fn snapshot(&self) -> Vec<Message> {
        self.timeline.lock().await.snapshot()
    }

    pub async fn len(&self) -> usize {
        self.timeline.lock().await.by_key.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Re-insert persisted messages on reload, keeping their recorded
    /// delivery status. Duplicate ids are skipped rather than overwritten.
    pub async fn restore(&self, messages: Vec<Message>) {
        let mut timeline = self.timeline.lock().await;
        for message in messages {
            if timeline.get(&message.id).is_some() {
                warn!("Skipping duplicate message {} during restore", message.id);
                continue;
            }
            timeline.insert(message);
        }
        self.notify(&timeline.snapshot());
    }

    /// Register a timeline subscriber, seeded with the current snapshot.
    /// Seeding happens under the timeline lock so the subscriber can neither
    /// miss nor double-observe a mutation racing with registration.
    pub async fn subscribe(&self) -> (SubscriptionToken, TimelineWatcher) {
        let timeline = self.timeline.lock().await;
        self.observers
            .lock()
            .expect("observer registry poisoned")
            .subscribe(timeline.snapshot())
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) {
        self.observers
            .lock()
            .expect("observer registry poisoned")
            .unsubscribe(token);
    }

    pub fn subscriber_count(&self) -> usize {
        self.observers
            .lock()
            .expect("observer registry poisoned")
            .subscriber_count()
    }

    /// Publish a snapshot to all subscribers. Must be called with the
    /// timeline lock held: two mutations otherwise race between snapshot and
    /// publish, and the older snapshot can land last.
    fn notify(&self, snapshot: &[Message]) {
        self.observers
            .lock()
            .expect("observer registry poisoned")
            .publish(snapshot);
    }
}
