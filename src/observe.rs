// Observation layer
// Publishes timeline snapshots to subscribers (the UI). Each subscriber gets
// its own watch channel, so a burst of store changes coalesces to the final
// snapshot; intermediate states may be skipped but the last one always lands.

use std::collections::HashMap;

use log::debug;
use tokio::sync::watch;

use crate::models::Message;

/// Handle identifying one subscription. Pass it back to `unsubscribe`.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct SubscriptionToken(u64);

/// Receiving end of a subscription.
pub struct TimelineWatcher {
    rx: watch::Receiver<Vec<Message>>,
}

impl TimelineWatcher {
    /// The most recently published timeline snapshot.
    pub fn latest(&self) -> Vec<Message> {
        self.rx.borrow().clone()
    }

    /// Wait until a snapshot newer than the last observed one is available.
    /// Returns false once the subscription has been cancelled.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

/// Registry of active subscribers, owned by the message store.
pub(crate) struct ObserverRegistry {
    next_token: u64,
    subscribers: HashMap<u64, watch::Sender<Vec<Message>>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self {
            next_token: 0,
            subscribers: HashMap::new(),
        }
    }

    /// Register a subscriber, seeding it with the current snapshot.
    pub fn subscribe(&mut self, initial: Vec<Message>) -> (SubscriptionToken, TimelineWatcher) {
        let token = self.next_token;
        self.next_token += 1;

        let (tx, rx) = watch::channel(initial);
        self.subscribers.insert(token, tx);
        debug!("Timeline subscriber {} registered", token);

        (SubscriptionToken(token), TimelineWatcher { rx })
    }

    pub fn unsubscribe(&mut self, token: SubscriptionToken) {
        if self.subscribers.remove(&token.0).is_some() {
            debug!("Timeline subscriber {} removed", token.0);
        }
    }

    /// Push a new snapshot to every live subscriber, dropping ones whose
    /// watcher has gone away.
    pub fn publish(&mut self, snapshot: &[Message]) {
        self.subscribers.retain(|token, tx| {
            if tx.is_closed() {
                debug!("Timeline subscriber {} disappeared, pruning", token);
                return false;
            }
            tx.send_replace(snapshot.to_vec());
            true
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
