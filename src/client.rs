// Client facade
// The surface a presentation layer talks to: send intents in, coalesced
// timeline snapshots out. Wires up the store, outbound queue and sync engine
// and owns the engine task.

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use log::{info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::PersistError;
use crate::identity::Identity;
use crate::models::{DeliveryStatus, Message, MessageDraft};
use crate::observe::{SubscriptionToken, TimelineWatcher};
use crate::outbound::{OutboundQueue, RetryPolicy};
use crate::storage;
use crate::store::MessageStore;
use crate::sync::{SyncEngine, Transport};

pub struct ChatClient {
    store: Arc<MessageStore>,
    queue: Arc<OutboundQueue>,
    engine: Option<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl ChatClient {
    /// Build the core and spawn the sync engine over the given transport.
    pub fn spawn<T: Transport + 'static>(
        identity: Identity,
        transport: T,
        policy: RetryPolicy,
    ) -> Self {
        let store = Arc::new(MessageStore::new(Arc::new(identity)));
        let queue = Arc::new(OutboundQueue::new(store.clone(), policy));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let engine = SyncEngine::new(store.clone(), queue.clone(), transport);
        let handle = tokio::spawn(engine.run(shutdown_rx));

        info!("Chat client started");
        Self {
            store,
            queue,
            engine: Some(handle),
            shutdown_tx,
        }
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<OutboundQueue> {
        &self.queue
    }

    /// UI send intent: append the text to the timeline and queue it for
    /// delivery. Returns the created message (state Pending).
    pub async fn send_message(&self, text: &str) -> Result<Message> {
        let message = self.store.append(MessageDraft::new(text)).await?;
        self.queue.enqueue(&message).await?;
        Ok(message)
    }

    /// Manual resend of a permanently failed message. The original stays on
    /// the timeline as Failed; a fresh message with the same content (new id,
    /// new timestamp) is appended and queued.
    pub async fn resend(&self, failed_id: &str) -> Result<Message> {
        let original = self
            .store
            .get(failed_id)
            .await
            .ok_or_else(|| anyhow!("no message with id {}", failed_id))?;
        if original.delivery_status != DeliveryStatus::Failed {
            return Err(anyhow!(
                "message {} is {:?}, only failed messages can be resent",
                failed_id,
                original.delivery_status
            ));
        }

        let replacement = self
            .store
            .append(MessageDraft::new(original.content))
            .await?;
        self.queue.enqueue(&replacement).await?;
        info!(
            "Resending failed message {} as {}",
            failed_id, replacement.id
        );
        Ok(replacement)
    }

    pub async fn subscribe(&self) -> (SubscriptionToken, TimelineWatcher) {
        self.store.subscribe().await
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) {
        self.store.unsubscribe(token);
    }

    pub async fn snapshot(&self) -> Vec<Message> {
        self.store.snapshot().await
    }

    /// Persist the timeline and outbound bookkeeping.
    pub async fn save_state(&self, path: &Path) -> Result<(), PersistError> {
        let state = storage::capture(&self.store, &self.queue).await;
        storage::save_to(&state, path)
    }

    /// Load persisted state, restoring delivery statuses and re-admitting
    /// unacknowledged sends into the retry rotation.
    pub async fn restore_state(&self, path: &Path) -> Result<usize, PersistError> {
        let state = storage::load_from(path)?;
        Ok(storage::restore(state, &self.store, &self.queue).await)
    }

    /// Stop the sync engine. Pending retries are cancelled, not completed;
    /// every message stays at whatever state it last reached.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.engine.take() {
            if let Err(e) = handle.await {
                warn!("Sync engine task ended abnormally: {}", e);
            }
        }
        info!("Chat client stopped");
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        // Shutdown without join, for callers that drop instead of awaiting.
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.engine.take() {
            handle.abort();
        }
    }
}
