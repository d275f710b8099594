// Persisted state
// Serializes the timeline and outbound bookkeeping to a single JSON document
// so a client can stop and resume without losing unacknowledged sends.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::PersistError;
use crate::models::{DeliveryStatus, Message};
use crate::outbound::OutboundQueue;
use crate::store::MessageStore;

/// Retry bookkeeping worth keeping across restarts. The schedule itself is
/// not saved; re-admitted entries are due immediately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedOutbound {
    pub message_id: String,
    pub attempt: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedState {
    pub messages: Vec<Message>,
    pub outbound: Vec<SavedOutbound>,
}

/// Default location: `<data dir>/chatline/state.json`.
pub fn default_state_path() -> Result<PathBuf, PersistError> {
    let base = dirs::data_dir().ok_or(PersistError::NoDataDir)?;
    Ok(base.join("chatline").join("state.json"))
}

/// Capture the current timeline and outbound entries.
pub async fn capture(store: &MessageStore, queue: &OutboundQueue) -> SavedState {
    let messages = store.snapshot().await;
    let outbound = queue
        .entries_snapshot()
        .await
        .into_iter()
        .map(|e| SavedOutbound {
            message_id: e.message_id,
            attempt: e.attempt,
        })
        .collect();
    SavedState { messages, outbound }
}

pub fn save_to(state: &SavedState, path: &Path) -> Result<(), PersistError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(state)?;
    fs::write(path, json)?;
    info!(
        "Saved {} messages and {} outbound entries to {}",
        state.messages.len(),
        state.outbound.len(),
        path.display()
    );
    Ok(())
}

pub fn load_from(path: &Path) -> Result<SavedState, PersistError> {
    let json = fs::read_to_string(path)?;
    let state: SavedState = serde_json::from_str(&json)?;
    Ok(state)
}

/// Rebuild store and queue contents from a saved state.
///
/// Every message that was Sent when the snapshot was taken reloads as
/// Pending: its ack was never observed, so it goes back into the retry
/// rotation. That includes Sent messages with no saved outbound entry (the
/// snapshot can catch a send mid-flight, between the store and queue reads);
/// those are re-admitted at attempt 0. Re-admission preserves recorded
/// attempt counts and never creates a duplicate id.
pub async fn restore(
    state: SavedState,
    store: &Arc<MessageStore>,
    queue: &Arc<OutboundQueue>,
) -> usize {
    let tracked: std::collections::HashSet<&str> = state
        .outbound
        .iter()
        .map(|o| o.message_id.as_str())
        .collect();

    let mut messages = state.messages;
    let mut untracked_sent = Vec::new();
    for message in &mut messages {
        if message.delivery_status == DeliveryStatus::Sent {
            message.delivery_status = DeliveryStatus::Pending;
            if !tracked.contains(message.id.as_str()) {
                warn!(
                    "Message {} was saved mid-flight with no outbound entry, re-admitting",
                    message.id
                );
                untracked_sent.push(message.id.clone());
            }
        }
    }
    store.restore(messages).await;

    let mut readmitted = 0;
    for id in untracked_sent {
        queue.readmit(&id, 0).await;
        readmitted += 1;
    }
    for saved in state.outbound {
        match store.get(&saved.message_id).await {
            Some(message) if message.delivery_status == DeliveryStatus::Pending => {
                queue.readmit(&saved.message_id, saved.attempt).await;
                readmitted += 1;
            }
            Some(message) => {
                warn!(
                    "Not re-admitting {} in state {:?}",
                    saved.message_id, message.delivery_status
                );
            }
            None => {
                warn!(
                    "Saved outbound entry {} has no message, dropping",
                    saved.message_id
                );
            }
        }
    }
    info!("Re-admitted {} outbound entries from saved state", readmitted);
    readmitted
}
