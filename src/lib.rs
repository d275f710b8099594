// chatline: local message store and synchronization core for chat clients.
// The UI layer is a consumer of this crate: it sends message intents in and
// renders the timeline snapshots that come back out.

pub mod client;
pub mod error;
pub mod identity;
pub mod models;
pub mod observe;
pub mod outbound;
pub mod storage;
pub mod store;
pub mod sync;

// Re-export the main types for convenience
pub use client::ChatClient;
pub use error::{PersistError, QueueError, StoreError};
pub use identity::Identity;
pub use models::{DeliveryStatus, MergeOutcome, Message, MessageDraft};
pub use observe::{SubscriptionToken, TimelineWatcher};
pub use outbound::{OutboundQueue, RetryPolicy};
pub use store::MessageStore;
pub use sync::{Ack, SyncEngine, Transport, TransportError};
