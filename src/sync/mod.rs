// Sync engine
// Bridges the outbound queue and the message store to an abstract transport.
// Runs as its own task: transmits due entries on a timer tick, applies
// incoming remote messages through the store's idempotent merge, and suspends
// cleanly across disconnects.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::watch;

use crate::models::DeliveryStatus;
use crate::outbound::OutboundQueue;
use crate::store::MessageStore;

pub mod transport;

pub use transport::{Ack, Transport, TransportError};

/// How often the engine scans for due outbound entries. Retry timing itself
/// lives in the queue's schedule; this is only the scan granularity.
const TICK_INTERVAL: Duration = Duration::from_millis(100);

pub struct SyncEngine<T: Transport> {
    store: Arc<MessageStore>,
    queue: Arc<OutboundQueue>,
    transport: T,
    /// Set after a Disconnected error; cleared once the transport reports
    /// healthy or traffic arrives.
    suspended: bool,
    /// False once the receive stream has ended (it is non-restartable).
    receiving: bool,
}

impl<T: Transport> SyncEngine<T> {
    pub fn new(store: Arc<MessageStore>, queue: Arc<OutboundQueue>, transport: T) -> Self {
        Self {
            store,
            queue,
            transport,
            suspended: false,
            receiving: true,
        }
    }

    /// Drive the engine until the shutdown signal fires or both directions
    /// are exhausted. Cancelling mid-retry is safe: every message is left at
    /// whatever state it last reached.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!("Sync engine started");
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            if self.receiving {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    incoming = self.transport.recv() => match incoming {
                        Some(message) => self.apply_remote(message).await,
                        None => {
                            warn!("Transport receive stream ended");
                            self.receiving = false;
                            self.suspended = true;
                        }
                    },
                    _ = tick.tick() => self.on_tick().await,
                }
            } else {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tick.tick() => self.on_tick().await,
                }
            }
        }
        info!("Sync engine stopped");
    }

    async fn on_tick(&mut self) {
        if self.suspended {
            if self.transport.is_connected() {
                info!("Transport reconnected, resuming transmission");
                self.suspended = false;
            } else {
                return;
            }
        }
        self.transmit_due().await;
    }

    /// Merge one remote message into the timeline. Duplicates and
    /// out-of-order arrivals are handled by the merge itself; traffic also
    /// proves the connection is alive.
    async fn apply_remote(&mut self, message: crate::models::Message) {
        if self.suspended {
            info!("Transport traffic resumed after disconnect");
            self.suspended = false;
        }
        debug!("Received remote message {}", message.id);
        if let Err(e) = self.store.merge(message).await {
            warn!("Dropping unmergeable remote message: {}", e);
        }
    }

    /// Transmit every due outbound entry once. The store's acknowledgment
    /// state is checked first so a message acked through another path is
    /// never retransmitted.
    async fn transmit_due(&mut self) {
        let now = chrono::Utc::now().timestamp_millis();
        for id in self.queue.due_entries(now).await {
            let Some(message) = self.store.get(&id).await else {
                // Queue references a message the store does not know. The
                // queue never holds content, so there is nothing to send.
                error!("Outbound entry {} has no timeline message, dropping", id);
                self.queue.remove(&id).await;
                continue;
            };

            if message.delivery_status == DeliveryStatus::Acknowledged {
                debug!("Message {} already acknowledged, skipping transmit", id);
                self.queue.remove(&id).await;
                continue;
            }

            self.queue.mark_in_flight(&id).await;
            if let Err(e) = self.store.update_status(&id, DeliveryStatus::Sent).await {
                warn!("Could not mark {} as sent: {}", id, e);
            }

            // The store lock is not held across this await; the transport may
            // block for as long as it likes.
            match self.transport.send(&message).await {
                Ok(ack) => {
                    if ack.message_id != id {
                        warn!(
                            "Transport acked {} while sending {}, applying as-is",
                            ack.message_id, id
                        );
                        // The transmitted message got no answer of its own:
                        // put it back in the due rotation (no attempt
                        // charged) so it is not stranded in flight.
                        self.queue.release_in_flight(&id).await;
                    }
                    self.queue.on_ack(&ack.message_id).await;
                }
                Err(TransportError::Disconnected) => {
                    info!("Transport disconnected, suspending transmission");
                    // Not a per-message failure: no attempt is charged and
                    // the entry stays queued for the reconnect.
                    self.queue.release_in_flight(&id).await;
                    if let Err(e) = self.store.update_status(&id, DeliveryStatus::Pending).await {
                        warn!("Could not return {} to pending: {}", id, e);
                    }
                    self.suspended = true;
                    break;
                }
                Err(e) => {
                    warn!("Transport failed to deliver {}: {}", id, e);
                    self.queue
                        .on_transport_failure(&id, chrono::Utc::now().timestamp_millis())
                        .await;
                }
            }
        }
    }
}
