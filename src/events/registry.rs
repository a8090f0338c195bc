//! Subscriber registry.
//!
//! Each subscriber id maps to at most one live unbounded channel. Sends never
//! block and never fail towards the caller; events for an unknown id are
//! dropped with a warning. Per-id ordering is the order of `send` calls.

use dashmap::DashMap;
use futures::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

use super::RunEvent;

/// Default liveness ping interval
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(20);

struct Subscriber {
    /// Distinguishes a replaced channel from its successor
    generation: u64,
    tx: mpsc::UnboundedSender<RunEvent>,
}

/// Process-wide registry of open subscriber channels
#[derive(Clone)]
pub struct ChannelRegistry {
    subscribers: Arc<DashMap<String, Subscriber>>,
    next_generation: Arc<AtomicU64>,
    opened: Arc<Notify>,
    keep_alive: Duration,
}

impl ChannelRegistry {
    /// Create a new registry
    pub fn new(keep_alive: Duration) -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
            next_generation: Arc::new(AtomicU64::new(0)),
            opened: Arc::new(Notify::new()),
            keep_alive,
        }
    }

    /// Interval for transport-level liveness pings
    pub fn keep_alive_interval(&self) -> Duration {
        self.keep_alive
    }

    /// Open (or replace) the channel for `subscriber_id`.
    ///
    /// The `connected` acknowledgment is queued before the channel becomes
    /// visible, so it is always the first event on the stream.
    pub fn open(&self, subscriber_id: &str) -> SubscriberStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        // The receiver is alive, this cannot fail
        let _ = tx.send(RunEvent::connected());

        let previous = self
            .subscribers
            .insert(subscriber_id.to_string(), Subscriber { generation, tx });
        if previous.is_some() {
            tracing::info!(subscriber_id, "Replacing existing channel for client");
        }
        tracing::info!(subscriber_id, "Client connected");

        self.opened.notify_waiters();

        SubscriberStream {
            subscriber_id: subscriber_id.to_string(),
            generation,
            rx,
            registry: self.clone(),
        }
    }

    /// Deliver one event to the live channel for `subscriber_id`, if any
    pub fn send(&self, subscriber_id: &str, event: RunEvent) {
        let name = event.name();
        let delivery = self
            .subscribers
            .get(subscriber_id)
            .map(|subscriber| (subscriber.generation, subscriber.tx.send(event).is_ok()));

        match delivery {
            Some((_, true)) => {
                tracing::debug!(subscriber_id, event = name, "Event delivered");
            }
            Some((generation, false)) => {
                // Receiver went away without its drop guard running yet
                tracing::warn!(subscriber_id, event = name, "Dropping event for closed client");
                self.remove_generation(subscriber_id, generation);
            }
            None => {
                tracing::warn!(
                    subscriber_id,
                    event = name,
                    "Attempted to send message to non-existent client"
                );
            }
        }
    }

    /// End the stream for `subscriber_id` and unregister it.
    ///
    /// Events already queued are still delivered before the stream ends.
    pub fn close(&self, subscriber_id: &str) -> bool {
        let removed = self.subscribers.remove(subscriber_id).is_some();
        if removed {
            tracing::info!(subscriber_id, "Client connection closed explicitly");
        }
        removed
    }

    /// End every stream and unregister all subscribers.
    ///
    /// Queued events are still delivered; used on server shutdown so that
    /// long-lived streams let the connection drain.
    pub fn close_all(&self) -> usize {
        let count = self.subscribers.len();
        self.subscribers.clear();
        if count > 0 {
            tracing::info!(count, "Closed all client connections");
        }
        count
    }

    /// Whether a live channel exists for `subscriber_id`
    pub fn is_connected(&self, subscriber_id: &str) -> bool {
        self.subscribers.contains_key(subscriber_id)
    }

    /// Number of live channels
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Wait until `subscriber_id` has an open channel, up to `timeout`.
    ///
    /// Returns whether the subscriber is connected when the wait ends.
    pub async fn wait_for(&self, subscriber_id: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Register interest before checking to avoid missing a notification
            let notified = self.opened.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_connected(subscriber_id) {
                return true;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.is_connected(subscriber_id);
            }
        }
    }

    fn remove_generation(&self, subscriber_id: &str, generation: u64) -> bool {
        self.subscribers
            .remove_if(subscriber_id, |_, subscriber| {
                subscriber.generation == generation
            })
            .is_some()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_KEEP_ALIVE)
    }
}

/// Receiving side of a subscriber channel.
///
/// Dropping it (the transport reporting a disconnect) unregisters the
/// channel, unless it has already been replaced by a newer one.
pub struct SubscriberStream {
    subscriber_id: String,
    generation: u64,
    rx: mpsc::UnboundedReceiver<RunEvent>,
    registry: ChannelRegistry,
}

impl SubscriberStream {
    pub fn subscriber_id(&self) -> &str {
        &self.subscriber_id
    }

    /// Next event, or `None` once the channel is closed or replaced
    pub async fn next_event(&mut self) -> Option<RunEvent> {
        self.rx.recv().await
    }

    /// Next already-queued event without waiting
    pub fn try_next_event(&mut self) -> Option<RunEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for SubscriberStream {
    type Item = RunEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<RunEvent>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for SubscriberStream {
    fn drop(&mut self) {
        if self
            .registry
            .remove_generation(&self.subscriber_id, self.generation)
        {
            tracing::info!(subscriber_id = %self.subscriber_id, "Client disconnected");
        }
    }
}
