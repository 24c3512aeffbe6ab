//! Event fan-out to subscribers
//!
//! Every event the watch loop accepts is published here and copied into one
//! channel per subscriber. Subscribers are independent: a slow one only ever
//! fills its own buffer, and what happens then is decided by the configured
//! [`OverflowPolicy`].
//!
//! ```text
//! watch loop ── publish(event) ──► DashMap<id, sender> ──► per-subscriber mpsc ──► Subscription
//! ```
//!
//! Subscriptions unregister themselves when dropped, so a consumer task that is
//! cancelled or panics never leaves a dangling sender behind.

use dashmap::DashMap;
use futures::Stream;
use informer_core::prelude::*;
use informer_core::{BroadcastConfig, InformerMetrics, OverflowPolicy};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

enum SubscriberSender {
    Bounded(mpsc::Sender<Arc<StreamEvent>>),
    Unbounded(mpsc::UnboundedSender<Arc<StreamEvent>>),
}

enum SubscriberReceiver {
    Bounded(mpsc::Receiver<Arc<StreamEvent>>),
    Unbounded(mpsc::UnboundedReceiver<Arc<StreamEvent>>),
}

enum Delivery {
    Sent,
    Full,
    Closed,
}

impl SubscriberSender {
    fn deliver(&self, event: Arc<StreamEvent>) -> Delivery {
        match self {
            Self::Bounded(tx) => match tx.try_send(event) {
                Ok(()) => Delivery::Sent,
                Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
                Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
            },
            Self::Unbounded(tx) => match tx.send(event) {
                Ok(()) => Delivery::Sent,
                Err(_) => Delivery::Closed,
            },
        }
    }
}

struct Registry {
    subscribers: DashMap<u64, SubscriberSender>,
    next_id: AtomicU64,
    config: BroadcastConfig,
    metrics: InformerMetrics,
}

impl Registry {
    fn remove(&self, id: u64) {
        if self.subscribers.remove(&id).is_some() {
            self.metrics.set_subscribers(self.subscribers.len());
        }
    }
}

/// Fan-out of watch events to a dynamic set of subscribers
pub struct EventBroadcaster {
    registry: Arc<Registry>,
}

impl EventBroadcaster {
    pub fn new(config: BroadcastConfig, metrics: InformerMetrics) -> Self {
        Self {
            registry: Arc::new(Registry {
                subscribers: DashMap::new(),
                next_id: AtomicU64::new(1),
                config,
                metrics,
            }),
        }
    }

    /// Register a new subscriber
    ///
    /// It receives every event published from now on; nothing is replayed.
    pub fn subscribe(&self) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = match self.registry.config.subscriber_buffer {
            0 => {
                let (tx, rx) = mpsc::unbounded_channel();
                (SubscriberSender::Unbounded(tx), SubscriberReceiver::Unbounded(rx))
            }
            capacity => {
                let (tx, rx) = mpsc::channel(capacity);
                (SubscriberSender::Bounded(tx), SubscriberReceiver::Bounded(rx))
            }
        };

        self.registry.subscribers.insert(id, sender);
        self.registry.metrics.set_subscribers(self.registry.subscribers.len());
        debug!(subscription_id = id, "Subscriber registered");

        Subscription {
            id,
            receiver,
            registry: Arc::clone(&self.registry),
        }
    }

    /// Remove a subscriber; same as dropping it
    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    /// Deliver `event` to every current subscriber, returning how many got it
    pub fn publish(&self, event: StreamEvent) -> usize {
        let event = Arc::new(event);
        let mut delivered = 0;
        let mut stale = Vec::new();

        for entry in self.registry.subscribers.iter() {
            match entry.value().deliver(Arc::clone(&event)) {
                Delivery::Sent => delivered += 1,
                Delivery::Closed => stale.push(*entry.key()),
                Delivery::Full => match self.registry.config.overflow_policy {
                    OverflowPolicy::DropNewest => {
                        self.registry.metrics.record_event_dropped();
                        trace!(subscription_id = *entry.key(), "Subscriber buffer full, event dropped");
                    }
                    OverflowPolicy::Disconnect => {
                        self.registry.metrics.record_subscriber_disconnected();
                        warn!(subscription_id = *entry.key(), "Subscriber buffer full, disconnecting");
                        stale.push(*entry.key());
                    }
                },
            }
        }

        // removal must wait until the iterator released its shard locks
        for id in stale {
            self.registry.remove(id);
        }

        trace!(kind = %event.kind, delivered, "Event published");
        delivered
    }

    /// Close every subscription; their receivers drain and then yield `None`
    pub fn close_all(&self) {
        let count = self.registry.subscribers.len();
        self.registry.subscribers.clear();
        self.registry.metrics.set_subscribers(0);
        if count > 0 {
            debug!(count, "Closed all subscriptions");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.subscribers.len()
    }
}

/// A consumer's ordered view of the live event stream
///
/// Unregisters itself when dropped.
pub struct Subscription {
    id: u64,
    receiver: SubscriberReceiver,
    registry: Arc<Registry>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next event; `None` once the subscription was closed
    pub async fn recv(&mut self) -> Option<Arc<StreamEvent>> {
        match &mut self.receiver {
            SubscriberReceiver::Bounded(rx) => rx.recv().await,
            SubscriberReceiver::Unbounded(rx) => rx.recv().await,
        }
    }

    /// Take the next buffered event without waiting
    pub fn try_recv(&mut self) -> Option<Arc<StreamEvent>> {
        match &mut self.receiver {
            SubscriberReceiver::Bounded(rx) => rx.try_recv().ok(),
            SubscriberReceiver::Unbounded(rx) => rx.try_recv().ok(),
        }
    }
}

impl Stream for Subscription {
    type Item = Arc<StreamEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match &mut self.get_mut().receiver {
            SubscriberReceiver::Bounded(rx) => rx.poll_recv(cx),
            SubscriberReceiver::Unbounded(rx) => rx.poll_recv(cx),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.remove(self.id);
        trace!(subscription_id = self.id, "Subscriber unregistered");
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    fn broadcaster(subscriber_buffer: usize, overflow_policy: OverflowPolicy) -> EventBroadcaster {
        EventBroadcaster::new(
            BroadcastConfig {
                subscriber_buffer,
                overflow_policy,
            },
            InformerMetrics::new("test"),
        )
    }

    fn event(n: u64) -> StreamEvent {
        StreamEvent::modified(json!({"metadata": {"uid": "a"}, "v": n}))
    }

    #[tokio::test]
    async fn test_fan_out_independence() {
        let hub = broadcaster(16, OverflowPolicy::Disconnect);
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();

        assert_eq!(hub.publish(event(1)), 2);
        let mut late = hub.subscribe();

        assert_eq!(*first.recv().await.unwrap(), event(1));
        assert_eq!(*second.recv().await.unwrap(), event(1));
        assert!(late.try_recv().is_none());

        hub.publish(event(2));
        assert_eq!(*late.recv().await.unwrap(), event(2));
    }

    #[tokio::test]
    async fn test_order_preserved() {
        let hub = broadcaster(0, OverflowPolicy::Disconnect);
        let mut sub = hub.subscribe();

        for n in 0..100 {
            hub.publish(event(n));
        }
        for n in 0..100 {
            assert_eq!(sub.recv().await.unwrap().object["v"], json!(n));
        }
    }

    #[tokio::test]
    async fn test_drop_unregisters() {
        let hub = broadcaster(16, OverflowPolicy::Disconnect);
        let sub = hub.subscribe();
        let other = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        drop(sub);
        assert_eq!(hub.subscriber_count(), 1);

        hub.unsubscribe(other);
        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(hub.publish(event(1)), 0);
    }

    #[tokio::test]
    async fn test_drop_newest_keeps_slow_subscriber() {
        let hub = broadcaster(2, OverflowPolicy::DropNewest);
        let mut slow = hub.subscribe();
        let mut fast = hub.subscribe();

        hub.publish(event(1));
        assert_eq!(fast.recv().await.unwrap().object["v"], json!(1));
        hub.publish(event(2));
        assert_eq!(fast.recv().await.unwrap().object["v"], json!(2));
        // slow is full now, event 3 is dropped for it only
        assert_eq!(hub.publish(event(3)), 1);
        assert_eq!(fast.recv().await.unwrap().object["v"], json!(3));

        assert_eq!(hub.subscriber_count(), 2);
        assert_eq!(slow.recv().await.unwrap().object["v"], json!(1));
        assert_eq!(slow.recv().await.unwrap().object["v"], json!(2));
        assert!(slow.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_disconnect_closes_lagging_subscriber() {
        let hub = broadcaster(1, OverflowPolicy::Disconnect);
        let mut slow = hub.subscribe();
        let mut fast = hub.subscribe();

        hub.publish(event(1));
        assert!(fast.recv().await.is_some());
        hub.publish(event(2));

        assert_eq!(hub.subscriber_count(), 1);
        assert!(fast.recv().await.is_some());
        // buffered event is still delivered, then the stream ends
        assert_eq!(slow.recv().await.unwrap().object["v"], json!(1));
        assert!(slow.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_close_all_ends_streams() {
        let hub = broadcaster(16, OverflowPolicy::Disconnect);
        let sub = hub.subscribe();
        hub.publish(event(1));
        hub.close_all();

        let received: Vec<_> = sub.collect().await;
        assert_eq!(received.len(), 1);
        assert_eq!(hub.subscriber_count(), 0);
    }
}
