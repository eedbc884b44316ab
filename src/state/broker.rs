//! Per-pool fan-out of change notifications to live stream subscribers.

use std::{
    collections::HashMap,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;
use utoipa::ToSchema;

/// Buffered events per subscriber before new ones are dropped for it.
pub const SUBSCRIBER_CAPACITY: usize = 16;

/// Kind of change a pool subscriber is told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PoolEventKind {
    /// A square was claimed, released or changed state.
    SquareUpdated,
    /// A grid was saved, drawn, annotated or deleted.
    GridUpdated,
    /// Pool settings changed.
    PoolUpdated,
}

impl PoolEventKind {
    /// Name used for the SSE `event:` field.
    pub fn as_str(self) -> &'static str {
        match self {
            PoolEventKind::SquareUpdated => "square_updated",
            PoolEventKind::GridUpdated => "grid_updated",
            PoolEventKind::PoolUpdated => "pool_updated",
        }
    }
}

/// Value published to every subscriber of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct PoolEvent {
    #[serde(rename = "type")]
    pub kind: PoolEventKind,
}

impl PoolEvent {
    /// Event for square changes.
    pub fn square_updated() -> Self {
        Self {
            kind: PoolEventKind::SquareUpdated,
        }
    }

    /// Event for grid changes.
    pub fn grid_updated() -> Self {
        Self {
            kind: PoolEventKind::GridUpdated,
        }
    }

    /// Event for pool setting changes.
    pub fn pool_updated() -> Self {
        Self {
            kind: PoolEventKind::PoolUpdated,
        }
    }
}

type Subscribers = HashMap<String, HashMap<u64, mpsc::Sender<PoolEvent>>>;

/// Registry of subscriber channels keyed by pool token.
///
/// Cloning is cheap and every clone shares the same registry.
#[derive(Clone, Default)]
pub struct PoolBroker {
    subscribers: Arc<RwLock<Subscribers>>,
    next_id: Arc<AtomicU64>,
}

impl PoolBroker {
    /// Broker with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new bounded channel for `token`.
    ///
    /// The returned [`Subscription`] unsubscribes itself when dropped.
    pub fn subscribe(&self, token: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(token.to_owned())
            .or_default()
            .insert(id, tx);

        Subscription {
            broker: self.clone(),
            token: token.to_owned(),
            id,
            receiver: rx,
        }
    }

    /// Remove a subscriber, dropping the token entry once it has none left.
    pub fn unsubscribe(&self, token: &str, id: u64) {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(channels) = subscribers.get_mut(token) {
            channels.remove(&id);
            if channels.is_empty() {
                subscribers.remove(token);
            }
        }
    }

    /// Offer `event` to every subscriber of `token` without waiting.
    ///
    /// Subscribers whose buffer is full miss this event; unknown tokens are ignored.
    pub fn publish(&self, token: &str, event: PoolEvent) {
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(channels) = subscribers.get(token) else {
            return;
        };

        for (id, tx) in channels {
            match tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    debug!(pool = %token, subscriber = id, "subscriber buffer full; dropping event");
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
    }

    /// Live subscribers of one pool.
    pub fn subscriber_count(&self, token: &str) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(token)
            .map_or(0, HashMap::len)
    }

    /// Number of pools with at least one subscriber.
    pub fn pool_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Receiving half of a broker registration.
pub struct Subscription {
    broker: PoolBroker,
    token: String,
    id: u64,
    receiver: mpsc::Receiver<PoolEvent>,
}

impl Subscription {
    /// Pool token the subscription listens on.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Wait for the next event; `None` once the registration is gone.
    pub async fn recv(&mut self) -> Option<PoolEvent> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broker.unsubscribe(&self.token, self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn publish_reaches_every_subscriber_of_the_pool() {
        let broker = PoolBroker::new();
        let mut first = broker.subscribe("pool-a");
        let mut second = broker.subscribe("pool-a");
        let mut other = broker.subscribe("pool-b");

        broker.publish("pool-a", PoolEvent::grid_updated());

        assert_eq!(first.recv().await, Some(PoolEvent::grid_updated()));
        assert_eq!(second.recv().await, Some(PoolEvent::grid_updated()));
        assert!(
            timeout(Duration::from_millis(20), other.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn full_subscriber_does_not_block_the_others() {
        let broker = PoolBroker::new();
        let _stalled = broker.subscribe("pool");
        let mut live = broker.subscribe("pool");

        for _ in 0..SUBSCRIBER_CAPACITY + 4 {
            broker.publish("pool", PoolEvent::square_updated());
            assert_eq!(live.recv().await, Some(PoolEvent::square_updated()));
        }
    }

    #[tokio::test]
    async fn overflowing_events_are_dropped_in_order() {
        let broker = PoolBroker::new();
        let mut slow = broker.subscribe("pool");

        broker.publish("pool", PoolEvent::pool_updated());
        for _ in 0..SUBSCRIBER_CAPACITY + 4 {
            broker.publish("pool", PoolEvent::square_updated());
        }

        assert_eq!(slow.recv().await, Some(PoolEvent::pool_updated()));
        let mut received = 1;
        while timeout(Duration::from_millis(20), slow.recv()).await.is_ok() {
            received += 1;
        }
        assert_eq!(received, SUBSCRIBER_CAPACITY);
    }

    #[test]
    fn dropping_the_last_subscription_removes_the_pool_entry() {
        let broker = PoolBroker::new();
        let first = broker.subscribe("pool");
        let second = broker.subscribe("pool");
        assert_eq!(broker.subscriber_count("pool"), 2);

        drop(first);
        assert_eq!(broker.subscriber_count("pool"), 1);
        drop(second);
        assert_eq!(broker.subscriber_count("pool"), 0);
        assert_eq!(broker.pool_count(), 0);
    }

    #[test]
    fn publish_to_unknown_pool_is_a_no_op() {
        let broker = PoolBroker::new();
        broker.publish("nobody", PoolEvent::grid_updated());
        assert_eq!(broker.pool_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_subscribe_publish_unsubscribe_is_safe() {
        let broker = PoolBroker::new();
        let mut tasks = Vec::new();
        for i in 0..32 {
            let broker = broker.clone();
            tasks.push(tokio::spawn(async move {
                let token = format!("pool-{}", i % 4);
                let subscription = broker.subscribe(&token);
                for _ in 0..50 {
                    broker.publish(&token, PoolEvent::square_updated());
                }
                drop(subscription);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(broker.pool_count(), 0);
    }

    #[test]
    fn events_serialize_with_a_type_tag() {
        let json = serde_json::to_string(&PoolEvent::grid_updated()).unwrap();
        assert_eq!(json, r#"{"type":"grid_updated"}"#);
    }
}
