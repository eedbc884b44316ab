//! Turns database notifications about sports events into `grid_updated` publishes for
//! every pool with a grid linked to that event.

use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use tokio::{
    sync::watch,
    time::{Instant, interval_at, sleep},
};
use tracing::{debug, info, warn};

use crate::{
    dao::{storage::StorageResult, store::Store},
    state::{PoolBroker, PoolEvent},
};

/// Connection health ping cadence.
pub const PING_INTERVAL: Duration = Duration::from_secs(90);
const INITIAL_BACKOFF: Duration = Duration::from_secs(10);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Stream of raw notification payloads.
///
/// `Ok(None)` signals a dropped connection that the source has re-established.
pub trait NotificationSource: Send {
    /// Wait for the next payload.
    fn next(&mut self) -> BoxFuture<'_, StorageResult<Option<String>>>;
}

/// Long-lived task state of the bridge.
pub struct NotifyBridge<S> {
    source: S,
    store: Arc<dyn Store>,
    broker: PoolBroker,
    shutdown: watch::Receiver<bool>,
}

impl<S: NotificationSource> NotifyBridge<S> {
    /// Bridge from `source` into `broker`, stopping when `shutdown` flips to `true`.
    pub fn new(
        source: S,
        store: Arc<dyn Store>,
        broker: PoolBroker,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            source,
            store,
            broker,
            shutdown,
        }
    }

    /// Run until the shutdown flag flips. Errors are logged and never end the loop.
    pub async fn run(mut self) {
        let mut ping = interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);
        let mut backoff = INITIAL_BACKOFF;
        info!("notification bridge started");

        loop {
            if *self.shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if let Err(err) = self.store.health_check().await {
                        warn!(error = %err, "notification bridge ping failed");
                    }
                }
                received = self.source.next() => match received {
                    Ok(Some(payload)) => {
                        backoff = INITIAL_BACKOFF;
                        self.dispatch(&payload).await;
                    }
                    Ok(None) => {
                        debug!("notification connection re-established");
                    }
                    Err(err) => {
                        warn!(error = %err, retry_in = ?backoff, "notification listener failed");
                        tokio::select! {
                            _ = sleep(backoff) => {}
                            _ = self.shutdown.changed() => {}
                        }
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                },
            }
        }

        info!("notification bridge stopped");
    }

    async fn dispatch(&self, payload: &str) {
        let event_id = match payload.trim().parse::<i64>() {
            Ok(id) => id,
            Err(err) => {
                warn!(error = %err, payload, "ignoring malformed sports event notification");
                return;
            }
        };

        match self.store.pool_tokens_for_event(event_id).await {
            Ok(tokens) => {
                debug!(event_id, pools = tokens.len(), "sports event updated");
                for token in tokens {
                    self.broker.publish(&token, PoolEvent::grid_updated());
                }
            }
            Err(err) => {
                warn!(error = %err, event_id, "could not resolve pools for sports event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::{sync::mpsc, time::timeout};

    use super::*;
    use crate::{
        dao::{
            memory::MemoryStore,
            models::{GridType, IdentityKind, NewPool, NumberSetConfig},
            store::{GridStore, PoolStore, UserStore},
        },
    };

    struct ChannelSource(mpsc::UnboundedReceiver<StorageResult<Option<String>>>);

    impl NotificationSource for ChannelSource {
        fn next(&mut self) -> BoxFuture<'_, StorageResult<Option<String>>> {
            Box::pin(async move {
                match self.0.recv().await {
                    Some(item) => item,
                    None => futures::future::pending().await,
                }
            })
        }
    }

    async fn linked_pool(store: &MemoryStore, token: &str, event_id: i64) {
        let owner = store
            .ensure_user(IdentityKind::External, format!("auth0|{token}"))
            .await
            .unwrap();
        let pool = store
            .create_pool(NewPool {
                token: token.into(),
                user_id: owner.id,
                name: token.into(),
                grid_type: GridType::Std100,
                password_hash: String::new(),
                number_set_config: NumberSetConfig::Standard,
            })
            .await
            .unwrap();
        let mut grid = store.grids(pool.id).await.unwrap().remove(0);
        grid.linked_event_id = Some(event_id);
        store.save_grid(grid).await.unwrap();
    }

    #[tokio::test]
    async fn notifications_fan_out_to_linked_pools() {
        let store = Arc::new(MemoryStore::new());
        linked_pool(&store, "linked", 42).await;
        linked_pool(&store, "other", 7).await;

        let broker = PoolBroker::new();
        let mut linked = broker.subscribe("linked");
        let mut other = broker.subscribe("other");
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (tx, rx) = mpsc::unbounded_channel();

        let bridge = NotifyBridge::new(ChannelSource(rx), store, broker.clone(), shutdown_rx);
        let handle = tokio::spawn(bridge.run());

        tx.send(Ok(Some("not-a-number".into()))).unwrap();
        tx.send(Ok(None)).unwrap();
        tx.send(Ok(Some("42".into()))).unwrap();

        let received = timeout(Duration::from_secs(1), linked.recv()).await.unwrap();
        assert_eq!(received, Some(PoolEvent::grid_updated()));
        assert!(
            timeout(Duration::from_millis(50), other.recv())
                .await
                .is_err()
        );

        shutdown.send_replace(true);
        timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_interrupts_backoff() {
        let store = Arc::new(MemoryStore::new());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (tx, rx) = mpsc::unbounded_channel();
        let bridge = NotifyBridge::new(ChannelSource(rx), store, PoolBroker::new(), shutdown_rx);
        let handle = tokio::spawn(bridge.run());

        tx.send(Err(crate::dao::storage::StorageError::Duplicate("boom".into())))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.send_replace(true);
        timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
