use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::{
    error::ServiceError,
    services::access_service,
    state::{PoolEvent, SharedState, broker::Subscription},
};

/// Interval between `: keepalive` comment frames.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Authenticate the stream credential, pass the access gate and register with the broker.
pub async fn subscribe(
    state: &SharedState,
    access_token: Option<&str>,
    pool_token: &str,
) -> Result<Subscription, ServiceError> {
    let user = access_service::authenticate(state, access_token).await?;
    let access = access_service::resolve(state, user, pool_token, true).await?;
    debug!(pool = %access.pool.token, user = access.user.id, "stream opened");
    Ok(state.broker().subscribe(&access.pool.token))
}

/// SSE frame for a broker event: the kind as `event:` and the JSON body as `data:`.
pub fn to_event(event: &PoolEvent) -> Option<Event> {
    match Event::default().event(event.kind.as_str()).json_data(event) {
        Ok(frame) => Some(frame),
        Err(err) => {
            warn!(error = %err, "failed to encode stream event");
            None
        }
    }
}

/// Forward broker events to an SSE response until the client leaves, the
/// subscription closes, or the server shuts down.
pub fn to_sse_stream(
    mut subscription: Subscription,
    mut shutdown: watch::Receiver<bool>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = subscription.recv() => {
                    let Some(event) = received else {
                        break;
                    };
                    let Some(frame) = to_event(&event) else {
                        continue;
                    };
                    if tx.send(Ok(frame)).await.is_err() {
                        break;
                    }
                }
            }
        }
        debug!(pool = %subscription.token(), "stream closed");
    });

    Sse::new(ReceiverStream::new(rx)).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keepalive"),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        dao::{memory::MemoryStore, models::GridType},
        state::test_support,
    };

    #[tokio::test]
    async fn subscription_requires_a_valid_token() {
        let store = Arc::new(MemoryStore::new());
        let state = test_support::state(store.clone());
        let owner = test_support::external(&store, "auth0|owner").await;
        let pool = test_support::pool(&store, owner.id, GridType::Std100).await;

        assert!(matches!(
            subscribe(&state, None, &pool.token).await,
            Err(ServiceError::Unauthenticated(_))
        ));
        assert!(matches!(
            subscribe(&state, Some("not-a-jwt"), &pool.token).await,
            Err(ServiceError::Unauthenticated(_))
        ));

        let (_, jwt) = test_support::guest(&store, "viewer").await;
        assert!(matches!(
            subscribe(&state, Some(&jwt), &pool.token).await,
            Err(ServiceError::Forbidden(_))
        ));
        assert_eq!(state.broker().subscriber_count(&pool.token), 0);
    }

    #[tokio::test]
    async fn forwarder_releases_the_subscription_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let state = test_support::state(store);
        let subscription = state.broker().subscribe("pool");
        let sse = to_sse_stream(subscription, state.shutdown_watcher());
        assert_eq!(state.broker().subscriber_count("pool"), 1);

        state.trigger_shutdown();
        for _ in 0..50 {
            if state.broker().subscriber_count("pool") == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(state.broker().subscriber_count("pool"), 0);
        drop(sse);
    }

    #[test]
    fn events_are_named_after_their_kind() {
        assert!(to_event(&PoolEvent::square_updated()).is_some());
    }
}
