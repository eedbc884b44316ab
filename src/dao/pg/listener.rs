use futures::future::BoxFuture;
use sqlx::{PgPool, postgres::PgListener};

use crate::{
    dao::{pg::SqlxResultExt, storage::StorageResult},
    services::notify_bridge::NotificationSource,
};

/// Postgres channel raised by the sports event sync job.
pub const SPORTS_EVENT_CHANNEL: &str = "sports_event_updated";

/// `LISTEN` session on the sports event channel.
///
/// sqlx re-establishes a dropped connection on the next receive and reports the
/// gap as `None`.
pub struct PgNotificationSource {
    listener: PgListener,
}

impl PgNotificationSource {
    /// Open a dedicated connection and `LISTEN` on the sports event channel.
    pub async fn connect(pool: &PgPool) -> StorageResult<Self> {
        let mut listener = PgListener::connect_with(pool)
            .await
            .storage("opening notification listener")?;
        listener
            .listen(SPORTS_EVENT_CHANNEL)
            .await
            .storage("subscribing to sports event notifications")?;
        Ok(Self { listener })
    }
}

impl NotificationSource for PgNotificationSource {
    fn next(&mut self) -> BoxFuture<'_, StorageResult<Option<String>>> {
        Box::pin(async move {
            let notification = self
                .listener
                .try_recv()
                .await
                .storage("receiving notification")?;
            Ok(notification.map(|notification| notification.payload().to_owned()))
        })
    }
}
