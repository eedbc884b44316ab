//! PostgreSQL implementation of the [`Store`](crate::dao::store::Store) traits.

mod grids;
pub mod listener;
mod pools;
mod rows;
mod squares;
mod users;

use futures::future::BoxFuture;
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::info;

use crate::dao::{
    storage::{StorageError, StorageResult},
    store::Store,
};

/// Postgres-backed store sharing one connection pool across requests.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Open a connection pool against `url`.
    pub async fn connect(url: &str, max_connections: u32) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|err| StorageError::unavailable("connecting to postgres".into(), err))?;

        Ok(Self { pool })
    }

    /// Apply the bundled schema migrations.
    pub async fn migrate(&self) -> StorageResult<()> {
        sqlx::migrate!()
            .run(&self.pool)
            .await
            .map_err(|err| StorageError::unavailable("running migrations".into(), err))?;
        info!("database migrations applied");
        Ok(())
    }

    /// Underlying connection pool, used by the notification listener.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Release every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl Store for PgStore {
    fn health_check(&self) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .storage("health check")?;
            Ok(())
        })
    }
}

/// Map sqlx failures onto [`StorageError`], keeping unique violations distinct.
pub(crate) trait SqlxResultExt<T> {
    fn storage(self, operation: &str) -> StorageResult<T>;
}

impl<T> SqlxResultExt<T> for Result<T, sqlx::Error> {
    fn storage(self, operation: &str) -> StorageResult<T> {
        self.map_err(|err| match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StorageError::Duplicate(operation.to_owned())
            }
            _ => StorageError::unavailable(operation.to_owned(), err),
        })
    }
}
