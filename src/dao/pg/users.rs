use futures::future::BoxFuture;
use time::OffsetDateTime;

use super::{
    PgStore, SqlxResultExt,
    rows::{USER_COLUMNS, UserRow},
};
use crate::dao::{
    models::{IdentityKind, UserEntity},
    storage::StorageResult,
    store::UserStore,
};

impl UserStore for PgStore {
    fn ensure_user(
        &self,
        kind: IdentityKind,
        subject: String,
    ) -> BoxFuture<'_, StorageResult<UserEntity>> {
        Box::pin(async move {
            let query = format!(
                "INSERT INTO users (store, store_id) VALUES ($1, $2) \
                 ON CONFLICT (store, store_id) DO UPDATE SET store_id = EXCLUDED.store_id \
                 RETURNING {USER_COLUMNS}"
            );
            let row = sqlx::query_as::<_, UserRow>(&query)
                .bind(kind.as_str())
                .bind(&subject)
                .fetch_one(&self.pool)
                .await
                .storage("upserting user")?;
            UserEntity::try_from(row)
        })
    }

    fn user_by_id(&self, id: i64) -> BoxFuture<'_, StorageResult<Option<UserEntity>>> {
        Box::pin(async move {
            let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
            sqlx::query_as::<_, UserRow>(&query)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .storage("loading user")?
                .map(UserEntity::try_from)
                .transpose()
        })
    }

    fn set_user_email(&self, user_id: i64, email: String) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            sqlx::query("UPDATE users SET email = $2 WHERE id = $1")
                .bind(user_id)
                .bind(&email)
                .execute(&self.pool)
                .await
                .storage("updating user email")?;
            Ok(())
        })
    }

    fn guest_expiry(
        &self,
        subject: String,
    ) -> BoxFuture<'_, StorageResult<Option<OffsetDateTime>>> {
        Box::pin(async move {
            sqlx::query_scalar::<_, OffsetDateTime>(
                "SELECT expires FROM guest_users WHERE store = $1 AND store_id = $2",
            )
            .bind(IdentityKind::Guest.as_str())
            .bind(&subject)
            .fetch_optional(&self.pool)
            .await
            .storage("loading guest expiry")
        })
    }

    fn create_guest(
        &self,
        subject: String,
        expires: OffsetDateTime,
        remote_addr: Option<String>,
    ) -> BoxFuture<'_, StorageResult<UserEntity>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.storage("starting transaction")?;

            sqlx::query(
                "INSERT INTO guest_users (store, store_id, expires, remote_addr) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(IdentityKind::Guest.as_str())
            .bind(&subject)
            .bind(expires)
            .bind(remote_addr.as_deref())
            .execute(&mut *tx)
            .await
            .storage("inserting guest user")?;

            let query = format!(
                "INSERT INTO users (store, store_id) VALUES ($1, $2) RETURNING {USER_COLUMNS}"
            );
            let row = sqlx::query_as::<_, UserRow>(&query)
                .bind(IdentityKind::Guest.as_str())
                .bind(&subject)
                .fetch_one(&mut *tx)
                .await
                .storage("inserting user")?;

            tx.commit().await.storage("committing guest user")?;
            UserEntity::try_from(row)
        })
    }
}
