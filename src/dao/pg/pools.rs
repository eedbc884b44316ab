use futures::future::BoxFuture;
use time::OffsetDateTime;

use super::{
    PgStore, SqlxResultExt,
    rows::{InviteRow, POOL_COLUMNS, PoolRow, convert_all},
};
use crate::dao::{
    models::{InviteEntity, Membership, NewPool, PoolEntity},
    storage::StorageResult,
    store::{Page, PoolChange, PoolListing, PoolStore},
};

fn change_column(change: &PoolChange) -> &'static str {
    match change {
        PoolChange::Locks(_) => "locks",
        PoolChange::PasswordRequired(_) => "password_required",
        PoolChange::OpenAccessOnLock(_) => "open_access_on_lock",
        PoolChange::Archived(_) => "archived",
        PoolChange::Name(_) => "name",
        PoolChange::NumberSetConfig(_) => "number_set_config",
    }
}

impl PoolStore for PgStore {
    fn create_pool(&self, pool: NewPool) -> BoxFuture<'_, StorageResult<PoolEntity>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.storage("starting transaction")?;

            let query = format!(
                "INSERT INTO pools (token, user_id, name, grid_type, password_hash, \
                 number_set_config) VALUES ($1, $2, $3, $4, $5, $6) RETURNING {POOL_COLUMNS}"
            );
            let row = sqlx::query_as::<_, PoolRow>(&query)
                .bind(&pool.token)
                .bind(pool.user_id)
                .bind(&pool.name)
                .bind(pool.grid_type.as_str())
                .bind(&pool.password_hash)
                .bind(pool.number_set_config.as_str())
                .fetch_one(&mut *tx)
                .await
                .storage("inserting pool")?;
            let entity = PoolEntity::try_from(row)?;

            sqlx::query(
                "INSERT INTO pool_squares (pool_id, square_id) \
                 SELECT $1, generate_series(1, $2)",
            )
            .bind(entity.id)
            .bind(entity.grid_type.square_count())
            .execute(&mut *tx)
            .await
            .storage("inserting pool squares")?;

            sqlx::query("INSERT INTO grids (pool_id, ord) VALUES ($1, 1)")
                .bind(entity.id)
                .execute(&mut *tx)
                .await
                .storage("inserting first grid")?;

            tx.commit().await.storage("committing pool")?;
            Ok(entity)
        })
    }

    fn pool_by_token(&self, token: String) -> BoxFuture<'_, StorageResult<Option<PoolEntity>>> {
        Box::pin(async move {
            let query = format!("SELECT {POOL_COLUMNS} FROM pools WHERE token = $1");
            sqlx::query_as::<_, PoolRow>(&query)
                .bind(&token)
                .fetch_optional(&self.pool)
                .await
                .storage("loading pool")?
                .map(PoolEntity::try_from)
                .transpose()
        })
    }

    fn update_pool(
        &self,
        pool_id: i64,
        change: PoolChange,
    ) -> BoxFuture<'_, StorageResult<Option<PoolEntity>>> {
        Box::pin(async move {
            let query = format!(
                "UPDATE pools SET {} = $2, modified = NOW() WHERE id = $1 RETURNING {POOL_COLUMNS}",
                change_column(&change)
            );
            let update = sqlx::query_as::<_, PoolRow>(&query).bind(pool_id);
            let update = match change {
                PoolChange::Locks(locks) => update.bind(locks),
                PoolChange::PasswordRequired(flag)
                | PoolChange::OpenAccessOnLock(flag)
                | PoolChange::Archived(flag) => update.bind(flag),
                PoolChange::Name(name) => update.bind(name),
                PoolChange::NumberSetConfig(config) => update.bind(config.as_str()),
            };
            update
                .fetch_optional(&self.pool)
                .await
                .storage("updating pool")?
                .map(PoolEntity::try_from)
                .transpose()
        })
    }

    fn pools_for_user(
        &self,
        user_id: i64,
        listing: PoolListing,
        offset: i64,
        limit: i64,
    ) -> BoxFuture<'_, StorageResult<Page<PoolEntity>>> {
        Box::pin(async move {
            let filter = match listing {
                PoolListing::Owned {
                    include_archived: true,
                } => "user_id = $1",
                PoolListing::Owned {
                    include_archived: false,
                } => "user_id = $1 AND NOT archived",
                PoolListing::Joined => {
                    "id IN (SELECT pool_id FROM pools_users WHERE user_id = $1)"
                }
            };

            let query = format!(
                "SELECT {POOL_COLUMNS} FROM pools WHERE {filter} \
                 ORDER BY id DESC OFFSET $2 LIMIT $3"
            );
            let rows = sqlx::query_as::<_, PoolRow>(&query)
                .bind(user_id)
                .bind(offset)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
                .storage("listing user pools")?;

            let count = format!("SELECT COUNT(*) FROM pools WHERE {filter}");
            let total = sqlx::query_scalar::<_, i64>(&count)
                .bind(user_id)
                .fetch_one(&self.pool)
                .await
                .storage("counting user pools")?;

            Ok(Page {
                items: convert_all(rows)?,
                total,
            })
        })
    }

    fn change_join_password(
        &self,
        pool_id: i64,
        password_hash: String,
        reset_membership: bool,
    ) -> BoxFuture<'_, StorageResult<i32>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.storage("starting transaction")?;

            let check_id = sqlx::query_scalar::<_, i32>(
                "UPDATE pools SET password_hash = $2, check_id = check_id + 1, modified = NOW() \
                 WHERE id = $1 RETURNING check_id",
            )
            .bind(pool_id)
            .bind(&password_hash)
            .fetch_one(&mut *tx)
            .await
            .storage("changing join password")?;

            if reset_membership {
                sqlx::query("DELETE FROM pools_users WHERE pool_id = $1")
                    .bind(pool_id)
                    .execute(&mut *tx)
                    .await
                    .storage("resetting membership")?;
            }

            tx.commit().await.storage("committing join password")?;
            Ok(check_id)
        })
    }

    fn membership(
        &self,
        pool_id: i64,
        user_id: i64,
    ) -> BoxFuture<'_, StorageResult<Option<Membership>>> {
        Box::pin(async move {
            let is_manager = sqlx::query_scalar::<_, bool>(
                "SELECT is_manager FROM pools_users WHERE pool_id = $1 AND user_id = $2",
            )
            .bind(pool_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .storage("loading membership")?;
            Ok(is_manager.map(|is_manager| Membership { is_manager }))
        })
    }

    fn join_pool(&self, pool_id: i64, user_id: i64) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO pools_users (pool_id, user_id) VALUES ($1, $2) \
                 ON CONFLICT (pool_id, user_id) DO NOTHING",
            )
            .bind(pool_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .storage("joining pool")?;
            Ok(())
        })
    }

    fn leave_pool(&self, pool_id: i64, user_id: i64) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            sqlx::query("DELETE FROM pools_users WHERE pool_id = $1 AND user_id = $2")
                .bind(pool_id)
                .bind(user_id)
                .execute(&self.pool)
                .await
                .storage("leaving pool")?;
            Ok(())
        })
    }

    fn active_invite(
        &self,
        pool_id: i64,
        check_id: i32,
        now: OffsetDateTime,
    ) -> BoxFuture<'_, StorageResult<Option<InviteEntity>>> {
        Box::pin(async move {
            let row = sqlx::query_as::<_, InviteRow>(
                "SELECT token, pool_id, check_id, expires FROM pool_invites \
                 WHERE pool_id = $1 AND check_id = $2 AND expires > $3 \
                 ORDER BY expires DESC LIMIT 1",
            )
            .bind(pool_id)
            .bind(check_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .storage("loading active invite")?;
            Ok(row.map(InviteEntity::from))
        })
    }

    fn create_invite(&self, invite: InviteEntity) -> BoxFuture<'_, StorageResult<InviteEntity>> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO pool_invites (token, pool_id, check_id, expires) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(&invite.token)
            .bind(invite.pool_id)
            .bind(invite.check_id)
            .bind(invite.expires)
            .execute(&self.pool)
            .await
            .storage("inserting invite")?;
            Ok(invite)
        })
    }

    fn invite_by_token(
        &self,
        token: String,
    ) -> BoxFuture<'_, StorageResult<Option<InviteEntity>>> {
        Box::pin(async move {
            let row = sqlx::query_as::<_, InviteRow>(
                "SELECT token, pool_id, check_id, expires FROM pool_invites WHERE token = $1",
            )
            .bind(&token)
            .fetch_optional(&self.pool)
            .await
            .storage("loading invite")?;
            Ok(row.map(InviteEntity::from))
        })
    }

    fn pool_tokens_for_event(&self, event_id: i64) -> BoxFuture<'_, StorageResult<Vec<String>>> {
        Box::pin(async move {
            sqlx::query_scalar::<_, String>(
                "SELECT DISTINCT p.token FROM pools p \
                 INNER JOIN grids g ON g.pool_id = p.id \
                 WHERE g.linked_event_id = $1 AND g.state = 'active'",
            )
            .bind(event_id)
            .fetch_all(&self.pool)
            .await
            .storage("loading pools linked to event")
        })
    }
}
