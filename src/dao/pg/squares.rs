use futures::future::BoxFuture;

use super::{
    PgStore, SqlxResultExt,
    rows::{SquareLogRow, SquareRow, convert_all},
};
use crate::dao::{
    models::{SquareEntity, SquareLogEntity},
    storage::StorageResult,
    store::{Page, ParentLink, SquareStore, SquareWriteBatch, WriteGuard, WriteOutcome},
};

const SQUARE_SELECT: &str = "SELECT s.id, s.pool_id, s.square_id, \
    p.square_id AS parent_square_id, \
    (SELECT ARRAY_AGG(c.square_id ORDER BY c.square_id) FROM pool_squares c \
     WHERE c.parent_id = s.id) AS child_square_ids, \
    s.user_id, s.state, s.claimant, s.modified \
    FROM pool_squares s LEFT JOIN pool_squares p ON p.id = s.parent_id";

fn guard_name(guard: WriteGuard) -> &'static str {
    match guard {
        WriteGuard::Any => "any",
        WriteGuard::Unclaimed => "unclaimed",
        WriteGuard::Claimed => "claimed",
    }
}

fn parent_parts(parent: ParentLink) -> (&'static str, Option<i32>) {
    match parent {
        ParentLink::Keep => ("keep", None),
        ParentLink::Set(square_id) => ("set", Some(square_id)),
        ParentLink::Clear => ("clear", None),
    }
}

impl SquareStore for PgStore {
    fn squares(&self, pool_id: i64) -> BoxFuture<'_, StorageResult<Vec<SquareEntity>>> {
        Box::pin(async move {
            let query = format!("{SQUARE_SELECT} WHERE s.pool_id = $1 ORDER BY s.square_id");
            let rows = sqlx::query_as::<_, SquareRow>(&query)
                .bind(pool_id)
                .fetch_all(&self.pool)
                .await
                .storage("loading squares")?;
            convert_all(rows)
        })
    }

    fn square(
        &self,
        pool_id: i64,
        square_id: i32,
    ) -> BoxFuture<'_, StorageResult<Option<SquareEntity>>> {
        Box::pin(async move {
            let query = format!("{SQUARE_SELECT} WHERE s.pool_id = $1 AND s.square_id = $2");
            sqlx::query_as::<_, SquareRow>(&query)
                .bind(pool_id)
                .bind(square_id)
                .fetch_optional(&self.pool)
                .await
                .storage("loading square")?
                .map(SquareEntity::try_from)
                .transpose()
        })
    }

    fn square_logs(
        &self,
        pool_id: i64,
        square_id: i32,
    ) -> BoxFuture<'_, StorageResult<Vec<SquareLogEntity>>> {
        Box::pin(async move {
            let rows = sqlx::query_as::<_, SquareLogRow>(
                "SELECT l.id, s.square_id, l.user_id, l.state, l.claimant, l.remote_addr, \
                 l.note, l.created \
                 FROM pool_squares_logs l \
                 INNER JOIN pool_squares s ON s.id = l.pool_square_id \
                 WHERE s.pool_id = $1 AND s.square_id = $2 \
                 ORDER BY l.created DESC, l.id DESC",
            )
            .bind(pool_id)
            .bind(square_id)
            .fetch_all(&self.pool)
            .await
            .storage("loading square logs")?;
            convert_all(rows)
        })
    }

    fn pool_logs(
        &self,
        pool_id: i64,
        offset: i64,
        limit: i64,
    ) -> BoxFuture<'_, StorageResult<Page<SquareLogEntity>>> {
        Box::pin(async move {
            let rows = sqlx::query_as::<_, SquareLogRow>(
                "SELECT l.id, s.square_id, l.user_id, l.state, l.claimant, l.remote_addr, \
                 l.note, l.created \
                 FROM pool_squares_logs l \
                 INNER JOIN pool_squares s ON s.id = l.pool_square_id \
                 WHERE s.pool_id = $1 \
                 ORDER BY l.id DESC OFFSET $2 LIMIT $3",
            )
            .bind(pool_id)
            .bind(offset)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .storage("loading pool logs")?;

            let total = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM pool_squares_logs l \
                 INNER JOIN pool_squares s ON s.id = l.pool_square_id \
                 WHERE s.pool_id = $1",
            )
            .bind(pool_id)
            .fetch_one(&self.pool)
            .await
            .storage("counting pool logs")?;

            Ok(Page {
                items: convert_all(rows)?,
                total,
            })
        })
    }

    fn apply_square_writes(
        &self,
        batch: SquareWriteBatch,
    ) -> BoxFuture<'_, StorageResult<WriteOutcome>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.storage("starting transaction")?;

            for write in &batch.writes {
                let (parent_mode, parent_square) = parent_parts(write.parent);

                // Row locks taken here make concurrent guarded updates on the same square
                // re-check the guard against the committed state.
                let updated = sqlx::query_scalar::<_, i64>(
                    "UPDATE pool_squares SET state = $3, claimant = $4, \
                     user_id = COALESCE($5, user_id), \
                     parent_id = CASE $6 \
                         WHEN 'keep' THEN parent_id \
                         WHEN 'set' THEN (SELECT p.id FROM pool_squares p \
                                          WHERE p.pool_id = $1 AND p.square_id = $7) \
                         ELSE NULL END, \
                     modified = NOW() \
                     WHERE pool_id = $1 AND square_id = $2 \
                     AND ($8 = 'any' \
                          OR ($8 = 'unclaimed' AND state = 'unclaimed') \
                          OR ($8 = 'claimed' AND state <> 'unclaimed')) \
                     RETURNING id",
                )
                .bind(batch.pool_id)
                .bind(write.square_id)
                .bind(write.state.as_str())
                .bind(write.claimant.as_deref())
                .bind(write.user_id)
                .bind(parent_mode)
                .bind(parent_square)
                .bind(guard_name(write.guard))
                .fetch_optional(&mut *tx)
                .await
                .storage("updating square")?;

                let Some(row_id) = updated else {
                    let exists = sqlx::query_scalar::<_, bool>(
                        "SELECT EXISTS (SELECT 1 FROM pool_squares \
                         WHERE pool_id = $1 AND square_id = $2)",
                    )
                    .bind(batch.pool_id)
                    .bind(write.square_id)
                    .fetch_one(&mut *tx)
                    .await
                    .storage("checking square")?;

                    tx.rollback().await.storage("rolling back square writes")?;
                    return Ok(if exists {
                        WriteOutcome::Rejected {
                            square_id: write.square_id,
                            guard: write.guard,
                        }
                    } else {
                        WriteOutcome::Missing {
                            square_id: write.square_id,
                        }
                    });
                };

                sqlx::query(
                    "INSERT INTO pool_squares_logs \
                     (pool_square_id, user_id, state, claimant, remote_addr, note) \
                     VALUES ($1, $2, $3, $4, $5, $6)",
                )
                .bind(row_id)
                .bind(batch.actor_id)
                .bind(write.state.as_str())
                .bind(write.claimant.as_deref())
                .bind(batch.remote_addr.as_deref())
                .bind(&write.note)
                .execute(&mut *tx)
                .await
                .storage("inserting square log")?;
            }

            tx.commit().await.storage("committing square writes")?;
            Ok(WriteOutcome::Applied)
        })
    }
}
