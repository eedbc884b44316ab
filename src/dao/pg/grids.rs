use futures::future::BoxFuture;

use super::{
    PgStore, SqlxResultExt,
    rows::{
        ANNOTATION_COLUMNS, AnnotationRow, GRID_COLUMNS, GridRow, SPORTS_EVENT_COLUMNS,
        SavedAnnotationRow, SportsEventRow, convert_all,
    },
};
use crate::dao::{
    models::{GridAnnotationEntity, GridEntity, GridState, SportsEventEntity},
    storage::StorageResult,
    store::{AnnotationWrite, DrawRecord, GridDeletion, GridStore, Page, SportsEventQuery},
};

const SPORTS_EVENT_FILTER: &str = "league = $1 \
    AND (CARDINALITY($2::TEXT[]) = 0 OR status = ANY($2)) \
    AND ($3::TEXT IS NULL OR home_team_name ILIKE $3 OR away_team_name ILIKE $3 \
         OR name ILIKE $3)";

fn like_pattern(search: &str) -> String {
    let escaped = search
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

impl GridStore for PgStore {
    fn grids(&self, pool_id: i64) -> BoxFuture<'_, StorageResult<Vec<GridEntity>>> {
        Box::pin(async move {
            let query = format!(
                "SELECT {GRID_COLUMNS} FROM grids WHERE pool_id = $1 AND state = 'active' \
                 ORDER BY ord, id"
            );
            let rows = sqlx::query_as::<_, GridRow>(&query)
                .bind(pool_id)
                .fetch_all(&self.pool)
                .await
                .storage("loading grids")?;
            convert_all(rows)
        })
    }

    fn grid(
        &self,
        pool_id: i64,
        grid_id: i64,
    ) -> BoxFuture<'_, StorageResult<Option<GridEntity>>> {
        Box::pin(async move {
            let query = format!(
                "SELECT {GRID_COLUMNS} FROM grids \
                 WHERE pool_id = $1 AND id = $2 AND state = 'active'"
            );
            sqlx::query_as::<_, GridRow>(&query)
                .bind(pool_id)
                .bind(grid_id)
                .fetch_optional(&self.pool)
                .await
                .storage("loading grid")?
                .map(GridEntity::try_from)
                .transpose()
        })
    }

    fn save_grid(&self, grid: GridEntity) -> BoxFuture<'_, StorageResult<GridEntity>> {
        Box::pin(async move {
            let query = if grid.id == 0 {
                format!(
                    "INSERT INTO grids (pool_id, label, home_team_name, away_team_name, \
                     event_date, rollover, linked_event_id, notes, home_team_color1, \
                     home_team_color2, away_team_color1, away_team_color2, ord) \
                     VALUES ($2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, \
                     (SELECT COALESCE(MAX(ord), 0) + 1 FROM grids \
                      WHERE pool_id = $2 AND state = 'active')) \
                     RETURNING {GRID_COLUMNS}"
                )
            } else {
                format!(
                    "UPDATE grids SET label = $3, home_team_name = $4, away_team_name = $5, \
                     event_date = $6, rollover = $7, linked_event_id = $8, notes = $9, \
                     home_team_color1 = $10, home_team_color2 = $11, away_team_color1 = $12, \
                     away_team_color2 = $13, modified = NOW() \
                     WHERE id = $1 AND pool_id = $2 RETURNING {GRID_COLUMNS}"
                )
            };

            let row = sqlx::query_as::<_, GridRow>(&query)
                .bind(grid.id)
                .bind(grid.pool_id)
                .bind(grid.label.as_deref())
                .bind(grid.home_team_name.as_deref())
                .bind(grid.away_team_name.as_deref())
                .bind(grid.event_date)
                .bind(grid.rollover)
                .bind(grid.linked_event_id)
                .bind(grid.notes.as_deref())
                .bind(grid.colors.home_team_color1.as_deref())
                .bind(grid.colors.home_team_color2.as_deref())
                .bind(grid.colors.away_team_color1.as_deref())
                .bind(grid.colors.away_team_color2.as_deref())
                .fetch_one(&self.pool)
                .await
                .storage("saving grid")?;
            GridEntity::try_from(row)
        })
    }

    fn record_draw(&self, draw: DrawRecord) -> BoxFuture<'_, StorageResult<bool>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.storage("starting transaction")?;

            let updated = sqlx::query(
                "UPDATE grids SET home_numbers = $3, away_numbers = $4, manual_draw = $5, \
                 modified = NOW() \
                 WHERE id = $1 AND pool_id = $2 AND state = 'active' \
                 AND ($6 = FALSE OR (home_numbers IS NULL AND away_numbers IS NULL))",
            )
            .bind(draw.grid_id)
            .bind(draw.pool_id)
            .bind(&draw.home_numbers)
            .bind(&draw.away_numbers)
            .bind(draw.manual)
            .bind(draw.require_undrawn)
            .execute(&mut *tx)
            .await
            .storage("recording drawn numbers")?;

            if updated.rows_affected() == 0 {
                tx.rollback().await.storage("rolling back draw")?;
                return Ok(false);
            }

            if let Some(locks) = draw.lock_pool_at {
                sqlx::query("UPDATE pools SET locks = $2, modified = NOW() WHERE id = $1")
                    .bind(draw.pool_id)
                    .bind(locks)
                    .execute(&mut *tx)
                    .await
                    .storage("locking pool")?;
            }

            tx.commit().await.storage("committing draw")?;
            Ok(true)
        })
    }

    fn delete_grid(
        &self,
        pool_id: i64,
        grid_id: i64,
    ) -> BoxFuture<'_, StorageResult<GridDeletion>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.storage("starting transaction")?;

            let active = sqlx::query_scalar::<_, i64>(
                "SELECT id FROM grids WHERE pool_id = $1 AND state = 'active' FOR UPDATE",
            )
            .bind(pool_id)
            .fetch_all(&mut *tx)
            .await
            .storage("locking grids")?;

            let outcome = if !active.contains(&grid_id) {
                GridDeletion::NotFound
            } else if active.len() <= 1 {
                GridDeletion::LastGrid
            } else {
                sqlx::query("UPDATE grids SET state = $2, modified = NOW() WHERE id = $1")
                    .bind(grid_id)
                    .bind(GridState::Deleted.as_str())
                    .execute(&mut *tx)
                    .await
                    .storage("deleting grid")?;
                GridDeletion::Deleted
            };

            tx.commit().await.storage("committing grid delete")?;
            Ok(outcome)
        })
    }

    fn reorder_grids(&self, pool_id: i64, grid_ids: Vec<i64>) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.storage("starting transaction")?;
            for (position, grid_id) in grid_ids.iter().enumerate() {
                sqlx::query("UPDATE grids SET ord = $3 WHERE pool_id = $1 AND id = $2")
                    .bind(pool_id)
                    .bind(grid_id)
                    .bind(position as i32 + 1)
                    .execute(&mut *tx)
                    .await
                    .storage("reordering grids")?;
            }
            tx.commit().await.storage("committing grid order")?;
            Ok(())
        })
    }

    fn sports_event(&self, id: i64) -> BoxFuture<'_, StorageResult<Option<SportsEventEntity>>> {
        Box::pin(async move {
            let query = format!("SELECT {SPORTS_EVENT_COLUMNS} FROM sports_events WHERE id = $1");
            sqlx::query_as::<_, SportsEventRow>(&query)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .storage("loading sports event")?
                .map(SportsEventEntity::try_from)
                .transpose()
        })
    }

    fn sports_events(
        &self,
        query: SportsEventQuery,
    ) -> BoxFuture<'_, StorageResult<Page<SportsEventEntity>>> {
        Box::pin(async move {
            let statuses: Vec<&str> = query.statuses.iter().map(|status| status.as_str()).collect();
            let search = query.search.as_deref().map(like_pattern);

            let select = format!(
                "SELECT {SPORTS_EVENT_COLUMNS} FROM sports_events WHERE {SPORTS_EVENT_FILTER} \
                 ORDER BY event_date, id OFFSET $4 LIMIT $5"
            );
            let rows = sqlx::query_as::<_, SportsEventRow>(&select)
                .bind(query.league.as_str())
                .bind(&statuses)
                .bind(&search)
                .bind(query.offset)
                .bind(query.limit)
                .fetch_all(&self.pool)
                .await
                .storage("listing sports events")?;

            let count = format!("SELECT COUNT(*) FROM sports_events WHERE {SPORTS_EVENT_FILTER}");
            let total = sqlx::query_scalar::<_, i64>(&count)
                .bind(query.league.as_str())
                .bind(&statuses)
                .bind(&search)
                .fetch_one(&self.pool)
                .await
                .storage("counting sports events")?;

            Ok(Page {
                items: convert_all(rows)?,
                total,
            })
        })
    }

    fn grid_annotations(
        &self,
        grid_id: i64,
    ) -> BoxFuture<'_, StorageResult<Vec<GridAnnotationEntity>>> {
        Box::pin(async move {
            let query = format!(
                "SELECT {ANNOTATION_COLUMNS} FROM grid_annotations WHERE grid_id = $1 \
                 ORDER BY square_id"
            );
            let rows = sqlx::query_as::<_, AnnotationRow>(&query)
                .bind(grid_id)
                .fetch_all(&self.pool)
                .await
                .storage("loading grid annotations")?;
            Ok(rows.into_iter().map(GridAnnotationEntity::from).collect())
        })
    }

    fn save_annotation(
        &self,
        write: AnnotationWrite,
    ) -> BoxFuture<'_, StorageResult<(GridAnnotationEntity, bool)>> {
        Box::pin(async move {
            // xmax is zero only for a freshly inserted tuple.
            let query = format!(
                "INSERT INTO grid_annotations (grid_id, square_id, annotation, icon) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (grid_id, square_id) DO UPDATE \
                 SET annotation = EXCLUDED.annotation, icon = EXCLUDED.icon, modified = NOW() \
                 RETURNING {ANNOTATION_COLUMNS}, (xmax = 0) AS inserted"
            );
            let saved = sqlx::query_as::<_, SavedAnnotationRow>(&query)
                .bind(write.grid_id)
                .bind(write.square_id)
                .bind(&write.annotation)
                .bind(write.icon)
                .fetch_one(&self.pool)
                .await
                .storage("saving grid annotation")?;
            Ok((GridAnnotationEntity::from(saved.row), saved.inserted))
        })
    }

    fn delete_annotation(&self, grid_id: i64, square_id: i32) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            sqlx::query("DELETE FROM grid_annotations WHERE grid_id = $1 AND square_id = $2")
                .bind(grid_id)
                .bind(square_id)
                .execute(&self.pool)
                .await
                .storage("deleting grid annotation")?;
            Ok(())
        })
    }
}
