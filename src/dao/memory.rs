//! In-process [`Store`] used by the test-suite and local experiments.
//!
//! Every operation runs under a single mutex, which gives the same all-or-nothing
//! behaviour the Postgres backend gets from transactions.

use std::{
    collections::{BTreeMap, HashMap},
    future::ready,
    sync::{Mutex, MutexGuard, PoisonError},
};

use futures::future::BoxFuture;
use time::OffsetDateTime;

use crate::dao::{
    models::{
        GridAnnotationEntity, GridEntity, GridState, IdentityKind, InviteEntity, Membership,
        NewPool, PoolEntity, SportsEventEntity, SquareEntity, SquareLogEntity, SquareState,
        UserEntity,
    },
    storage::{StorageError, StorageResult},
    store::{
        AnnotationWrite, DrawRecord, GridDeletion, GridStore, Page, ParentLink, PoolChange,
        PoolListing, PoolStore, SportsEventQuery, SquareStore, SquareWriteBatch, Store,
        UserStore, WriteGuard, WriteOutcome,
    },
};

#[derive(Debug, Clone)]
struct SquareRow {
    id: i64,
    user_id: Option<i64>,
    state: SquareState,
    claimant: Option<String>,
    parent: Option<i32>,
    modified: OffsetDateTime,
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    users: Vec<UserEntity>,
    guests: HashMap<String, OffsetDateTime>,
    pools: Vec<PoolEntity>,
    members: HashMap<(i64, i64), Membership>,
    invites: Vec<InviteEntity>,
    grids: Vec<GridEntity>,
    events: HashMap<i64, SportsEventEntity>,
    annotations: Vec<GridAnnotationEntity>,
    squares: BTreeMap<(i64, i32), SquareRow>,
    logs: Vec<(i64, i32, SquareLogEntity)>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn square_entity(&self, pool_id: i64, square_id: i32, row: &SquareRow) -> SquareEntity {
        let child_square_ids = self
            .squares
            .range((pool_id, i32::MIN)..=(pool_id, i32::MAX))
            .filter(|(_, child)| child.parent == Some(square_id))
            .map(|((_, child_id), _)| *child_id)
            .collect();

        SquareEntity {
            id: row.id,
            pool_id,
            square_id,
            parent_square_id: row.parent,
            child_square_ids,
            user_id: row.user_id,
            state: row.state,
            claimant: row.claimant.clone(),
            modified: row.modified,
        }
    }

    fn next_grid_ord(&self, pool_id: i64) -> i32 {
        self.grids
            .iter()
            .filter(|grid| grid.pool_id == pool_id && grid.state == GridState::Active)
            .map(|grid| grid.ord + 1)
            .max()
            .unwrap_or(1)
    }
}

/// Mutex-guarded store keeping every record in memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace a cached sports event.
    pub fn upsert_sports_event(&self, event: SportsEventEntity) {
        self.lock().events.insert(event.id, event);
    }

    /// Flag an existing user as site administrator.
    pub fn promote_site_admin(&self, user_id: i64) {
        let mut inner = self.lock();
        if let Some(user) = inner.users.iter_mut().find(|user| user.id == user_id) {
            user.is_site_admin = true;
        }
    }

    /// Record an explicit membership row.
    pub fn add_member(&self, pool_id: i64, user_id: i64, is_manager: bool) {
        self.lock()
            .members
            .insert((pool_id, user_id), Membership { is_manager });
    }
}

fn done<'a, T: Send + 'a>(value: T) -> BoxFuture<'a, T> {
    Box::pin(ready(value))
}

fn page<T>(rows: Vec<T>, offset: i64, limit: i64) -> Page<T> {
    let total = rows.len() as i64;
    let items = rows
        .into_iter()
        .skip(usize::try_from(offset).unwrap_or(0))
        .take(usize::try_from(limit).unwrap_or(0))
        .collect();
    Page { items, total }
}

impl UserStore for MemoryStore {
    fn ensure_user(
        &self,
        kind: IdentityKind,
        subject: String,
    ) -> BoxFuture<'_, StorageResult<UserEntity>> {
        let mut inner = self.lock();
        if let Some(user) = inner
            .users
            .iter()
            .find(|user| user.kind == kind && user.subject == subject)
        {
            return done(Ok(user.clone()));
        }

        let user = UserEntity {
            id: inner.next_id(),
            kind,
            subject,
            email: None,
            is_site_admin: false,
            created: OffsetDateTime::now_utc(),
        };
        inner.users.push(user.clone());
        done(Ok(user))
    }

    fn user_by_id(&self, id: i64) -> BoxFuture<'_, StorageResult<Option<UserEntity>>> {
        let inner = self.lock();
        done(Ok(inner.users.iter().find(|user| user.id == id).cloned()))
    }

    fn set_user_email(&self, user_id: i64, email: String) -> BoxFuture<'_, StorageResult<()>> {
        let mut inner = self.lock();
        if let Some(user) = inner.users.iter_mut().find(|user| user.id == user_id) {
            user.email = Some(email);
        }
        done(Ok(()))
    }

    fn guest_expiry(
        &self,
        subject: String,
    ) -> BoxFuture<'_, StorageResult<Option<OffsetDateTime>>> {
        let inner = self.lock();
        done(Ok(inner.guests.get(&subject).copied()))
    }

    fn create_guest(
        &self,
        subject: String,
        expires: OffsetDateTime,
        _remote_addr: Option<String>,
    ) -> BoxFuture<'_, StorageResult<UserEntity>> {
        let user = {
            let mut inner = self.lock();
            inner.guests.insert(subject.clone(), expires);
            let user = UserEntity {
                id: inner.next_id(),
                kind: IdentityKind::Guest,
                subject,
                email: None,
                is_site_admin: false,
                created: OffsetDateTime::now_utc(),
            };
            inner.users.push(user.clone());
            user
        };
        done(Ok(user))
    }
}

impl PoolStore for MemoryStore {
    fn create_pool(&self, pool: NewPool) -> BoxFuture<'_, StorageResult<PoolEntity>> {
        let mut inner = self.lock();
        if inner.pools.iter().any(|existing| existing.token == pool.token) {
            return done(Err(StorageError::Duplicate(format!(
                "pool token {}",
                pool.token
            ))));
        }

        let now = OffsetDateTime::now_utc();
        let entity = PoolEntity {
            id: inner.next_id(),
            token: pool.token,
            user_id: pool.user_id,
            name: pool.name,
            grid_type: pool.grid_type,
            password_hash: Some(pool.password_hash),
            password_required: true,
            open_access_on_lock: false,
            locks: None,
            check_id: 1,
            archived: false,
            number_set_config: pool.number_set_config,
            created: now,
            modified: now,
        };

        for square_id in 1..=entity.grid_type.square_count() {
            let id = inner.next_id();
            inner.squares.insert(
                (entity.id, square_id),
                SquareRow {
                    id,
                    user_id: None,
                    state: SquareState::Unclaimed,
                    claimant: None,
                    parent: None,
                    modified: now,
                },
            );
        }

        let mut grid = GridEntity::draft(entity.id, now);
        grid.id = inner.next_id();
        grid.ord = 1;
        inner.grids.push(grid);
        inner.pools.push(entity.clone());
        done(Ok(entity))
    }

    fn pool_by_token(&self, token: String) -> BoxFuture<'_, StorageResult<Option<PoolEntity>>> {
        let inner = self.lock();
        done(Ok(inner.pools.iter().find(|pool| pool.token == token).cloned()))
    }

    fn update_pool(
        &self,
        pool_id: i64,
        change: PoolChange,
    ) -> BoxFuture<'_, StorageResult<Option<PoolEntity>>> {
        let mut inner = self.lock();
        let Some(stored) = inner.pools.iter_mut().find(|stored| stored.id == pool_id) else {
            return done(Ok(None));
        };
        match change {
            PoolChange::Locks(locks) => stored.locks = locks,
            PoolChange::PasswordRequired(required) => stored.password_required = required,
            PoolChange::OpenAccessOnLock(open) => stored.open_access_on_lock = open,
            PoolChange::Archived(archived) => stored.archived = archived,
            PoolChange::Name(name) => stored.name = name,
            PoolChange::NumberSetConfig(config) => stored.number_set_config = config,
        }
        stored.modified = OffsetDateTime::now_utc();
        done(Ok(Some(stored.clone())))
    }

    fn pools_for_user(
        &self,
        user_id: i64,
        listing: PoolListing,
        offset: i64,
        limit: i64,
    ) -> BoxFuture<'_, StorageResult<Page<PoolEntity>>> {
        let inner = self.lock();
        let mut pools: Vec<PoolEntity> = inner
            .pools
            .iter()
            .filter(|pool| match listing {
                PoolListing::Owned { include_archived } => {
                    pool.user_id == user_id && (include_archived || !pool.archived)
                }
                PoolListing::Joined => inner.members.contains_key(&(pool.id, user_id)),
            })
            .cloned()
            .collect();
        pools.sort_by(|a, b| b.id.cmp(&a.id));
        done(Ok(page(pools, offset, limit)))
    }

    fn change_join_password(
        &self,
        pool_id: i64,
        password_hash: String,
        reset_membership: bool,
    ) -> BoxFuture<'_, StorageResult<i32>> {
        let mut inner = self.lock();
        let mut check_id = 0;
        if let Some(stored) = inner.pools.iter_mut().find(|stored| stored.id == pool_id) {
            stored.password_hash = Some(password_hash);
            stored.check_id += 1;
            stored.modified = OffsetDateTime::now_utc();
            check_id = stored.check_id;
        }
        if reset_membership {
            inner.members.retain(|(member_pool, _), _| *member_pool != pool_id);
        }
        done(Ok(check_id))
    }

    fn membership(
        &self,
        pool_id: i64,
        user_id: i64,
    ) -> BoxFuture<'_, StorageResult<Option<Membership>>> {
        let inner = self.lock();
        done(Ok(inner.members.get(&(pool_id, user_id)).copied()))
    }

    fn join_pool(&self, pool_id: i64, user_id: i64) -> BoxFuture<'_, StorageResult<()>> {
        self.lock()
            .members
            .entry((pool_id, user_id))
            .or_insert(Membership { is_manager: false });
        done(Ok(()))
    }

    fn leave_pool(&self, pool_id: i64, user_id: i64) -> BoxFuture<'_, StorageResult<()>> {
        self.lock().members.remove(&(pool_id, user_id));
        done(Ok(()))
    }

    fn active_invite(
        &self,
        pool_id: i64,
        check_id: i32,
        now: OffsetDateTime,
    ) -> BoxFuture<'_, StorageResult<Option<InviteEntity>>> {
        let inner = self.lock();
        let invite = inner
            .invites
            .iter()
            .filter(|invite| {
                invite.pool_id == pool_id && invite.check_id == check_id && invite.expires > now
            })
            .max_by_key(|invite| invite.expires)
            .cloned();
        done(Ok(invite))
    }

    fn create_invite(&self, invite: InviteEntity) -> BoxFuture<'_, StorageResult<InviteEntity>> {
        let mut inner = self.lock();
        if inner.invites.iter().any(|existing| existing.token == invite.token) {
            return done(Err(StorageError::Duplicate(format!(
                "invite token {}",
                invite.token
            ))));
        }
        inner.invites.push(invite.clone());
        done(Ok(invite))
    }

    fn invite_by_token(
        &self,
        token: String,
    ) -> BoxFuture<'_, StorageResult<Option<InviteEntity>>> {
        let inner = self.lock();
        done(Ok(inner
            .invites
            .iter()
            .find(|invite| invite.token == token)
            .cloned()))
    }

    fn pool_tokens_for_event(&self, event_id: i64) -> BoxFuture<'_, StorageResult<Vec<String>>> {
        let inner = self.lock();
        let mut tokens: Vec<String> = inner
            .pools
            .iter()
            .filter(|pool| {
                inner.grids.iter().any(|grid| {
                    grid.pool_id == pool.id
                        && grid.state == GridState::Active
                        && grid.linked_event_id == Some(event_id)
                })
            })
            .map(|pool| pool.token.clone())
            .collect();
        tokens.sort();
        tokens.dedup();
        done(Ok(tokens))
    }
}

impl GridStore for MemoryStore {
    fn grids(&self, pool_id: i64) -> BoxFuture<'_, StorageResult<Vec<GridEntity>>> {
        let inner = self.lock();
        let mut grids: Vec<GridEntity> = inner
            .grids
            .iter()
            .filter(|grid| grid.pool_id == pool_id && grid.state == GridState::Active)
            .cloned()
            .collect();
        grids.sort_by_key(|grid| (grid.ord, grid.id));
        done(Ok(grids))
    }

    fn grid(
        &self,
        pool_id: i64,
        grid_id: i64,
    ) -> BoxFuture<'_, StorageResult<Option<GridEntity>>> {
        let inner = self.lock();
        done(Ok(inner
            .grids
            .iter()
            .find(|grid| {
                grid.pool_id == pool_id && grid.id == grid_id && grid.state == GridState::Active
            })
            .cloned()))
    }

    fn save_grid(&self, mut grid: GridEntity) -> BoxFuture<'_, StorageResult<GridEntity>> {
        let mut inner = self.lock();
        grid.modified = OffsetDateTime::now_utc();
        if grid.id == 0 {
            grid.id = inner.next_id();
            grid.ord = inner.next_grid_ord(grid.pool_id);
            grid.created = grid.modified;
            inner.grids.push(grid.clone());
        } else if let Some(stored) = inner.grids.iter_mut().find(|stored| stored.id == grid.id) {
            *stored = grid.clone();
        }
        done(Ok(grid))
    }

    fn record_draw(&self, draw: DrawRecord) -> BoxFuture<'_, StorageResult<bool>> {
        let mut inner = self.lock();
        let Some(grid) = inner
            .grids
            .iter_mut()
            .find(|grid| grid.id == draw.grid_id && grid.pool_id == draw.pool_id)
        else {
            return done(Ok(false));
        };
        if draw.require_undrawn && grid.numbers_drawn() {
            return done(Ok(false));
        }

        let now = OffsetDateTime::now_utc();
        grid.home_numbers = Some(draw.home_numbers);
        grid.away_numbers = Some(draw.away_numbers);
        grid.manual_draw = draw.manual;
        grid.modified = now;

        if let Some(locks) = draw.lock_pool_at {
            if let Some(pool) = inner.pools.iter_mut().find(|pool| pool.id == draw.pool_id) {
                pool.locks = Some(locks);
                pool.modified = now;
            }
        }
        done(Ok(true))
    }

    fn delete_grid(
        &self,
        pool_id: i64,
        grid_id: i64,
    ) -> BoxFuture<'_, StorageResult<GridDeletion>> {
        let mut inner = self.lock();
        let active = inner
            .grids
            .iter()
            .filter(|grid| grid.pool_id == pool_id && grid.state == GridState::Active)
            .count();
        let Some(grid) = inner.grids.iter_mut().find(|grid| {
            grid.pool_id == pool_id && grid.id == grid_id && grid.state == GridState::Active
        }) else {
            return done(Ok(GridDeletion::NotFound));
        };
        if active <= 1 {
            return done(Ok(GridDeletion::LastGrid));
        }
        grid.state = GridState::Deleted;
        grid.modified = OffsetDateTime::now_utc();
        done(Ok(GridDeletion::Deleted))
    }

    fn reorder_grids(&self, pool_id: i64, grid_ids: Vec<i64>) -> BoxFuture<'_, StorageResult<()>> {
        let mut inner = self.lock();
        for (position, grid_id) in grid_ids.into_iter().enumerate() {
            if let Some(grid) = inner
                .grids
                .iter_mut()
                .find(|grid| grid.pool_id == pool_id && grid.id == grid_id)
            {
                grid.ord = position as i32 + 1;
            }
        }
        done(Ok(()))
    }

    fn sports_event(&self, id: i64) -> BoxFuture<'_, StorageResult<Option<SportsEventEntity>>> {
        let inner = self.lock();
        done(Ok(inner.events.get(&id).cloned()))
    }

    fn sports_events(
        &self,
        query: SportsEventQuery,
    ) -> BoxFuture<'_, StorageResult<Page<SportsEventEntity>>> {
        let inner = self.lock();
        let search = query.search.as_deref().map(str::to_lowercase);
        let matches_search = |event: &SportsEventEntity| {
            let Some(search) = search.as_deref() else {
                return true;
            };
            [&event.home_team_name, &event.away_team_name, &event.name]
                .into_iter()
                .flatten()
                .any(|name| name.to_lowercase().contains(search))
        };
        let mut events: Vec<SportsEventEntity> = inner
            .events
            .values()
            .filter(|event| event.league == query.league)
            .filter(|event| query.statuses.is_empty() || query.statuses.contains(&event.status))
            .filter(|event| matches_search(*event))
            .cloned()
            .collect();
        events.sort_by_key(|event| (event.event_date, event.id));
        done(Ok(page(events, query.offset, query.limit)))
    }

    fn grid_annotations(
        &self,
        grid_id: i64,
    ) -> BoxFuture<'_, StorageResult<Vec<GridAnnotationEntity>>> {
        let inner = self.lock();
        let mut annotations: Vec<GridAnnotationEntity> = inner
            .annotations
            .iter()
            .filter(|annotation| annotation.grid_id == grid_id)
            .cloned()
            .collect();
        annotations.sort_by_key(|annotation| annotation.square_id);
        done(Ok(annotations))
    }

    fn save_annotation(
        &self,
        write: AnnotationWrite,
    ) -> BoxFuture<'_, StorageResult<(GridAnnotationEntity, bool)>> {
        let mut inner = self.lock();
        let now = OffsetDateTime::now_utc();
        if let Some(stored) = inner.annotations.iter_mut().find(|stored| {
            stored.grid_id == write.grid_id && stored.square_id == write.square_id
        }) {
            stored.annotation = write.annotation;
            stored.icon = write.icon;
            stored.modified = now;
            return done(Ok((stored.clone(), false)));
        }

        let annotation = GridAnnotationEntity {
            id: inner.next_id(),
            grid_id: write.grid_id,
            square_id: write.square_id,
            annotation: write.annotation,
            icon: write.icon,
            created: now,
            modified: now,
        };
        inner.annotations.push(annotation.clone());
        done(Ok((annotation, true)))
    }

    fn delete_annotation(&self, grid_id: i64, square_id: i32) -> BoxFuture<'_, StorageResult<()>> {
        self.lock().annotations.retain(|annotation| {
            !(annotation.grid_id == grid_id && annotation.square_id == square_id)
        });
        done(Ok(()))
    }
}

impl SquareStore for MemoryStore {
    fn squares(&self, pool_id: i64) -> BoxFuture<'_, StorageResult<Vec<SquareEntity>>> {
        let inner = self.lock();
        let squares = inner
            .squares
            .range((pool_id, i32::MIN)..=(pool_id, i32::MAX))
            .map(|((pool, square_id), row)| inner.square_entity(*pool, *square_id, row))
            .collect();
        done(Ok(squares))
    }

    fn square(
        &self,
        pool_id: i64,
        square_id: i32,
    ) -> BoxFuture<'_, StorageResult<Option<SquareEntity>>> {
        let inner = self.lock();
        let square = inner
            .squares
            .get(&(pool_id, square_id))
            .map(|row| inner.square_entity(pool_id, square_id, row));
        done(Ok(square))
    }

    fn square_logs(
        &self,
        pool_id: i64,
        square_id: i32,
    ) -> BoxFuture<'_, StorageResult<Vec<SquareLogEntity>>> {
        let inner = self.lock();
        let mut logs: Vec<SquareLogEntity> = inner
            .logs
            .iter()
            .filter(|(pool, square, _)| *pool == pool_id && *square == square_id)
            .map(|(_, _, log)| log.clone())
            .collect();
        logs.sort_by(|a, b| b.id.cmp(&a.id));
        done(Ok(logs))
    }

    fn pool_logs(
        &self,
        pool_id: i64,
        offset: i64,
        limit: i64,
    ) -> BoxFuture<'_, StorageResult<Page<SquareLogEntity>>> {
        let inner = self.lock();
        let mut logs: Vec<SquareLogEntity> = inner
            .logs
            .iter()
            .filter(|(pool, _, _)| *pool == pool_id)
            .map(|(_, _, log)| log.clone())
            .collect();
        logs.sort_by(|a, b| b.id.cmp(&a.id));
        done(Ok(page(logs, offset, limit)))
    }

    fn apply_square_writes(
        &self,
        batch: SquareWriteBatch,
    ) -> BoxFuture<'_, StorageResult<WriteOutcome>> {
        let mut inner = self.lock();

        for write in &batch.writes {
            let Some(row) = inner.squares.get(&(batch.pool_id, write.square_id)) else {
                return done(Ok(WriteOutcome::Missing {
                    square_id: write.square_id,
                }));
            };
            let holds = match write.guard {
                WriteGuard::Any => true,
                WriteGuard::Unclaimed => row.state == SquareState::Unclaimed,
                WriteGuard::Claimed => row.state != SquareState::Unclaimed,
            };
            if !holds {
                return done(Ok(WriteOutcome::Rejected {
                    square_id: write.square_id,
                    guard: write.guard,
                }));
            }
        }

        let now = OffsetDateTime::now_utc();
        for write in batch.writes {
            let log_id = inner.next_id();
            let Some(row) = inner.squares.get_mut(&(batch.pool_id, write.square_id)) else {
                continue;
            };
            row.state = write.state;
            row.claimant = write.claimant.clone();
            if let Some(user_id) = write.user_id {
                row.user_id = Some(user_id);
            }
            match write.parent {
                ParentLink::Keep => {}
                ParentLink::Set(parent) => row.parent = Some(parent),
                ParentLink::Clear => row.parent = None,
            }
            row.modified = now;

            inner.logs.push((
                batch.pool_id,
                write.square_id,
                SquareLogEntity {
                    id: log_id,
                    square_id: write.square_id,
                    user_id: Some(batch.actor_id),
                    state: write.state,
                    claimant: write.claimant,
                    remote_addr: batch.remote_addr.clone(),
                    note: write.note,
                    created: now,
                },
            ));
        }

        done(Ok(WriteOutcome::Applied))
    }
}

impl Store for MemoryStore {
    fn health_check(&self) -> BoxFuture<'_, StorageResult<()>> {
        done(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::{
        models::{GridType, NumberSetConfig},
        store::SquareWrite,
    };

    fn new_pool(token: &str, grid_type: GridType) -> NewPool {
        NewPool {
            token: token.into(),
            user_id: 1,
            name: "Office pool".into(),
            grid_type,
            password_hash: "hash".into(),
            number_set_config: NumberSetConfig::Standard,
        }
    }

    fn claim(square_id: i32, guard: WriteGuard) -> SquareWrite {
        SquareWrite {
            square_id,
            state: SquareState::Claimed,
            claimant: Some("Alice".into()),
            user_id: Some(7),
            parent: ParentLink::Keep,
            guard,
            note: "user: initial claim".into(),
        }
    }

    #[tokio::test]
    async fn create_pool_seeds_squares_and_first_grid() {
        let store = MemoryStore::new();
        let pool = store
            .create_pool(new_pool("abc", GridType::Std25))
            .await
            .unwrap();

        assert_eq!(store.squares(pool.id).await.unwrap().len(), 25);
        assert_eq!(store.grids(pool.id).await.unwrap().len(), 1);
        assert!(matches!(
            store.create_pool(new_pool("abc", GridType::Std25)).await,
            Err(StorageError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn rejected_guard_leaves_batch_unapplied() {
        let store = MemoryStore::new();
        let pool = store
            .create_pool(new_pool("abc", GridType::Roll100))
            .await
            .unwrap();
        let first = SquareWriteBatch {
            pool_id: pool.id,
            actor_id: 7,
            remote_addr: None,
            writes: vec![claim(2, WriteGuard::Unclaimed)],
        };
        assert_eq!(
            store.apply_square_writes(first).await.unwrap(),
            WriteOutcome::Applied
        );

        let second = SquareWriteBatch {
            pool_id: pool.id,
            actor_id: 7,
            remote_addr: None,
            writes: vec![claim(1, WriteGuard::Unclaimed), claim(2, WriteGuard::Unclaimed)],
        };
        assert_eq!(
            store.apply_square_writes(second).await.unwrap(),
            WriteOutcome::Rejected {
                square_id: 2,
                guard: WriteGuard::Unclaimed
            }
        );
        let untouched = store.square(pool.id, 1).await.unwrap().unwrap();
        assert_eq!(untouched.state, SquareState::Unclaimed);
        assert!(store.square_logs(pool.id, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn children_are_materialized_from_parent_edges() {
        let store = MemoryStore::new();
        let pool = store
            .create_pool(new_pool("abc", GridType::Roll100))
            .await
            .unwrap();
        let mut secondary = claim(40, WriteGuard::Unclaimed);
        secondary.parent = ParentLink::Set(4);
        let batch = SquareWriteBatch {
            pool_id: pool.id,
            actor_id: 7,
            remote_addr: Some("10.0.0.1".into()),
            writes: vec![claim(4, WriteGuard::Unclaimed), secondary],
        };
        store.apply_square_writes(batch).await.unwrap();

        let primary = store.square(pool.id, 4).await.unwrap().unwrap();
        assert_eq!(primary.child_square_ids, vec![40]);
        let child = store.square(pool.id, 40).await.unwrap().unwrap();
        assert_eq!(child.parent_square_id, Some(4));
        assert_eq!(store.square_logs(pool.id, 40).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn last_grid_cannot_be_deleted() {
        let store = MemoryStore::new();
        let pool = store
            .create_pool(new_pool("abc", GridType::Std100))
            .await
            .unwrap();
        let first = store.grids(pool.id).await.unwrap().remove(0);
        assert_eq!(
            store.delete_grid(pool.id, first.id).await.unwrap(),
            GridDeletion::LastGrid
        );

        let second = store
            .save_grid(GridEntity::draft(pool.id, OffsetDateTime::now_utc()))
            .await
            .unwrap();
        assert_eq!(second.ord, 2);
        assert_eq!(
            store.delete_grid(pool.id, first.id).await.unwrap(),
            GridDeletion::Deleted
        );
        assert_eq!(
            store.delete_grid(pool.id, first.id).await.unwrap(),
            GridDeletion::NotFound
        );
    }

    #[tokio::test]
    async fn pool_change_touches_only_its_column() {
        let store = MemoryStore::new();
        let pool = store
            .create_pool(new_pool("abc", GridType::Std100))
            .await
            .unwrap();
        let grid = store.grids(pool.id).await.unwrap().remove(0);
        let locks = OffsetDateTime::now_utc();
        store
            .record_draw(DrawRecord {
                pool_id: pool.id,
                grid_id: grid.id,
                home_numbers: (0..10).collect(),
                away_numbers: (0..10).collect(),
                manual: false,
                require_undrawn: true,
                lock_pool_at: Some(locks),
            })
            .await
            .unwrap();

        let renamed = store
            .update_pool(pool.id, PoolChange::Name("Renamed".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(renamed.name, "Renamed");
        assert_eq!(renamed.locks, Some(locks));
        assert_eq!(
            store.update_pool(999, PoolChange::Archived(true)).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn pool_listings_page_owned_and_joined() {
        let store = MemoryStore::new();
        let first = store
            .create_pool(new_pool("first", GridType::Std25))
            .await
            .unwrap();
        let second = store
            .create_pool(new_pool("second", GridType::Std25))
            .await
            .unwrap();
        store
            .update_pool(second.id, PoolChange::Archived(true))
            .await
            .unwrap();

        let owned = store
            .pools_for_user(1, PoolListing::Owned { include_archived: false }, 0, 10)
            .await
            .unwrap();
        assert_eq!(owned.total, 1);
        assert_eq!(owned.items[0].id, first.id);

        let all = store
            .pools_for_user(1, PoolListing::Owned { include_archived: true }, 1, 10)
            .await
            .unwrap();
        assert_eq!(all.total, 2);
        assert_eq!(all.items.len(), 1);
        assert_eq!(all.items[0].id, first.id);

        store.join_pool(second.id, 9).await.unwrap();
        let joined = store
            .pools_for_user(9, PoolListing::Joined, 0, 10)
            .await
            .unwrap();
        assert_eq!(joined.total, 1);
        store.leave_pool(second.id, 9).await.unwrap();
        assert!(store.membership(second.id, 9).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn annotation_upsert_reports_insert_then_update() {
        let store = MemoryStore::new();
        let write = AnnotationWrite {
            grid_id: 5,
            square_id: 12,
            annotation: "Q1 winner".into(),
            icon: 0,
        };
        let (inserted, created) = store.save_annotation(write.clone()).await.unwrap();
        assert!(created);

        let (updated, created) = store
            .save_annotation(AnnotationWrite {
                icon: 8,
                ..write
            })
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(updated.id, inserted.id);
        assert_eq!(updated.icon, 8);

        store.delete_annotation(5, 12).await.unwrap();
        assert!(store.grid_annotations(5).await.unwrap().is_empty());
    }
}
