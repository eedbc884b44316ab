//! Persistence traits shared by the Postgres backend and the in-memory store.

use futures::future::BoxFuture;
use time::OffsetDateTime;

use crate::dao::{
    models::{
        GridAnnotationEntity, GridEntity, IdentityKind, InviteEntity, Membership, NewPool,
        NumberSetConfig, PoolEntity, SportsEventEntity, SportsEventStatus, SportsLeague,
        SquareEntity, SquareLogEntity, SquareState, UserEntity,
    },
    storage::StorageResult,
};

/// Condition a square row must satisfy for a write to go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteGuard {
    /// Apply unconditionally.
    Any,
    /// Row must currently be unclaimed.
    Unclaimed,
    /// Row must currently be anything but unclaimed.
    Claimed,
}

/// How a write touches the parent edge of a square.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentLink {
    Keep,
    /// Link to the given primary square number.
    Set(i32),
    Clear,
}

/// One row update plus the log note recorded with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SquareWrite {
    pub square_id: i32,
    pub state: SquareState,
    /// `None` clears the claimant.
    pub claimant: Option<String>,
    /// `None` keeps the stored user id.
    pub user_id: Option<i64>,
    pub parent: ParentLink,
    pub guard: WriteGuard,
    pub note: String,
}

/// Writes that commit or roll back together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SquareWriteBatch {
    pub pool_id: i64,
    /// User recorded on every log row.
    pub actor_id: i64,
    pub remote_addr: Option<String>,
    pub writes: Vec<SquareWrite>,
}

/// Result of applying a [`SquareWriteBatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// A guard did not hold; nothing was written.
    Rejected { square_id: i32, guard: WriteGuard },
    /// A referenced square does not exist; nothing was written.
    Missing { square_id: i32 },
}

/// Numbers to persist for a grid, optionally locking the pool in the same transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawRecord {
    pub pool_id: i64,
    pub grid_id: i64,
    pub home_numbers: Vec<i32>,
    pub away_numbers: Vec<i32>,
    pub manual: bool,
    /// Refuse to overwrite numbers that are already drawn.
    pub require_undrawn: bool,
    pub lock_pool_at: Option<OffsetDateTime>,
}

/// Result of a grid delete request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridDeletion {
    Deleted,
    LastGrid,
    NotFound,
}

/// Single-column pool update. Each variant touches only its own column so concurrent
/// changes to other columns, like the lock set by a draw, survive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolChange {
    /// Set or clear the lock timestamp.
    Locks(Option<OffsetDateTime>),
    PasswordRequired(bool),
    OpenAccessOnLock(bool),
    Archived(bool),
    Name(String),
    NumberSetConfig(NumberSetConfig),
}

/// Which pools of a user to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolListing {
    /// Pools the user created.
    Owned { include_archived: bool },
    /// Pools the user holds a membership row in.
    Joined,
}

/// Page of rows plus the total count ignoring offset and limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
}

/// Insert or replace the annotation of a grid square.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationWrite {
    pub grid_id: i64,
    pub square_id: i32,
    pub annotation: String,
    pub icon: i16,
}

/// Filters for the sports event listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SportsEventQuery {
    pub league: SportsLeague,
    /// Empty matches every status.
    pub statuses: Vec<SportsEventStatus>,
    /// Case-insensitive substring of either team name or the event name.
    pub search: Option<String>,
    pub offset: i64,
    pub limit: i64,
}

/// User records and guest expirations.
pub trait UserStore: Send + Sync {
    /// Resolve the user for `(kind, subject)`, inserting it on first sight.
    fn ensure_user(
        &self,
        kind: IdentityKind,
        subject: String,
    ) -> BoxFuture<'_, StorageResult<UserEntity>>;
    fn user_by_id(&self, id: i64) -> BoxFuture<'_, StorageResult<Option<UserEntity>>>;
    fn set_user_email(&self, user_id: i64, email: String) -> BoxFuture<'_, StorageResult<()>>;
    /// Expiry recorded for a guest subject, if any.
    fn guest_expiry(&self, subject: String)
    -> BoxFuture<'_, StorageResult<Option<OffsetDateTime>>>;
    fn create_guest(
        &self,
        subject: String,
        expires: OffsetDateTime,
        remote_addr: Option<String>,
    ) -> BoxFuture<'_, StorageResult<UserEntity>>;
}

/// Pools, memberships and invites.
pub trait PoolStore: Send + Sync {
    /// Insert a pool with its squares and first grid. Fails with
    /// [`StorageError::Duplicate`](crate::dao::storage::StorageError::Duplicate) on token reuse.
    fn create_pool(&self, pool: NewPool) -> BoxFuture<'_, StorageResult<PoolEntity>>;
    fn pool_by_token(&self, token: String) -> BoxFuture<'_, StorageResult<Option<PoolEntity>>>;
    /// Apply one column change, returning the stored row or `None` when the pool is gone.
    fn update_pool(
        &self,
        pool_id: i64,
        change: PoolChange,
    ) -> BoxFuture<'_, StorageResult<Option<PoolEntity>>>;
    /// Pools owned or joined by a user, newest first.
    fn pools_for_user(
        &self,
        user_id: i64,
        listing: PoolListing,
        offset: i64,
        limit: i64,
    ) -> BoxFuture<'_, StorageResult<Page<PoolEntity>>>;
    /// Replace the join password and bump the check id atomically, returning the new check id.
    fn change_join_password(
        &self,
        pool_id: i64,
        password_hash: String,
        reset_membership: bool,
    ) -> BoxFuture<'_, StorageResult<i32>>;
    fn membership(
        &self,
        pool_id: i64,
        user_id: i64,
    ) -> BoxFuture<'_, StorageResult<Option<Membership>>>;
    /// Insert a non-manager membership; existing rows are left untouched.
    fn join_pool(&self, pool_id: i64, user_id: i64) -> BoxFuture<'_, StorageResult<()>>;
    /// Remove the membership row, if any.
    fn leave_pool(&self, pool_id: i64, user_id: i64) -> BoxFuture<'_, StorageResult<()>>;
    fn active_invite(
        &self,
        pool_id: i64,
        check_id: i32,
        now: OffsetDateTime,
    ) -> BoxFuture<'_, StorageResult<Option<InviteEntity>>>;
    fn create_invite(&self, invite: InviteEntity) -> BoxFuture<'_, StorageResult<InviteEntity>>;
    fn invite_by_token(&self, token: String)
    -> BoxFuture<'_, StorageResult<Option<InviteEntity>>>;
    /// Tokens of pools with an active grid linked to the sports event.
    fn pool_tokens_for_event(&self, event_id: i64) -> BoxFuture<'_, StorageResult<Vec<String>>>;
}

/// Grids and the sports events they link to.
pub trait GridStore: Send + Sync {
    /// Active grids of a pool in display order.
    fn grids(&self, pool_id: i64) -> BoxFuture<'_, StorageResult<Vec<GridEntity>>>;
    fn grid(&self, pool_id: i64, grid_id: i64)
    -> BoxFuture<'_, StorageResult<Option<GridEntity>>>;
    /// Insert a new grid at the end of the pool, or update an existing one.
    fn save_grid(&self, grid: GridEntity) -> BoxFuture<'_, StorageResult<GridEntity>>;
    /// Persist drawn numbers; returns `false` when `require_undrawn` did not hold.
    fn record_draw(&self, draw: DrawRecord) -> BoxFuture<'_, StorageResult<bool>>;
    fn delete_grid(&self, pool_id: i64, grid_id: i64) -> BoxFuture<'_, StorageResult<GridDeletion>>;
    /// Assign ordinals following `grid_ids`; unknown ids are ignored.
    fn reorder_grids(&self, pool_id: i64, grid_ids: Vec<i64>) -> BoxFuture<'_, StorageResult<()>>;
    fn sports_event(&self, id: i64) -> BoxFuture<'_, StorageResult<Option<SportsEventEntity>>>;
    /// Events matching the query ordered by start time.
    fn sports_events(
        &self,
        query: SportsEventQuery,
    ) -> BoxFuture<'_, StorageResult<Page<SportsEventEntity>>>;
    /// Annotations of a grid ordered by square number.
    fn grid_annotations(
        &self,
        grid_id: i64,
    ) -> BoxFuture<'_, StorageResult<Vec<GridAnnotationEntity>>>;
    /// Upsert on `(grid_id, square_id)`; the flag is `true` when a row was inserted.
    fn save_annotation(
        &self,
        write: AnnotationWrite,
    ) -> BoxFuture<'_, StorageResult<(GridAnnotationEntity, bool)>>;
    fn delete_annotation(&self, grid_id: i64, square_id: i32) -> BoxFuture<'_, StorageResult<()>>;
}

/// Squares and their audit trail.
pub trait SquareStore: Send + Sync {
    /// Every square of a pool ordered by square number.
    fn squares(&self, pool_id: i64) -> BoxFuture<'_, StorageResult<Vec<SquareEntity>>>;
    fn square(
        &self,
        pool_id: i64,
        square_id: i32,
    ) -> BoxFuture<'_, StorageResult<Option<SquareEntity>>>;
    /// Log rows of a square, newest first.
    fn square_logs(
        &self,
        pool_id: i64,
        square_id: i32,
    ) -> BoxFuture<'_, StorageResult<Vec<SquareLogEntity>>>;
    /// Log rows across every square of a pool, newest first.
    fn pool_logs(
        &self,
        pool_id: i64,
        offset: i64,
        limit: i64,
    ) -> BoxFuture<'_, StorageResult<Page<SquareLogEntity>>>;
    /// Apply all writes in one transaction, rolling back when any guard fails.
    fn apply_square_writes(
        &self,
        batch: SquareWriteBatch,
    ) -> BoxFuture<'_, StorageResult<WriteOutcome>>;
}

/// Full persistence surface used by the services.
pub trait Store: UserStore + PoolStore + GridStore + SquareStore {
    fn health_check(&self) -> BoxFuture<'_, StorageResult<()>>;
}
