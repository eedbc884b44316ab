//! Raw row shapes and their conversion into domain entities.

use sqlx::FromRow;
use time::OffsetDateTime;

use crate::dao::{
    models::{
        GridAnnotationEntity, GridColors, GridEntity, InviteEntity, PoolEntity,
        SportsEventEntity, SquareEntity, SquareLogEntity, UserEntity,
    },
    storage::StorageError,
};

pub(super) const USER_COLUMNS: &str = "id, store, store_id, email, is_site_admin, created";

pub(super) const POOL_COLUMNS: &str = "id, token, user_id, name, grid_type, password_hash, \
    password_required, open_access_on_lock, locks, check_id, archived, number_set_config, \
    created, modified";

pub(super) const GRID_COLUMNS: &str = "id, pool_id, ord, label, home_team_name, away_team_name, \
    home_numbers, away_numbers, manual_draw, event_date, rollover, state, linked_event_id, notes, \
    home_team_color1, home_team_color2, away_team_color1, away_team_color2, created, modified";

pub(super) const SPORTS_EVENT_COLUMNS: &str = "id, league, status, name, event_date, home_score, \
    away_score, home_team_name, away_team_name, home_team_color, home_team_alt_color, \
    away_team_color, away_team_alt_color";

pub(super) const ANNOTATION_COLUMNS: &str =
    "id, grid_id, square_id, annotation, icon, created, modified";

#[derive(FromRow)]
pub(super) struct UserRow {
    id: i64,
    store: String,
    store_id: String,
    email: Option<String>,
    is_site_admin: bool,
    created: OffsetDateTime,
}

impl TryFrom<UserRow> for UserEntity {
    type Error = StorageError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            kind: row
                .store
                .parse()
                .map_err(|err| StorageError::corrupt("users.store", err))?,
            subject: row.store_id,
            email: row.email,
            is_site_admin: row.is_site_admin,
            created: row.created,
        })
    }
}

#[derive(FromRow)]
pub(super) struct PoolRow {
    id: i64,
    token: String,
    user_id: i64,
    name: String,
    grid_type: String,
    password_hash: Option<String>,
    password_required: bool,
    open_access_on_lock: bool,
    locks: Option<OffsetDateTime>,
    check_id: i32,
    archived: bool,
    number_set_config: String,
    created: OffsetDateTime,
    modified: OffsetDateTime,
}

impl TryFrom<PoolRow> for PoolEntity {
    type Error = StorageError;

    fn try_from(row: PoolRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            token: row.token,
            user_id: row.user_id,
            name: row.name,
            grid_type: row
                .grid_type
                .parse()
                .map_err(|err| StorageError::corrupt("pools.grid_type", err))?,
            password_hash: row.password_hash,
            password_required: row.password_required,
            open_access_on_lock: row.open_access_on_lock,
            locks: row.locks,
            check_id: row.check_id,
            archived: row.archived,
            number_set_config: row
                .number_set_config
                .parse()
                .map_err(|err| StorageError::corrupt("pools.number_set_config", err))?,
            created: row.created,
            modified: row.modified,
        })
    }
}

#[derive(FromRow)]
pub(super) struct InviteRow {
    token: String,
    pool_id: i64,
    check_id: i32,
    expires: OffsetDateTime,
}

impl From<InviteRow> for InviteEntity {
    fn from(row: InviteRow) -> Self {
        Self {
            token: row.token,
            pool_id: row.pool_id,
            check_id: row.check_id,
            expires: row.expires,
        }
    }
}

#[derive(FromRow)]
pub(super) struct GridRow {
    id: i64,
    pool_id: i64,
    ord: i32,
    label: Option<String>,
    home_team_name: Option<String>,
    away_team_name: Option<String>,
    home_numbers: Option<Vec<i32>>,
    away_numbers: Option<Vec<i32>>,
    manual_draw: bool,
    event_date: Option<OffsetDateTime>,
    rollover: bool,
    state: String,
    linked_event_id: Option<i64>,
    notes: Option<String>,
    home_team_color1: Option<String>,
    home_team_color2: Option<String>,
    away_team_color1: Option<String>,
    away_team_color2: Option<String>,
    created: OffsetDateTime,
    modified: OffsetDateTime,
}

impl TryFrom<GridRow> for GridEntity {
    type Error = StorageError;

    fn try_from(row: GridRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            pool_id: row.pool_id,
            ord: row.ord,
            label: row.label,
            home_team_name: row.home_team_name,
            away_team_name: row.away_team_name,
            home_numbers: row.home_numbers,
            away_numbers: row.away_numbers,
            manual_draw: row.manual_draw,
            event_date: row.event_date,
            rollover: row.rollover,
            state: row
                .state
                .parse()
                .map_err(|err| StorageError::corrupt("grids.state", err))?,
            linked_event_id: row.linked_event_id,
            notes: row.notes,
            colors: GridColors {
                home_team_color1: row.home_team_color1,
                home_team_color2: row.home_team_color2,
                away_team_color1: row.away_team_color1,
                away_team_color2: row.away_team_color2,
            },
            created: row.created,
            modified: row.modified,
        })
    }
}

#[derive(FromRow)]
pub(super) struct SportsEventRow {
    id: i64,
    league: String,
    status: String,
    name: Option<String>,
    event_date: OffsetDateTime,
    home_score: Option<i32>,
    away_score: Option<i32>,
    home_team_name: Option<String>,
    away_team_name: Option<String>,
    home_team_color: Option<String>,
    home_team_alt_color: Option<String>,
    away_team_color: Option<String>,
    away_team_alt_color: Option<String>,
}

impl TryFrom<SportsEventRow> for SportsEventEntity {
    type Error = StorageError;

    fn try_from(row: SportsEventRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            league: row
                .league
                .parse()
                .map_err(|err| StorageError::corrupt("sports_events.league", err))?,
            status: row
                .status
                .parse()
                .map_err(|err| StorageError::corrupt("sports_events.status", err))?,
            name: row.name,
            event_date: row.event_date,
            home_score: row.home_score,
            away_score: row.away_score,
            home_team_name: row.home_team_name,
            away_team_name: row.away_team_name,
            home_team_color: row.home_team_color,
            home_team_alt_color: row.home_team_alt_color,
            away_team_color: row.away_team_color,
            away_team_alt_color: row.away_team_alt_color,
        })
    }
}

#[derive(FromRow)]
pub(super) struct AnnotationRow {
    id: i64,
    grid_id: i64,
    square_id: i32,
    annotation: String,
    icon: i16,
    created: OffsetDateTime,
    modified: OffsetDateTime,
}

/// Upsert result carrying whether the row was inserted.
#[derive(FromRow)]
pub(super) struct SavedAnnotationRow {
    #[sqlx(flatten)]
    pub(super) row: AnnotationRow,
    pub(super) inserted: bool,
}

impl From<AnnotationRow> for GridAnnotationEntity {
    fn from(row: AnnotationRow) -> Self {
        Self {
            id: row.id,
            grid_id: row.grid_id,
            square_id: row.square_id,
            annotation: row.annotation,
            icon: row.icon,
            created: row.created,
            modified: row.modified,
        }
    }
}

#[derive(FromRow)]
pub(super) struct SquareRow {
    id: i64,
    pool_id: i64,
    square_id: i32,
    parent_square_id: Option<i32>,
    child_square_ids: Option<Vec<i32>>,
    user_id: Option<i64>,
    state: String,
    claimant: Option<String>,
    modified: OffsetDateTime,
}

impl TryFrom<SquareRow> for SquareEntity {
    type Error = StorageError;

    fn try_from(row: SquareRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            pool_id: row.pool_id,
            square_id: row.square_id,
            parent_square_id: row.parent_square_id,
            child_square_ids: row.child_square_ids.unwrap_or_default(),
            user_id: row.user_id,
            state: row
                .state
                .parse()
                .map_err(|err| StorageError::corrupt("pool_squares.state", err))?,
            claimant: row.claimant,
            modified: row.modified,
        })
    }
}

#[derive(FromRow)]
pub(super) struct SquareLogRow {
    id: i64,
    square_id: i32,
    user_id: Option<i64>,
    state: String,
    claimant: Option<String>,
    remote_addr: Option<String>,
    note: String,
    created: OffsetDateTime,
}

impl TryFrom<SquareLogRow> for SquareLogEntity {
    type Error = StorageError;

    fn try_from(row: SquareLogRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            square_id: row.square_id,
            user_id: row.user_id,
            state: row
                .state
                .parse()
                .map_err(|err| StorageError::corrupt("pool_squares_logs.state", err))?,
            claimant: row.claimant,
            remote_addr: row.remote_addr,
            note: row.note,
            created: row.created,
        })
    }
}

/// Convert every row, failing on the first malformed one.
pub(super) fn convert_all<R, E>(rows: Vec<R>) -> Result<Vec<E>, StorageError>
where
    E: TryFrom<R, Error = StorageError>,
{
    rows.into_iter().map(E::try_from).collect()
}
