use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use utoipa::ToSchema;

/// Raised when a persisted discriminant does not match any known variant.
#[derive(Debug, Error)]
#[error("unknown {kind} `{value}`")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_owned(),
        }
    }
}

/// Which credential issuer a user record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    /// Account managed by the external identity provider.
    External,
    /// Short-lived account minted by this service.
    Guest,
}

impl IdentityKind {
    /// Persisted discriminant.
    pub fn as_str(self) -> &'static str {
        match self {
            IdentityKind::External => "external",
            IdentityKind::Guest => "guest",
        }
    }
}

impl FromStr for IdentityKind {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "external" => Ok(IdentityKind::External),
            "guest" => Ok(IdentityKind::Guest),
            other => Err(UnknownVariant::new("identity kind", other)),
        }
    }
}

/// Persisted user row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntity {
    pub id: i64,
    pub kind: IdentityKind,
    /// Subject claim of the credential that created the user.
    pub subject: String,
    pub email: Option<String>,
    pub is_site_admin: bool,
    pub created: OffsetDateTime,
}

/// Board layout of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum GridType {
    Std100,
    Std50,
    Std25,
    Roll100,
}

impl GridType {
    /// Every supported layout in display order.
    pub const ALL: [GridType; 4] = [
        GridType::Std100,
        GridType::Std50,
        GridType::Std25,
        GridType::Roll100,
    ];

    /// Persisted discriminant.
    pub fn as_str(self) -> &'static str {
        match self {
            GridType::Std100 => "std100",
            GridType::Std50 => "std50",
            GridType::Std25 => "std25",
            GridType::Roll100 => "roll100",
        }
    }

    /// Human friendly description.
    pub fn description(self) -> &'static str {
        match self {
            GridType::Std100 => "Standard, 100 squares",
            GridType::Std50 => "Standard, 50 squares",
            GridType::Std25 => "Standard, 25 squares",
            GridType::Roll100 => "Rollover, 100 squares",
        }
    }

    /// Number of squares a pool of this type owns. Square ids run `1..=square_count`.
    pub fn square_count(self) -> i32 {
        match self {
            GridType::Std25 => 25,
            GridType::Std50 => 50,
            GridType::Std100 | GridType::Roll100 => 100,
        }
    }

    /// Only the rollover board links secondary squares to a primary.
    pub fn supports_secondary(self) -> bool {
        matches!(self, GridType::Roll100)
    }
}

impl fmt::Display for GridType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GridType {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        GridType::ALL
            .into_iter()
            .find(|candidate| candidate.as_str() == value)
            .ok_or_else(|| UnknownVariant::new("grid type", value))
    }
}

/// Lifecycle of a single square.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum SquareState {
    Unclaimed,
    Claimed,
    PaidPartial,
    PaidFull,
}

impl SquareState {
    /// Every valid state, in the order the UI lists them.
    pub const ALL: [SquareState; 4] = [
        SquareState::Claimed,
        SquareState::PaidPartial,
        SquareState::PaidFull,
        SquareState::Unclaimed,
    ];

    /// Persisted discriminant.
    pub fn as_str(self) -> &'static str {
        match self {
            SquareState::Unclaimed => "unclaimed",
            SquareState::Claimed => "claimed",
            SquareState::PaidPartial => "paid-partial",
            SquareState::PaidFull => "paid-full",
        }
    }
}

impl fmt::Display for SquareState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SquareState {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        SquareState::ALL
            .into_iter()
            .find(|candidate| candidate.as_str() == value)
            .ok_or_else(|| UnknownVariant::new("square state", value))
    }
}

/// How number sets are drawn for the games of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum NumberSetConfig {
    /// One set of numbers for the whole game.
    #[serde(rename = "standard")]
    Standard,
    /// A set for each of the first three quarters and one for the final score.
    #[serde(rename = "123f")]
    QuartersFinal,
    /// A set for the half and one for the final score.
    #[serde(rename = "hf")]
    HalfFinal,
}

impl NumberSetConfig {
    /// Every selectable configuration in display order.
    pub const ALL: [NumberSetConfig; 3] = [
        NumberSetConfig::Standard,
        NumberSetConfig::QuartersFinal,
        NumberSetConfig::HalfFinal,
    ];

    /// Persisted discriminant.
    pub fn as_str(self) -> &'static str {
        match self {
            NumberSetConfig::Standard => "standard",
            NumberSetConfig::QuartersFinal => "123f",
            NumberSetConfig::HalfFinal => "hf",
        }
    }

    /// Label shown in pool forms.
    pub fn label(self) -> &'static str {
        match self {
            NumberSetConfig::Standard => "Same",
            NumberSetConfig::QuartersFinal => "1st, 2nd, 3rd, Final",
            NumberSetConfig::HalfFinal => "Half, Final",
        }
    }

    /// Periods that get their own set of numbers.
    pub fn set_types(self) -> &'static [&'static str] {
        match self {
            NumberSetConfig::Standard => &["all"],
            NumberSetConfig::QuartersFinal => &["q1", "q2", "q3", "final"],
            NumberSetConfig::HalfFinal => &["half", "final"],
        }
    }

    /// College basketball is played in halves, so quarter sets cannot be scored.
    pub fn supports_league(self, league: SportsLeague) -> bool {
        !(self == NumberSetConfig::QuartersFinal && league == SportsLeague::Ncaab)
    }
}

impl fmt::Display for NumberSetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NumberSetConfig {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        NumberSetConfig::ALL
            .into_iter()
            .find(|candidate| candidate.as_str() == value)
            .ok_or_else(|| UnknownVariant::new("number set config", value))
    }
}

/// Persisted pool row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEntity {
    pub id: i64,
    /// Opaque URL-safe identifier used in every route.
    pub token: String,
    /// Owning user; implicitly a manager.
    pub user_id: i64,
    pub name: String,
    pub grid_type: GridType,
    pub password_hash: Option<String>,
    pub password_required: bool,
    pub open_access_on_lock: bool,
    /// Absent or in the future means unlocked.
    pub locks: Option<OffsetDateTime>,
    pub check_id: i32,
    pub archived: bool,
    pub number_set_config: NumberSetConfig,
    pub created: OffsetDateTime,
    pub modified: OffsetDateTime,
}

impl PoolEntity {
    /// Whether the lock timestamp has passed.
    pub fn is_locked_at(&self, now: OffsetDateTime) -> bool {
        self.locks.is_some_and(|locks| locks <= now)
    }

    /// Whether the pool currently lets anyone in without a password.
    pub fn is_open_at(&self, now: OffsetDateTime) -> bool {
        !self.password_required || (self.is_locked_at(now) && self.open_access_on_lock)
    }
}

/// Fields required to create a pool.
#[derive(Debug, Clone)]
pub struct NewPool {
    pub token: String,
    pub user_id: i64,
    pub name: String,
    pub grid_type: GridType,
    pub password_hash: String,
    pub number_set_config: NumberSetConfig,
}

/// Explicit membership row of a user in a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Membership {
    pub is_manager: bool,
}

/// Stored invite token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteEntity {
    pub token: String,
    pub pool_id: i64,
    /// Pool check id at issue time.
    pub check_id: i32,
    pub expires: OffsetDateTime,
}

impl InviteEntity {
    /// An invite only admits while the pool check id is unchanged and it has not expired.
    pub fn admits(&self, pool: &PoolEntity, now: OffsetDateTime) -> bool {
        self.pool_id == pool.id && self.check_id == pool.check_id && self.expires > now
    }
}

/// Grid soft-delete marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum GridState {
    Active,
    Deleted,
}

impl GridState {
    /// Persisted discriminant.
    pub fn as_str(self) -> &'static str {
        match self {
            GridState::Active => "active",
            GridState::Deleted => "deleted",
        }
    }
}

impl FromStr for GridState {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(GridState::Active),
            "deleted" => Ok(GridState::Deleted),
            other => Err(UnknownVariant::new("grid state", other)),
        }
    }
}

/// Team colors shown on a grid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GridColors {
    pub home_team_color1: Option<String>,
    pub home_team_color2: Option<String>,
    pub away_team_color1: Option<String>,
    pub away_team_color2: Option<String>,
}

/// Persisted grid row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridEntity {
    pub id: i64,
    pub pool_id: i64,
    pub ord: i32,
    pub label: Option<String>,
    pub home_team_name: Option<String>,
    pub away_team_name: Option<String>,
    pub home_numbers: Option<Vec<i32>>,
    pub away_numbers: Option<Vec<i32>>,
    pub manual_draw: bool,
    pub event_date: Option<OffsetDateTime>,
    pub rollover: bool,
    pub state: GridState,
    pub linked_event_id: Option<i64>,
    pub notes: Option<String>,
    pub colors: GridColors,
    pub created: OffsetDateTime,
    pub modified: OffsetDateTime,
}

impl GridEntity {
    /// Blank grid appended to a pool. The id is assigned on insert.
    pub fn draft(pool_id: i64, now: OffsetDateTime) -> Self {
        Self {
            id: 0,
            pool_id,
            ord: 0,
            label: None,
            home_team_name: None,
            away_team_name: None,
            home_numbers: None,
            away_numbers: None,
            manual_draw: false,
            event_date: None,
            rollover: false,
            state: GridState::Active,
            linked_event_id: None,
            notes: None,
            colors: GridColors::default(),
            created: now,
            modified: now,
        }
    }

    /// Whether numbers have already been drawn for this grid.
    pub fn numbers_drawn(&self) -> bool {
        self.home_numbers.is_some() || self.away_numbers.is_some()
    }
}

/// Status of a linked sports event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SportsEventStatus {
    Scheduled,
    InProgress,
    Final,
}

impl SportsEventStatus {
    /// Persisted discriminant.
    pub fn as_str(self) -> &'static str {
        match self {
            SportsEventStatus::Scheduled => "scheduled",
            SportsEventStatus::InProgress => "in_progress",
            SportsEventStatus::Final => "final",
        }
    }
}

impl FromStr for SportsEventStatus {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "scheduled" => Ok(SportsEventStatus::Scheduled),
            "in_progress" => Ok(SportsEventStatus::InProgress),
            "final" => Ok(SportsEventStatus::Final),
            other => Err(UnknownVariant::new("sports event status", other)),
        }
    }
}

/// League a sports event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SportsLeague {
    Nfl,
    Nba,
    Wnba,
    Ncaab,
    Ncaaf,
}

impl SportsLeague {
    /// Every supported league.
    pub const ALL: [SportsLeague; 5] = [
        SportsLeague::Nfl,
        SportsLeague::Nba,
        SportsLeague::Wnba,
        SportsLeague::Ncaab,
        SportsLeague::Ncaaf,
    ];

    /// Persisted discriminant.
    pub fn as_str(self) -> &'static str {
        match self {
            SportsLeague::Nfl => "nfl",
            SportsLeague::Nba => "nba",
            SportsLeague::Wnba => "wnba",
            SportsLeague::Ncaab => "ncaab",
            SportsLeague::Ncaaf => "ncaaf",
        }
    }

    /// Display label.
    pub fn label(self) -> &'static str {
        match self {
            SportsLeague::Nfl => "NFL",
            SportsLeague::Nba => "NBA",
            SportsLeague::Wnba => "WNBA",
            SportsLeague::Ncaab => "NCAAB",
            SportsLeague::Ncaaf => "NCAAF",
        }
    }
}

impl fmt::Display for SportsLeague {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SportsLeague {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        SportsLeague::ALL
            .into_iter()
            .find(|candidate| candidate.as_str() == value)
            .ok_or_else(|| UnknownVariant::new("league", value))
    }
}

/// Cached sports event a grid may be linked to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SportsEventEntity {
    pub id: i64,
    pub league: SportsLeague,
    pub status: SportsEventStatus,
    /// Display name, e.g. a bowl or playoff round.
    pub name: Option<String>,
    pub event_date: OffsetDateTime,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub home_team_name: Option<String>,
    pub away_team_name: Option<String>,
    /// Hex colors without the leading `#`.
    pub home_team_color: Option<String>,
    pub home_team_alt_color: Option<String>,
    pub away_team_color: Option<String>,
    pub away_team_alt_color: Option<String>,
}

/// Icon names clients render for annotations, indexed by the stored icon number.
pub const ANNOTATION_ICONS: [&str; 10] = [
    "trophy",
    "dollar-sign",
    "money-bill",
    "exclamation-circle",
    "dice",
    "arrow-alt-circle-right",
    "football-ball",
    "bookmark",
    "award",
    "bomb",
];

/// Icon name for a stored icon number.
pub fn annotation_icon(icon: i16) -> Option<&'static str> {
    usize::try_from(icon)
        .ok()
        .and_then(|index| ANNOTATION_ICONS.get(index).copied())
}

/// Note pinned to a square of one grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridAnnotationEntity {
    pub id: i64,
    pub grid_id: i64,
    pub square_id: i32,
    pub annotation: String,
    /// Index into the annotation icon table.
    pub icon: i16,
    pub created: OffsetDateTime,
    pub modified: OffsetDateTime,
}

/// Persisted square row with its linkage materialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SquareEntity {
    pub id: i64,
    pub pool_id: i64,
    /// Pool-wide square number.
    pub square_id: i32,
    /// Primary square number when this square is a secondary.
    pub parent_square_id: Option<i32>,
    /// Secondary square numbers linked to this primary.
    pub child_square_ids: Vec<i32>,
    pub user_id: Option<i64>,
    pub state: SquareState,
    pub claimant: Option<String>,
    pub modified: OffsetDateTime,
}

impl SquareEntity {
    /// Whether this square is slaved to a primary.
    pub fn is_secondary(&self) -> bool {
        self.parent_square_id.is_some()
    }
}

/// Audit row written alongside every square mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SquareLogEntity {
    pub id: i64,
    pub square_id: i32,
    pub user_id: Option<i64>,
    pub state: SquareState,
    pub claimant: Option<String>,
    pub remote_addr: Option<String>,
    pub note: String,
    pub created: OffsetDateTime,
}
