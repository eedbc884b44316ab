use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    dao::models::{GridAnnotationEntity, GridEntity, GridState},
    dto::validation::{validate_hex_color, validate_printable, validate_printable_multiline},
};

/// Command posted to a grid: `save`, `drawNumbers` or `drawManualNumbers`.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default)]
pub struct GridCommandRequest {
    pub action: String,
    /// Required by `save` and `drawManualNumbers`.
    pub data: Option<GridCommandData>,
}

/// Fields used by the grid commands. Each command reads its own subset.
#[derive(Debug, Default, Clone, Serialize, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct GridCommandData {
    /// RFC 3339 timestamp; empty clears it.
    pub event_date: String,
    #[validate(
        length(max = 500, message = "must be 500 characters or fewer"),
        custom(function = "validate_printable_multiline")
    )]
    pub notes: String,
    pub rollover: bool,
    #[validate(
        length(max = 50, message = "must be 50 characters or fewer"),
        custom(function = "validate_printable")
    )]
    pub label: String,
    #[validate(
        length(max = 75, message = "must be 75 characters or fewer"),
        custom(function = "validate_printable")
    )]
    pub home_team_name: String,
    #[validate(custom(function = "validate_hex_color"))]
    pub home_team_color1: Option<String>,
    #[validate(custom(function = "validate_hex_color"))]
    pub home_team_color2: Option<String>,
    #[validate(
        length(max = 75, message = "must be 75 characters or fewer"),
        custom(function = "validate_printable")
    )]
    pub away_team_name: String,
    #[validate(custom(function = "validate_hex_color"))]
    pub away_team_color1: Option<String>,
    #[validate(custom(function = "validate_hex_color"))]
    pub away_team_color2: Option<String>,
    /// Sports event to link; `null` unlinks.
    pub bdl_event_id: Option<i64>,
    /// `drawManualNumbers`: a permutation of the digits 0 to 9.
    pub home_team_numbers: Option<Vec<i32>>,
    pub away_team_numbers: Option<Vec<i32>>,
    /// Lock the pool after drawing. Defaults to `true`.
    pub lock_pool: Option<bool>,
}

/// Display settings of a grid.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GridSettingsResponse {
    pub home_team_color1: Option<String>,
    pub home_team_color2: Option<String>,
    pub away_team_color1: Option<String>,
    pub away_team_color2: Option<String>,
    pub notes: Option<String>,
}

/// Grid as returned to clients.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GridResponse {
    pub id: i64,
    /// Display position within the pool.
    pub ord: i32,
    pub label: Option<String>,
    pub home_team_name: Option<String>,
    pub home_numbers: Option<Vec<i32>>,
    pub away_team_name: Option<String>,
    pub away_numbers: Option<Vec<i32>>,
    /// Numbers were entered by a manager rather than drawn.
    pub manual_draw: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub event_date: Option<OffsetDateTime>,
    pub rollover: bool,
    pub state: GridState,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub created: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub modified: OffsetDateTime,
    pub settings: GridSettingsResponse,
    /// Linked sports event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bdl_event_id: Option<i64>,
    /// Present on the detail view, keyed by square number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<i32, GridAnnotationResponse>>,
}

impl From<GridEntity> for GridResponse {
    fn from(grid: GridEntity) -> Self {
        Self {
            id: grid.id,
            ord: grid.ord,
            label: grid.label,
            home_team_name: grid.home_team_name,
            home_numbers: grid.home_numbers,
            away_team_name: grid.away_team_name,
            away_numbers: grid.away_numbers,
            manual_draw: grid.manual_draw,
            event_date: grid.event_date,
            rollover: grid.rollover,
            state: grid.state,
            created: grid.created,
            modified: grid.modified,
            settings: GridSettingsResponse {
                home_team_color1: grid.colors.home_team_color1,
                home_team_color2: grid.colors.home_team_color2,
                away_team_color1: grid.colors.away_team_color1,
                away_team_color2: grid.colors.away_team_color2,
                notes: grid.notes,
            },
            bdl_event_id: grid.linked_event_id,
            annotations: None,
        }
    }
}

/// Active grids of a pool.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GridListResponse {
    pub grids: Vec<GridResponse>,
    pub total: usize,
    /// Grid limit per pool.
    pub max_allowed: usize,
}

/// Grid after a draw, with the resulting pool lock.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DrawResponse {
    #[serde(flatten)]
    pub grid: GridResponse,
    #[serde(with = "time::serde::rfc3339::option")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub pool_locks: Option<OffsetDateTime>,
}

/// Payload for `POST /pool/{token}/grid/{id}/square/{square_id}/annotation`.
#[derive(Debug, Default, Deserialize, ToSchema, Validate)]
#[serde(default)]
pub struct AnnotationRequest {
    #[validate(custom(function = "validate_printable"))]
    pub annotation: String,
    /// Index into `gridAnnotationIcons` of the pool configuration.
    pub icon: i16,
}

/// Annotation pinned to a grid square.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GridAnnotationResponse {
    pub id: i64,
    pub grid_id: i64,
    pub square_id: i32,
    pub annotation: String,
    pub icon: i16,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub created: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub modified: OffsetDateTime,
}

impl From<GridAnnotationEntity> for GridAnnotationResponse {
    fn from(annotation: GridAnnotationEntity) -> Self {
        Self {
            id: annotation.id,
            grid_id: annotation.grid_id,
            square_id: annotation.square_id,
            annotation: annotation.annotation,
            icon: annotation.icon,
            created: annotation.created,
            modified: annotation.modified,
        }
    }
}
