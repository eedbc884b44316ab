use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::{
    dao::models::{GridType, NumberSetConfig, PoolEntity, SquareState},
    dto::{
        square::{SquareLogResponse, SquareResponse},
        validation::validate_printable,
    },
    state::access::PoolAccess,
};

/// Payload for `POST /pool`.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePoolRequest {
    #[validate(
        length(min = 1, max = 50, message = "must be between 1 and 50 characters"),
        custom(function = "validate_printable")
    )]
    pub name: String,
    /// One of `std100`, `std50`, `std25`, `roll100`.
    pub grid_type: String,
    #[validate(length(min = 6, message = "password must be at least 6 characters"))]
    pub join_password: String,
    /// One of `standard`, `123f`, `hf`; defaults to `standard`.
    #[serde(default)]
    pub number_set_config: Option<String>,
}

/// Pool as returned to clients.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolResponse {
    pub token: String,
    pub name: String,
    pub grid_type: GridType,
    pub archived: bool,
    pub password_required: bool,
    /// Let anyone with the link join once the pool is locked.
    pub open_access_on_lock: bool,
    pub number_set_config: NumberSetConfig,
    /// Instant after which only managers may change squares.
    #[serde(with = "time::serde::rfc3339::option")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub locks: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub created: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub modified: OffsetDateTime,
}

impl From<&PoolEntity> for PoolResponse {
    fn from(pool: &PoolEntity) -> Self {
        Self {
            token: pool.token.clone(),
            name: pool.name.clone(),
            grid_type: pool.grid_type,
            archived: pool.archived,
            password_required: pool.password_required,
            open_access_on_lock: pool.open_access_on_lock,
            number_set_config: pool.number_set_config,
            locks: pool.locks,
            created: pool.created,
            modified: pool.modified,
        }
    }
}

/// Pool plus the caller's role flags.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolDetailResponse {
    #[serde(flatten)]
    pub pool: PoolResponse,
    /// Same as `isPoolManager`; kept for older clients.
    pub is_admin: bool,
    pub is_pool_manager: bool,
    /// Pool managers and site admins see claimant user details.
    pub has_manager_visibility: bool,
    pub is_site_admin: bool,
    /// Managers only: whether no grid has drawn numbers yet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub can_change_number_set_config: Option<bool>,
}

impl From<&PoolAccess> for PoolDetailResponse {
    fn from(access: &PoolAccess) -> Self {
        Self {
            pool: PoolResponse::from(&access.pool),
            is_admin: access.is_pool_manager(),
            is_pool_manager: access.is_pool_manager(),
            has_manager_visibility: access.has_manager_visibility(),
            is_site_admin: access.is_site_admin(),
            can_change_number_set_config: None,
        }
    }
}

/// Manager action on a pool. Only the fields relevant to `action` are read.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolActionRequest {
    /// `lock`, `unlock`, `passwordRequired`, `accessOnLock`, `archive`, `unarchive`,
    /// `reorderGrids`, `rename`, `changeNumberSetConfig` or `changeJoinPassword`.
    pub action: String,
    /// `reorderGrids`: grid ids in their new order.
    pub ids: Vec<i64>,
    /// `rename`.
    pub name: String,
    /// `changeJoinPassword`.
    pub password: String,
    /// `changeJoinPassword`: drop every membership except the owner's.
    pub reset_membership: bool,
    /// `passwordRequired`.
    pub password_required: bool,
    /// `accessOnLock`.
    pub open_access_on_lock: bool,
    /// `changeNumberSetConfig`.
    pub number_set_config: String,
}

/// Invite material for a pool.
#[derive(Debug, Serialize, ToSchema)]
pub struct InviteTokenResponse {
    /// Stored invite token.
    pub token: String,
    /// Signed invite JWT bound to the current check id.
    pub jwt: String,
}

/// Payload for `POST /pool/{token}/member`.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default)]
pub struct JoinPoolRequest {
    /// Join password, checked first.
    pub password: Option<String>,
    /// Stored invite token.
    pub invite: Option<String>,
    /// Signed invite JWT.
    pub jwt: Option<String>,
}

/// Selectable grid layout.
#[derive(Debug, Serialize, ToSchema)]
pub struct GridTypeInfo {
    pub key: GridType,
    pub description: String,
}

/// Selectable number set configuration.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NumberSetConfigInfo {
    pub key: NumberSetConfig,
    pub label: String,
    /// Periods that get their own numbers.
    pub set_types: Vec<String>,
}

/// Annotation icon entry.
#[derive(Debug, Serialize, ToSchema)]
pub struct AnnotationIconInfo {
    pub name: String,
}

/// Static limits and enumerations used by clients.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationResponse {
    pub claimant_max_length: usize,
    pub name_max_length: usize,
    pub notes_max_length: usize,
    pub team_name_max_length: usize,
    pub pool_square_states: Vec<SquareState>,
    pub grid_types: Vec<GridTypeInfo>,
    pub number_set_configs: Vec<NumberSetConfigInfo>,
    pub min_join_password_length: usize,
    /// Icons keyed by the number stored on an annotation.
    pub grid_annotation_icons: BTreeMap<i16, AnnotationIconInfo>,
}

/// Read-only view of a pool's squares.
#[derive(Debug, Serialize, ToSchema)]
pub struct PublicSquaresResponse {
    pub pool: PoolResponse,
    pub squares: BTreeMap<i32, SquareResponse>,
}

/// Paging for `GET /pool/{token}/log`.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(default)]
#[into_params(parameter_in = Query)]
pub struct PoolLogQuery {
    pub offset: i64,
    /// Defaults to 100, at most 100.
    pub limit: Option<i64>,
}

/// Page of square log rows across the pool, newest first.
#[derive(Debug, Serialize, ToSchema)]
pub struct PoolLogResponse {
    pub logs: Vec<SquareLogResponse>,
    /// Log rows in the pool, ignoring paging.
    pub total: i64,
}
