use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::dao::models::{SquareEntity, SquareLogEntity, SquareState};

/// Command posted to a single square.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct SquareCommandRequest {
    /// Name to claim under, or the new name when `rename` is set.
    pub claimant: String,
    /// Manager state change.
    pub state: Option<SquareState>,
    /// Recorded on the log row of a manager change.
    pub note: String,
    pub unclaim: bool,
    pub rename: bool,
    /// `0` or absent means no secondary square.
    pub secondary_square_id: Option<i32>,
}

/// Audit entry of a square.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SquareLogResponse {
    pub square_id: i32,
    pub state: SquareState,
    pub claimant: String,
    pub note: String,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub created: OffsetDateTime,
}

impl From<SquareLogEntity> for SquareLogResponse {
    fn from(log: SquareLogEntity) -> Self {
        Self {
            square_id: log.square_id,
            state: log.state,
            claimant: log.claimant.unwrap_or_default(),
            note: log.note,
            created: log.created,
        }
    }
}

/// Account details of a claimant, visible to pool managers.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    /// `registered` or `guest`.
    pub user_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Square as returned to clients.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SquareResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    pub square_id: i32,
    /// Primary square of a `roll100` secondary.
    pub parent_square_id: Option<i32>,
    /// Secondary squares claimed with this one.
    pub child_square_ids: Vec<i32>,
    pub state: SquareState,
    pub claimant: String,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub modified: OffsetDateTime,
    /// Detail view only, newest first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<SquareLogResponse>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_info: Option<UserInfo>,
}

impl SquareResponse {
    /// Square without the owning user id.
    pub fn public(square: SquareEntity) -> Self {
        Self {
            user_id: None,
            ..Self::from(square)
        }
    }
}

impl From<SquareEntity> for SquareResponse {
    fn from(square: SquareEntity) -> Self {
        Self {
            user_id: square.user_id,
            square_id: square.square_id,
            parent_square_id: square.parent_square_id,
            child_square_ids: square.child_square_ids,
            state: square.state,
            claimant: square.claimant.unwrap_or_default(),
            modified: square.modified,
            logs: None,
            user_info: None,
        }
    }
}

/// Bulk admin operation over several squares.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct BulkSquaresRequest {
    pub square_ids: Vec<i64>,
    /// `claim`, `unclaim` or `set_state`.
    pub action: String,
    pub claimant: String,
    pub state: Option<SquareState>,
    pub note: String,
}

/// Outcome for one square of a bulk request. `error` is set when that square failed.
#[derive(Debug, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BulkSquareResult {
    pub square_id: i64,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-square results in request order.
#[derive(Debug, Serialize, ToSchema)]
pub struct BulkSquaresResponse {
    pub results: Vec<BulkSquareResult>,
}
