use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::dto::pool::PoolResponse;

/// Freshly minted guest credential.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GuestResponse {
    pub jwt: String,
    /// Unix timestamp in seconds.
    pub expires_at: i64,
}

/// The authenticated caller. Keys stay snake_case for existing clients.
#[derive(Debug, Serialize, ToSchema)]
pub struct SelfResponse {
    pub id: i64,
    /// Subject of the credential within its store.
    pub store_id: String,
    /// `external` or `guest`.
    pub store: String,
}

/// Which pools of the user to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PoolMembershipFilter {
    /// Pools the user created.
    Own,
    /// Pools the user joined.
    Belong,
}

/// Paging for `GET /user/{id}/pool/{membership}`.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase", default)]
#[into_params(rename_all = "camelCase")]
pub struct UserPoolsQuery {
    pub offset: i64,
    /// Defaults to 10, at most 50.
    pub limit: Option<i64>,
    /// Only applies to owned pools.
    pub include_archived: bool,
}

/// Page of pools.
#[derive(Debug, Serialize, ToSchema)]
pub struct UserPoolsResponse {
    pub pools: Vec<PoolResponse>,
    pub total: i64,
}
