use serde::Serialize;
use utoipa::ToSchema;

/// Health payload returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Pools with at least one live stream attached.
    pub streaming_pools: usize,
}

impl HealthResponse {
    /// The store answered its ping.
    pub fn ok(streaming_pools: usize) -> Self {
        Self {
            status: "ok".to_string(),
            streaming_pools,
        }
    }

    /// The store could not be reached.
    pub fn degraded(streaming_pools: usize) -> Self {
        Self {
            status: "degraded".to_string(),
            streaming_pools,
        }
    }
}
