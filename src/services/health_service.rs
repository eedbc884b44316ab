use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Ping the store and report how many pools have live streams.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let streaming_pools = state.broker().pool_count();
    match state.store().health_check().await {
        Ok(()) => HealthResponse::ok(streaming_pools),
        Err(err) => {
            warn!(error = %err, "storage health check failed");
            HealthResponse::degraded(streaming_pools)
        }
    }
}
