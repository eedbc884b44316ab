use axum::{
    Router,
    extract::State,
    http::{HeaderName, header},
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::{
    error::AppError,
    routes::extract::{ApiPath, ApiQuery},
    services::sse_service,
    state::SharedState,
};

const ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// Query parameters accepted by the pool stream.
#[derive(Debug, Deserialize, IntoParams)]
pub struct StreamQuery {
    /// Bearer credential; browsers cannot set headers on `EventSource`.
    pub access_token: Option<String>,
}

#[utoipa::path(
    get,
    path = "/pool/{token}/events",
    tag = "sse",
    params(("token" = String, Path, description = "Pool token"), StreamQuery),
    responses(
        (status = 200, description = "Pool change stream", content_type = "text/event-stream", body = String),
        (status = 401, description = "Missing or invalid access token"),
        (status = 403, description = "Not a member of the pool")
    )
)]
/// Stream `square_updated`, `grid_updated` and `pool_updated` events for a pool.
pub async fn pool_stream(
    State(state): State<SharedState>,
    ApiPath(token): ApiPath<String>,
    ApiQuery(query): ApiQuery<StreamQuery>,
) -> Result<impl IntoResponse, AppError> {
    let subscription =
        sse_service::subscribe(&state, query.access_token.as_deref(), &token).await?;
    let stream = sse_service::to_sse_stream(subscription, state.shutdown_watcher());
    Ok((
        [(header::CONNECTION, "keep-alive"), (ACCEL_BUFFERING, "no")],
        stream,
    ))
}

/// Long-lived stream routes. Kept out of the request timeout.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/pool/{token}/events", get(pool_stream))
}
