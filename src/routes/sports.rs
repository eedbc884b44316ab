use axum::{Json, Router, extract::State, routing::get};

use crate::{
    dto::sports::{SportsEventResponse, SportsEventsQuery, SportsEventsResponse, SportsLeagueInfo},
    error::AppError,
    routes::extract::{ApiPath, ApiQuery},
    services::sports_service,
    state::SharedState,
};

/// Public sports catalogue used when linking grids to events.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/sports/leagues", get(leagues))
        .route("/sports/events", get(events))
        .route("/sports/events/{id}", get(event))
}

/// League keys with their labels.
#[utoipa::path(
    get,
    path = "/sports/leagues",
    tag = "sports",
    responses((status = 200, description = "Supported leagues", body = [SportsLeagueInfo]))
)]
pub async fn leagues() -> Json<Vec<SportsLeagueInfo>> {
    Json(sports_service::leagues())
}

/// Events of a league, optionally filtered by status and a name fragment.
#[utoipa::path(
    get,
    path = "/sports/events",
    tag = "sports",
    params(SportsEventsQuery),
    responses(
        (status = 200, description = "Event page", body = SportsEventsResponse),
        (status = 400, description = "Missing or invalid league or status")
    )
)]
pub async fn events(
    State(state): State<SharedState>,
    ApiQuery(query): ApiQuery<SportsEventsQuery>,
) -> Result<Json<SportsEventsResponse>, AppError> {
    Ok(Json(sports_service::events(&state, query).await?))
}

#[utoipa::path(
    get,
    path = "/sports/events/{id}",
    tag = "sports",
    params(("id" = i64, Path, description = "Event id")),
    responses(
        (status = 200, description = "Sports event", body = SportsEventResponse),
        (status = 404, description = "Unknown event")
    )
)]
pub async fn event(
    State(state): State<SharedState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<SportsEventResponse>, AppError> {
    Ok(Json(sports_service::event(&state, id).await?))
}
