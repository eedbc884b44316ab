use std::collections::BTreeMap;

use axum::{
    Extension, Json, Router,
    extract::State,
    middleware,
    routing::{get, post},
};

use crate::{
    dto::square::{BulkSquaresRequest, BulkSquaresResponse, SquareCommandRequest, SquareResponse},
    error::AppError,
    routes::{
        extract::{ApiJson, ApiPath},
        middleware::{ClientAddr, require_pool_access, require_user},
    },
    services::{bulk_service, square_service},
    state::{SharedState, access::PoolAccess},
};

/// Square endpoints of a pool.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/pool/{token}/square", get(list_squares))
        .route(
            "/pool/{token}/square/{square_id}",
            get(square_detail).post(square_command),
        )
        .route("/pool/{token}/squares/bulk", post(bulk_update))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_pool_access,
        ))
        .route_layer(middleware::from_fn_with_state(state, require_user))
}

/// Every square of the pool.
#[utoipa::path(
    get,
    path = "/pool/{token}/square",
    tag = "square",
    params(("token" = String, Path, description = "Pool token")),
    responses((status = 200, description = "Squares keyed by square id", body = BTreeMap<i32, SquareResponse>))
)]
pub async fn list_squares(
    State(state): State<SharedState>,
    Extension(access): Extension<PoolAccess>,
) -> Result<Json<BTreeMap<i32, SquareResponse>>, AppError> {
    Ok(Json(square_service::list_squares(&state, &access).await?))
}

/// Square with its log; managers and site admins also get the claimant's user info.
#[utoipa::path(
    get,
    path = "/pool/{token}/square/{square_id}",
    tag = "square",
    params(
        ("token" = String, Path, description = "Pool token"),
        ("square_id" = i32, Path, description = "Square number")
    ),
    responses(
        (status = 200, description = "Square detail", body = SquareResponse),
        (status = 404, description = "Square not found")
    )
)]
pub async fn square_detail(
    State(state): State<SharedState>,
    Extension(access): Extension<PoolAccess>,
    ApiPath(path): ApiPath<(String, i32)>,
) -> Result<Json<SquareResponse>, AppError> {
    let (_, square_id) = path;
    Ok(Json(
        square_service::square_detail(&state, &access, square_id).await?,
    ))
}

/// Claim, unclaim, rename or change the state of a square.
#[utoipa::path(
    post,
    path = "/pool/{token}/square/{square_id}",
    tag = "square",
    params(
        ("token" = String, Path, description = "Pool token"),
        ("square_id" = i32, Path, description = "Square number")
    ),
    request_body = SquareCommandRequest,
    responses(
        (status = 200, description = "Updated square", body = SquareResponse),
        (status = 400, description = "Rejected transition"),
        (status = 403, description = "Pool locked or action reserved to managers")
    )
)]
pub async fn square_command(
    State(state): State<SharedState>,
    Extension(access): Extension<PoolAccess>,
    ApiPath(path): ApiPath<(String, i32)>,
    ClientAddr(remote_addr): ClientAddr,
    ApiJson(payload): ApiJson<SquareCommandRequest>,
) -> Result<Json<SquareResponse>, AppError> {
    let (_, square_id) = path;
    Ok(Json(
        square_service::command(&state, &access, square_id, payload, remote_addr).await?,
    ))
}

/// Apply one action to many squares, reporting a result per id.
#[utoipa::path(
    post,
    path = "/pool/{token}/squares/bulk",
    tag = "square",
    params(("token" = String, Path, description = "Pool token")),
    request_body = BulkSquaresRequest,
    responses(
        (status = 200, description = "Per-square results", body = BulkSquaresResponse),
        (status = 400, description = "Invalid request"),
        (status = 403, description = "Caller is not a pool manager")
    )
)]
pub async fn bulk_update(
    State(state): State<SharedState>,
    Extension(access): Extension<PoolAccess>,
    ClientAddr(remote_addr): ClientAddr,
    ApiJson(payload): ApiJson<BulkSquaresRequest>,
) -> Result<Json<BulkSquaresResponse>, AppError> {
    Ok(Json(
        bulk_service::bulk_update(&state, &access, payload, remote_addr).await?,
    ))
}
