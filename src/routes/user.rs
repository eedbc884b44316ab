use axum::{
    Extension, Json, Router,
    extract::State,
    http::StatusCode,
    middleware,
    routing::{get, post},
};

use crate::{
    dao::models::UserEntity,
    dto::user::{
        GuestResponse, PoolMembershipFilter, SelfResponse, UserPoolsQuery, UserPoolsResponse,
    },
    error::AppError,
    routes::{
        extract::{ApiPath, ApiQuery},
        middleware::{ClientAddr, require_user},
    },
    services::user_service,
    state::SharedState,
};

/// User endpoints. Guest minting is open; everything else needs a credential.
pub fn router(state: SharedState) -> Router<SharedState> {
    // One route: the membership filter and the pool token share the same segment.
    let user_routes = Router::new()
        .route("/user/self", get(self_info))
        .route("/user/{id}/pool/{key}", get(user_pools).delete(leave_pool))
        .route_layer(middleware::from_fn_with_state(state, require_user));

    Router::new()
        .route("/user/guest", post(create_guest))
        .merge(user_routes)
}

/// Mint a guest account. No credential required.
#[utoipa::path(
    post,
    path = "/user/guest",
    tag = "user",
    responses((status = 201, description = "Guest credential", body = GuestResponse))
)]
pub async fn create_guest(
    State(state): State<SharedState>,
    ClientAddr(remote_addr): ClientAddr,
) -> Result<(StatusCode, Json<GuestResponse>), AppError> {
    let guest = user_service::mint_guest(&state, remote_addr).await?;
    Ok((StatusCode::CREATED, Json(guest)))
}

/// Id and credential store of the caller.
#[utoipa::path(
    get,
    path = "/user/self",
    tag = "user",
    responses(
        (status = 200, description = "Authenticated user", body = SelfResponse),
        (status = 401, description = "Missing or invalid credential")
    )
)]
pub async fn self_info(Extension(user): Extension<UserEntity>) -> Json<SelfResponse> {
    Json(user_service::self_info(&user))
}

/// Pools the caller owns (`own`) or joined (`belong`), newest first.
#[utoipa::path(
    get,
    path = "/user/{id}/pool/{membership}",
    tag = "user",
    params(
        ("id" = i64, Path, description = "Caller's user id"),
        ("membership" = PoolMembershipFilter, Path, description = "own or belong"),
        UserPoolsQuery
    ),
    responses(
        (status = 200, description = "Pool page", body = UserPoolsResponse),
        (status = 400, description = "Limit out of range"),
        (status = 403, description = "Not the caller's id")
    )
)]
pub async fn user_pools(
    State(state): State<SharedState>,
    Extension(user): Extension<UserEntity>,
    ApiPath(path): ApiPath<(i64, PoolMembershipFilter)>,
    ApiQuery(query): ApiQuery<UserPoolsQuery>,
) -> Result<Json<UserPoolsResponse>, AppError> {
    let (user_id, membership) = path;
    Ok(Json(
        user_service::user_pools(&state, &user, user_id, membership, query).await?,
    ))
}

/// Leave a pool.
#[utoipa::path(
    delete,
    path = "/user/{id}/pool/{token}",
    tag = "user",
    params(
        ("id" = i64, Path, description = "Caller's user id"),
        ("token" = String, Path, description = "Pool token")
    ),
    responses(
        (status = 204, description = "Membership removed"),
        (status = 403, description = "Not the caller's id"),
        (status = 404, description = "Pool not found")
    )
)]
pub async fn leave_pool(
    State(state): State<SharedState>,
    Extension(user): Extension<UserEntity>,
    ApiPath(path): ApiPath<(i64, String)>,
) -> Result<StatusCode, AppError> {
    let (user_id, token) = path;
    user_service::leave_pool(&state, &user, user_id, &token).await?;
    Ok(StatusCode::NO_CONTENT)
}
