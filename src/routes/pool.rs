use axum::{
    Extension, Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    middleware,
    routing::{get, post},
};

use crate::{
    dao::models::UserEntity,
    dto::pool::{
        ConfigurationResponse, CreatePoolRequest, InviteTokenResponse, JoinPoolRequest,
        PoolActionRequest, PoolDetailResponse, PoolLogQuery, PoolLogResponse, PoolResponse,
        PublicSquaresResponse,
    },
    error::AppError,
    routes::{
        extract::{ApiJson, ApiPath, ApiQuery},
        middleware::{require_pool_access, require_user},
    },
    services::{access_service, pool_service},
    state::{SharedState, access::PoolAccess},
};

/// Pool endpoints. Routes under `/pool/{token}` that need membership resolve it in
/// middleware; join and the public view handle access themselves.
pub fn router(state: SharedState) -> Router<SharedState> {
    let member_routes = Router::new()
        .route("/pool/{token}", get(pool_detail).post(pool_action))
        .route("/pool/{token}/invitetoken", get(invite_token))
        .route("/pool/{token}/log", get(pool_log))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_pool_access,
        ));

    let user_routes = Router::new()
        .route("/pool", post(create_pool))
        .route("/pool/{token}/member", post(join_pool))
        .merge(member_routes)
        .route_layer(middleware::from_fn_with_state(state, require_user));

    Router::new()
        .route("/pool/configuration", get(configuration))
        .route("/pool/{token}/squares/public", get(public_squares))
        .merge(user_routes)
}

/// Limits and enumerations used to render pool forms.
#[utoipa::path(
    get,
    path = "/pool/configuration",
    tag = "pool",
    responses((status = 200, description = "Client configuration", body = ConfigurationResponse))
)]
pub async fn configuration() -> Json<ConfigurationResponse> {
    Json(pool_service::configuration())
}

/// Create a pool owned by the caller.
#[utoipa::path(
    post,
    path = "/pool",
    tag = "pool",
    request_body = CreatePoolRequest,
    responses(
        (status = 201, description = "Pool created", body = PoolResponse),
        (status = 400, description = "Validation failed"),
        (status = 403, description = "Guests cannot create pools")
    )
)]
pub async fn create_pool(
    State(state): State<SharedState>,
    Extension(user): Extension<UserEntity>,
    ApiJson(payload): ApiJson<CreatePoolRequest>,
) -> Result<(StatusCode, Json<PoolResponse>), AppError> {
    let pool = pool_service::create_pool(&state, &user, payload).await?;
    Ok((StatusCode::CREATED, Json(pool)))
}

/// Pool metadata with the caller's role flags.
#[utoipa::path(
    get,
    path = "/pool/{token}",
    tag = "pool",
    params(("token" = String, Path, description = "Pool token")),
    responses(
        (status = 200, description = "Pool detail", body = PoolDetailResponse),
        (status = 403, description = "Not a member"),
        (status = 404, description = "Pool not found")
    )
)]
pub async fn pool_detail(
    State(state): State<SharedState>,
    Extension(access): Extension<PoolAccess>,
) -> Result<Json<PoolDetailResponse>, AppError> {
    Ok(Json(pool_service::pool_detail(&state, &access).await?))
}

/// Manager actions: lock, unlock, archive, rename, number sets, password changes and
/// grid ordering.
#[utoipa::path(
    post,
    path = "/pool/{token}",
    tag = "pool",
    params(("token" = String, Path, description = "Pool token")),
    request_body = PoolActionRequest,
    responses(
        (status = 200, description = "Updated pool", body = PoolDetailResponse),
        (status = 400, description = "Unsupported action or invalid input"),
        (status = 403, description = "Caller is not a pool manager")
    )
)]
pub async fn pool_action(
    State(state): State<SharedState>,
    Extension(access): Extension<PoolAccess>,
    ApiJson(payload): ApiJson<PoolActionRequest>,
) -> Result<Json<PoolDetailResponse>, AppError> {
    Ok(Json(pool_service::pool_action(&state, &access, payload).await?))
}

#[utoipa::path(
    get,
    path = "/pool/{token}/invitetoken",
    tag = "pool",
    params(("token" = String, Path, description = "Pool token")),
    responses(
        (status = 200, description = "Active invite", body = InviteTokenResponse),
        (status = 403, description = "Caller is not a pool manager")
    )
)]
pub async fn invite_token(
    State(state): State<SharedState>,
    Extension(access): Extension<PoolAccess>,
) -> Result<Json<InviteTokenResponse>, AppError> {
    Ok(Json(pool_service::invite_token(&state, &access).await?))
}

/// Square history across the pool, newest first.
#[utoipa::path(
    get,
    path = "/pool/{token}/log",
    tag = "pool",
    params(("token" = String, Path, description = "Pool token"), PoolLogQuery),
    responses(
        (status = 200, description = "Log page", body = PoolLogResponse),
        (status = 400, description = "Limit out of range"),
        (status = 403, description = "Not a member")
    )
)]
pub async fn pool_log(
    State(state): State<SharedState>,
    Extension(access): Extension<PoolAccess>,
    ApiQuery(query): ApiQuery<PoolLogQuery>,
) -> Result<Json<PoolLogResponse>, AppError> {
    Ok(Json(pool_service::pool_logs(&state, &access, query).await?))
}

/// Join a pool with its password, a stored invite, or an invite JWT.
#[utoipa::path(
    post,
    path = "/pool/{token}/member",
    tag = "pool",
    params(("token" = String, Path, description = "Pool token")),
    request_body = JoinPoolRequest,
    responses(
        (status = 204, description = "Joined"),
        (status = 400, description = "Credential rejected"),
        (status = 404, description = "Pool not found")
    )
)]
pub async fn join_pool(
    State(state): State<SharedState>,
    Extension(user): Extension<UserEntity>,
    ApiPath(token): ApiPath<String>,
    ApiJson(payload): ApiJson<JoinPoolRequest>,
) -> Result<StatusCode, AppError> {
    let access = access_service::resolve(&state, user, &token, false).await?;
    pool_service::join(&state, &access, payload).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Read-only squares view. Closed pools require their join password over HTTP basic auth.
#[utoipa::path(
    get,
    path = "/pool/{token}/squares/public",
    tag = "pool",
    params(("token" = String, Path, description = "Pool token")),
    responses(
        (status = 200, description = "Squares without user ids", body = PublicSquaresResponse),
        (status = 401, description = "Authentication required")
    )
)]
pub async fn public_squares(
    State(state): State<SharedState>,
    ApiPath(token): ApiPath<String>,
    headers: HeaderMap,
) -> Result<Json<PublicSquaresResponse>, AppError> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    Ok(Json(
        pool_service::public_squares(&state, &token, authorization).await?,
    ))
}
