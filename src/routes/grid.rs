use axum::{
    Extension, Json, Router,
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};

use crate::{
    dto::grid::{
        AnnotationRequest, DrawResponse, GridAnnotationResponse, GridCommandRequest,
        GridListResponse, GridResponse,
    },
    error::AppError,
    routes::{
        extract::{ApiJson, ApiPath},
        middleware::{require_pool_access, require_user},
    },
    services::grid_service::{self, GridCommandOutcome},
    state::{SharedState, access::PoolAccess},
};

/// Grid endpoints of a pool.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/pool/{token}/grid", get(list_grids))
        .route(
            "/pool/{token}/grid/{id}",
            get(grid_detail).post(grid_command).delete(delete_grid),
        )
        .route(
            "/pool/{token}/grid/{id}/square/{square_id}/annotation",
            post(save_annotation).delete(delete_annotation),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_pool_access,
        ))
        .route_layer(middleware::from_fn_with_state(state, require_user))
}

/// Active grids in display order.
#[utoipa::path(
    get,
    path = "/pool/{token}/grid",
    tag = "grid",
    params(("token" = String, Path, description = "Pool token")),
    responses((status = 200, description = "Active grids in display order", body = GridListResponse))
)]
pub async fn list_grids(
    State(state): State<SharedState>,
    Extension(access): Extension<PoolAccess>,
) -> Result<Json<GridListResponse>, AppError> {
    Ok(Json(grid_service::list_grids(&state, &access).await?))
}

/// Grid with its settings and annotations.
#[utoipa::path(
    get,
    path = "/pool/{token}/grid/{id}",
    tag = "grid",
    params(
        ("token" = String, Path, description = "Pool token"),
        ("id" = i64, Path, description = "Grid id")
    ),
    responses(
        (status = 200, description = "Grid detail", body = GridResponse),
        (status = 404, description = "Grid not found")
    )
)]
pub async fn grid_detail(
    State(state): State<SharedState>,
    Extension(access): Extension<PoolAccess>,
    ApiPath(path): ApiPath<(String, i64)>,
) -> Result<Json<GridResponse>, AppError> {
    let (_, id) = path;
    Ok(Json(grid_service::grid_detail(&state, &access, id).await?))
}

/// `save` answers 202 with the grid; the draw actions answer 200 with the grid and the
/// resulting pool lock.
#[utoipa::path(
    post,
    path = "/pool/{token}/grid/{id}",
    tag = "grid",
    params(
        ("token" = String, Path, description = "Pool token"),
        ("id" = i64, Path, description = "Grid id, 0 to create")
    ),
    request_body = GridCommandRequest,
    responses(
        (status = 200, description = "Numbers drawn", body = DrawResponse),
        (status = 202, description = "Grid saved", body = GridResponse),
        (status = 400, description = "Invalid command or conflicting state"),
        (status = 403, description = "Caller is not a pool manager")
    )
)]
pub async fn grid_command(
    State(state): State<SharedState>,
    Extension(access): Extension<PoolAccess>,
    ApiPath(path): ApiPath<(String, i64)>,
    ApiJson(payload): ApiJson<GridCommandRequest>,
) -> Result<Response, AppError> {
    let (_, id) = path;
    let response = match grid_service::command(&state, &access, id, payload).await? {
        GridCommandOutcome::Saved(grid) => (StatusCode::ACCEPTED, Json(grid)).into_response(),
        GridCommandOutcome::Drawn(drawn) => (StatusCode::OK, Json(drawn)).into_response(),
    };
    Ok(response)
}

#[utoipa::path(
    delete,
    path = "/pool/{token}/grid/{id}",
    tag = "grid",
    params(
        ("token" = String, Path, description = "Pool token"),
        ("id" = i64, Path, description = "Grid id")
    ),
    responses(
        (status = 204, description = "Grid deleted"),
        (status = 400, description = "Last grid of the pool"),
        (status = 404, description = "Grid not found")
    )
)]
pub async fn delete_grid(
    State(state): State<SharedState>,
    Extension(access): Extension<PoolAccess>,
    ApiPath(path): ApiPath<(String, i64)>,
) -> Result<StatusCode, AppError> {
    let (_, id) = path;
    grid_service::delete_grid(&state, &access, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Create or replace the annotation of a square: 201 when created, 200 when replaced.
#[utoipa::path(
    post,
    path = "/pool/{token}/grid/{id}/square/{square_id}/annotation",
    tag = "grid",
    params(
        ("token" = String, Path, description = "Pool token"),
        ("id" = i64, Path, description = "Grid id"),
        ("square_id" = i32, Path, description = "Square number")
    ),
    request_body = AnnotationRequest,
    responses(
        (status = 200, description = "Annotation replaced", body = GridAnnotationResponse),
        (status = 201, description = "Annotation created", body = GridAnnotationResponse),
        (status = 400, description = "Invalid square, icon or text"),
        (status = 403, description = "Caller is not a pool manager"),
        (status = 404, description = "Grid not found")
    )
)]
pub async fn save_annotation(
    State(state): State<SharedState>,
    Extension(access): Extension<PoolAccess>,
    ApiPath(path): ApiPath<(String, i64, i32)>,
    ApiJson(payload): ApiJson<AnnotationRequest>,
) -> Result<(StatusCode, Json<GridAnnotationResponse>), AppError> {
    let (_, id, square_id) = path;
    let (annotation, created) =
        grid_service::save_annotation(&state, &access, id, square_id, payload).await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(annotation)))
}

#[utoipa::path(
    delete,
    path = "/pool/{token}/grid/{id}/square/{square_id}/annotation",
    tag = "grid",
    params(
        ("token" = String, Path, description = "Pool token"),
        ("id" = i64, Path, description = "Grid id"),
        ("square_id" = i32, Path, description = "Square number")
    ),
    responses(
        (status = 204, description = "Annotation removed"),
        (status = 403, description = "Caller is not a pool manager"),
        (status = 404, description = "Grid not found")
    )
)]
pub async fn delete_annotation(
    State(state): State<SharedState>,
    Extension(access): Extension<PoolAccess>,
    ApiPath(path): ApiPath<(String, i64, i32)>,
) -> Result<StatusCode, AppError> {
    let (_, id, square_id) = path;
    grid_service::delete_annotation(&state, &access, id, square_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
