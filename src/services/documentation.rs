use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the squares pool API.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::user::create_guest,
        crate::routes::user::self_info,
        crate::routes::user::user_pools,
        crate::routes::user::leave_pool,
        crate::routes::pool::configuration,
        crate::routes::pool::create_pool,
        crate::routes::pool::pool_detail,
        crate::routes::pool::pool_action,
        crate::routes::pool::invite_token,
        crate::routes::pool::pool_log,
        crate::routes::pool::join_pool,
        crate::routes::pool::public_squares,
        crate::routes::grid::list_grids,
        crate::routes::grid::grid_detail,
        crate::routes::grid::grid_command,
        crate::routes::grid::delete_grid,
        crate::routes::grid::save_annotation,
        crate::routes::grid::delete_annotation,
        crate::routes::square::list_squares,
        crate::routes::square::square_detail,
        crate::routes::square::square_command,
        crate::routes::square::bulk_update,
        crate::routes::sse::pool_stream,
        crate::routes::sports::leagues,
        crate::routes::sports::events,
        crate::routes::sports::event,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::user::GuestResponse,
            crate::dto::user::SelfResponse,
            crate::dto::user::PoolMembershipFilter,
            crate::dto::user::UserPoolsResponse,
            crate::dto::pool::ConfigurationResponse,
            crate::dto::pool::GridTypeInfo,
            crate::dto::pool::NumberSetConfigInfo,
            crate::dto::pool::AnnotationIconInfo,
            crate::dto::pool::PoolLogResponse,
            crate::dto::pool::CreatePoolRequest,
            crate::dto::pool::PoolResponse,
            crate::dto::pool::PoolDetailResponse,
            crate::dto::pool::PoolActionRequest,
            crate::dto::pool::InviteTokenResponse,
            crate::dto::pool::JoinPoolRequest,
            crate::dto::pool::PublicSquaresResponse,
            crate::dto::grid::GridCommandRequest,
            crate::dto::grid::GridCommandData,
            crate::dto::grid::GridResponse,
            crate::dto::grid::GridSettingsResponse,
            crate::dto::grid::GridListResponse,
            crate::dto::grid::DrawResponse,
            crate::dto::grid::AnnotationRequest,
            crate::dto::grid::GridAnnotationResponse,
            crate::dto::sports::SportsLeagueInfo,
            crate::dto::sports::SportsEventResponse,
            crate::dto::sports::SportsEventsResponse,
            crate::dto::square::SquareCommandRequest,
            crate::dto::square::SquareResponse,
            crate::dto::square::SquareLogResponse,
            crate::dto::square::UserInfo,
            crate::dto::square::BulkSquaresRequest,
            crate::dto::square::BulkSquareResult,
            crate::dto::square::BulkSquaresResponse,
            crate::dao::models::GridType,
            crate::dao::models::GridState,
            crate::dao::models::SquareState,
            crate::dao::models::NumberSetConfig,
            crate::dao::models::SportsLeague,
            crate::dao::models::SportsEventStatus,
            crate::state::broker::PoolEvent,
            crate::state::broker::PoolEventKind,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "user", description = "Guest accounts, identity and pool memberships"),
        (name = "pool", description = "Pool lifecycle and membership"),
        (name = "grid", description = "Grids and number draws"),
        (name = "square", description = "Square claims and state changes"),
        (name = "sse", description = "Server-sent events streams"),
        (name = "sports", description = "Leagues and cached sports events"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_pool_routes() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/pool/{token}/squares/bulk"));
        assert!(doc.paths.paths.contains_key("/pool/{token}/events"));
        assert!(doc.paths.paths.contains_key("/pool/{token}/log"));
        assert!(
            doc.paths
                .paths
                .contains_key("/pool/{token}/grid/{id}/square/{square_id}/annotation")
        );
        assert!(doc.paths.paths.contains_key("/sports/events/{id}"));
        assert!(doc.paths.paths.contains_key("/user/{id}/pool/{membership}"));
    }
}
