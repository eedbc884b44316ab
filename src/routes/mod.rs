use axum::{Router, http::StatusCode};
use tower_http::timeout::TimeoutLayer;

use crate::state::SharedState;

pub mod docs;
pub mod extract;
pub mod grid;
pub mod health;
pub mod middleware;
pub mod pool;
pub mod square;
pub mod sports;
pub mod sse;
pub mod user;

/// Compose all route trees. Unary routes share the write deadline; the event stream is
/// merged outside it.
pub fn router(state: SharedState) -> Router<()> {
    let write_timeout = state.config().write_timeout;

    let api_router = health::router()
        .merge(user::router(state.clone()))
        .merge(pool::router(state.clone()))
        .merge(grid::router(state.clone()))
        .merge(square::router(state.clone()))
        .merge(sports::router())
        .merge(docs::router())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            write_timeout,
        ));

    api_router.merge(sse::router()).with_state(state)
}
