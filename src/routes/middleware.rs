use std::{collections::HashMap, net::SocketAddr};

use axum::{
    body::Body,
    extract::{ConnectInfo, FromRequestParts, State},
    http::{HeaderMap, Request, header, request::Parts},
    middleware::Next,
    response::Response,
};

use crate::{
    dao::models::UserEntity,
    error::AppError,
    routes::extract::ApiPath,
    services::access_service,
    state::SharedState,
};

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Token from an `Authorization: Bearer` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Resolve the bearer credential into a [`UserEntity`] request extension.
pub async fn require_user(
    State(state): State<SharedState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let user = access_service::authenticate(&state, bearer_token(req.headers())).await?;
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Resolve the caller's [`PoolAccess`](crate::state::access::PoolAccess) for the `{token}`
/// path segment, auto-joining open pools. Runs after [`require_user`].
pub async fn require_pool_access(
    State(state): State<SharedState>,
    ApiPath(params): ApiPath<HashMap<String, String>>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let user = req
        .extensions()
        .get::<UserEntity>()
        .cloned()
        .ok_or_else(|| AppError::Unauthorized("missing bearer token".into()))?;
    let token = params
        .get("token")
        .ok_or_else(|| AppError::NotFound("pool not found".into()))?;

    let access = access_service::resolve(&state, user, token, true).await?;
    req.extensions_mut().insert(access);
    Ok(next.run(req).await)
}

/// Best-effort client address for audit logs: the first `X-Forwarded-For` hop, else the
/// peer address when the server records it.
#[derive(Debug, Clone)]
pub struct ClientAddr(pub Option<String>);

impl<S: Send + Sync> FromRequestParts<S> for ClientAddr {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get(FORWARDED_FOR)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_owned);
        let peer = || {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.to_string())
        };
        Ok(ClientAddr(forwarded.or_else(peer)))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn bearer_prefix_is_required() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));
    }

    #[tokio::test]
    async fn client_addr_prefers_forwarded_header() {
        let request = Request::builder()
            .header(FORWARDED_FOR, "203.0.113.9, 10.0.0.1")
            .body(())
            .unwrap();
        let (mut parts, _) = request.into_parts();
        let ClientAddr(addr) = ClientAddr::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(addr.as_deref(), Some("203.0.113.9"));
    }
}
