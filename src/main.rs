//! Squares pool API binary wiring HTTP routes, live streams, and PostgreSQL.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Request},
};
use squares_pool_back::{
    config::AppConfig,
    dao::pg::{PgStore, listener::PgNotificationSource},
    routes,
    services::{
        credentials::CredentialValidator,
        identity_directory::{Auth0Directory, IdentityDirectory, NoDirectory},
        key_locker::KeyLocker,
        notify_bridge::NotifyBridge,
        token_signer::TokenSigner,
    },
    state::{AppState, SharedState},
};
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, info_span, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const BRIDGE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();

    let store = PgStore::connect(&config.database_url, config.database_max_connections)
        .await
        .context("connecting to postgres")?;
    store.migrate().await.context("applying migrations")?;

    let signer = TokenSigner::from_files(
        &config.jwt_private_key_path,
        &config.jwt_public_key_path,
        config.self_issuer.clone(),
        config.audience.clone(),
        config.invite_audience.clone(),
    )
    .context("loading token signing keys")?;
    if config.external_issuer.is_none() {
        warn!("external issuer not configured; only guest tokens will authenticate");
    }
    let credentials = CredentialValidator::new(
        KeyLocker::new(config.jwks_url.clone()),
        signer.decoding_key().clone(),
        config.audience.clone(),
        config.self_issuer.clone(),
        config.external_issuer.clone(),
        config.email_claim.clone(),
    );
    let directory: Arc<dyn IdentityDirectory> = match Auth0Directory::from_config(&config.directory)
    {
        Some(directory) => Arc::new(directory),
        None => {
            warn!("identity directory not configured; emails will not be looked up");
            Arc::new(NoDirectory)
        }
    };

    let port = config.port;
    let app_state = AppState::new(
        Arc::new(store.clone()),
        credentials,
        signer,
        directory,
        config,
    );

    let source = PgNotificationSource::connect(store.pool())
        .await
        .context("listening for sports event notifications")?;
    let bridge = NotifyBridge::new(
        source,
        Arc::new(store.clone()),
        app_state.broker().clone(),
        app_state.shutdown_watcher(),
    );
    let bridge_handle = tokio::spawn(bridge.run());

    let app = build_router(app_state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service_with_connect_info::<SocketAddr>();
    let shutdown_state = app_state.clone();
    axum::serve(listener, service)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Streams and the bridge watch this flag; flipping it lets their connections drain.
            shutdown_state.trigger_shutdown();
        })
        .await
        .context("serving axum")?;

    if tokio::time::timeout(BRIDGE_DRAIN_TIMEOUT, bridge_handle)
        .await
        .is_err()
    {
        warn!("notification bridge did not stop in time");
    }
    store.close().await;
    info!("shutdown complete");
    Ok(())
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    let cors = cors_layer(&state.config().cors_allowed_origins);
    routes::router(state)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
            let request_id = req
                .headers()
                .get("x-request-id")
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default();
            info_span!(
                "request",
                method = %req.method(),
                uri = %req.uri(),
                request_id,
            )
        }))
        .layer(cors)
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(%origin, error = %err, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "could not install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
