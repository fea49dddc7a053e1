//! Media proxy HTTP server.

pub mod handlers;
pub mod rate_limit;
pub mod state;
pub mod url_validation;

use crate::{config::Config, hls::PROXY_PATH};
use axum::{
    Router,
    extract::Request,
    http::{HeaderValue, Method, header},
    middleware::{self, Next},
    response::Response,
    routing::get,
};
use rate_limit::{CLEANUP_INTERVAL, rate_limit_middleware};
use state::AppState;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Build the media proxy router around an existing state.
pub fn router(state: AppState) -> Router {
    let proxy_routes = Router::new()
        .route(PROXY_PATH, get(handlers::proxy::proxy_media))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers([header::RANGE])
        .expose_headers([header::CONTENT_LENGTH, header::CONTENT_RANGE]);

    Router::new()
        .route("/", get(handlers::health::health_check))
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::health::metrics))
        .merge(proxy_routes)
        .layer(cors)
        .layer(middleware::from_fn(version_header))
        .with_state(state)
}

/// Build the router with fresh state for `config`.
pub fn build_router(config: Config) -> Result<Router, reqwest::Error> {
    Ok(router(AppState::new(config)?))
}

async fn version_header(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    response.headers_mut().insert(
        "x-streamgate-version",
        HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
    );
    response
}

/// Start the media proxy and serve until `shutdown` fires.
pub async fn start(
    config: Config,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.bind_addr, config.port);

    let state = AppState::new(config)?;
    if let Some(limiter) = &state.rate_limiter {
        limiter.spawn_cleanup(CLEANUP_INTERVAL, shutdown.clone());
    }
    let app = router(state);

    let listener = match tokio::net::TcpListener::bind(addr.as_str()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to address {}: {}", addr, e);
            return Err(e.into());
        }
    };

    info!("🚀 Media proxy listening on http://{}", addr);

    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await
    {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
