//! Local HTTP server exposing registered apps

pub mod events;
pub mod middleware;
pub mod routes;

pub use events::{BroadcastEventSink, EVENTS_PATH};
pub use routes::{create_router, parse_body, ApiError, ServerState, HEALTH_MESSAGE};

use axum::Router;
use std::net::SocketAddr;
use tokio::signal;
use tracing::info;

use crate::apps::Context;
use crate::core::config::Config;
use crate::core::errors::{PipesError, Result};

/// Router for `ctx` with request logging and CORS applied
pub fn app_router(ctx: Context, config: &Config) -> Result<Router> {
    let router = create_router(ctx, &config.server)?;
    Ok(router
        .layer(axum::middleware::from_fn(middleware::request_logger))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(middleware::create_cors_layer()))
}

/// Serve every app registered in `ctx` until Ctrl+C
pub async fn start(ctx: Context, config: &Config) -> Result<()> {
    config.validate()?;
    if config.production {
        info!("Smartpipes in PRODUCTION");
    } else {
        info!("Smartpipes in DEVELOPMENT MODE");
    }

    let app = app_router(ctx, config)?;
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|_| {
            PipesError::configuration_field(
                format!("invalid listen address {}:{}", config.server.host, config.server.port),
                "server.host",
            )
        })?;

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| PipesError::io("bind listener", e))?;
    info!("HTTP server listening on http://{}", addr);
    info!("Live events at http://{}{}", addr, EVENTS_PATH);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C signal");
            }
        })
        .await
        .map_err(|e| PipesError::io("serve", e))?;

    info!("Server shutdown complete");
    Ok(())
}
