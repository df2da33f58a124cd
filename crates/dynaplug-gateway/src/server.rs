// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Sets up routes, middleware, and shared state for the gateway.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use dynaplug_core::DynaplugError;
use dynaplug_plugin::PluginManager;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::middleware::RateLimiter;
use crate::proxy;

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub manager: Arc<PluginManager>,
    pub limiter: Arc<RateLimiter>,
    /// Process start time for uptime calculation.
    pub start_time: std::time::Instant,
}

impl GatewayState {
    pub fn new(manager: Arc<PluginManager>) -> Self {
        Self {
            manager,
            limiter: Arc::new(RateLimiter::new()),
            start_time: std::time::Instant::now(),
        }
    }
}

/// Host and port to bind.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Admin API plus the plugin proxy fallback.
pub fn build_router(state: GatewayState) -> Router {
    let plugin_routes = Router::new()
        .route("/api/plugins", get(handlers::list_plugins))
        .route("/api/plugins/load", post(handlers::load_plugin))
        .route("/api/plugins/validate", post(handlers::validate_manifest))
        .route(
            "/api/plugins/{id}",
            get(handlers::get_plugin).delete(handlers::unload_plugin),
        )
        .route("/api/plugins/{id}/reload", post(handlers::reload_plugin))
        .route("/api/plugins/{id}/enable", post(handlers::enable_plugin))
        .route("/api/plugins/{id}/disable", post(handlers::disable_plugin))
        .route("/api/plugins/{id}/status", get(handlers::get_status))
        .route("/api/plugins/{id}/health", get(handlers::get_health))
        .route("/api/plugins/{id}/health/check", post(handlers::check_health))
        .route("/api/plugins/{id}/errors", delete(handlers::clear_errors));

    let system_routes = Router::new()
        .route("/api/system/plugins/metrics", get(handlers::get_metrics))
        .route(
            "/api/system/plugins/config",
            get(handlers::get_configuration).put(handlers::update_configuration),
        )
        .route("/api/system/plugins/health", get(handlers::get_health_summary))
        .route(
            "/api/system/plugins/cache",
            get(handlers::get_cache_info).delete(handlers::clear_cache),
        )
        .route("/api/system/plugins/routes", get(handlers::get_routes))
        .route("/health", get(handlers::get_liveness));

    Router::new()
        .merge(plugin_routes)
        .merge(system_routes)
        .fallback(proxy::dispatch)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves until `cancel` fires, then drains in-flight requests.
pub async fn start_server(
    config: &ServerConfig,
    state: GatewayState,
    cancel: CancellationToken,
) -> Result<(), DynaplugError> {
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| DynaplugError::io(format!("failed to bind gateway to {addr}"), e))?;

    tracing::info!(addr = %addr, "gateway listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { cancel.cancelled().await })
    .await
    .map_err(|e| DynaplugError::io("gateway server error", e))?;

    tracing::info!("gateway stopped");
    Ok(())
}
