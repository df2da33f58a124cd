// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Plugin administration endpoints.
//!
//! Status and health reads return the last recorded snapshot and never
//! probe a plugin; only `POST /api/plugins/{id}/health/check` does.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dynaplug_core::{DynaplugError, HealthState, PluginState};
use dynaplug_plugin::{
    parse_plugin_manifest, HealthSettings, HealthSettingsUpdate, ManifestValidator,
    RegisteredPlugin,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::ApiError;
use crate::server::GatewayState;

type ApiResult = Result<Response, ApiError>;

/// Request body for `POST /api/plugins/load`.
#[derive(Debug, Deserialize)]
pub struct LoadRequest {
    /// Repository URL, `local:<dir>`, or artifact path.
    pub source: String,
    /// Branch or tag for repository sources.
    #[serde(default)]
    pub version: Option<String>,
}

/// One row of the plugin listing.
#[derive(Debug, Serialize)]
pub struct PluginSummary {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub source: String,
    pub state: Option<PluginState>,
    pub health: Option<HealthState>,
    pub enabled: bool,
    pub request_count: u64,
    pub routes: Vec<String>,
    /// RFC 3339.
    pub loaded_at: String,
}

fn summarize(state: &GatewayState, entry: &RegisteredPlugin) -> PluginSummary {
    let status = state.manager.registry().status(entry.id());
    PluginSummary {
        id: entry.id().to_string(),
        name: entry.manifest.name.clone(),
        version: entry.manifest.version.clone(),
        description: entry.manifest.description.clone(),
        author: entry.manifest.author.clone(),
        source: entry.source.to_string(),
        state: status.as_ref().map(|s| s.state),
        health: status.as_ref().map(|s| s.health),
        enabled: entry.is_enabled(),
        request_count: entry.request_count(),
        routes: entry.routes.clone(),
        loaded_at: entry.loaded_at.to_rfc3339(),
    }
}

fn not_found(id: &str) -> ApiError {
    ApiError(DynaplugError::NotFound(format!("plugin {id}")))
}

fn message(text: String) -> Response {
    (StatusCode::OK, Json(json!({ "message": text }))).into_response()
}

fn render_settings(settings: &HealthSettings) -> serde_json::Value {
    json!({
        "interval_secs": settings.interval.as_secs(),
        "timeout_secs": settings.timeout.as_secs(),
        "healthy_threshold": settings.healthy_threshold,
        "unhealthy_threshold": settings.unhealthy_threshold,
    })
}

/// Routes under the plugin's namespace share this prefix.
fn namespace(state: &GatewayState, id: &str) -> String {
    format!("{}/{id}/", state.manager.route_prefix().trim_end_matches('/'))
}

/// POST /api/plugins/load
pub async fn load_plugin(
    State(state): State<GatewayState>,
    Json(body): Json<LoadRequest>,
) -> ApiResult {
    let entry = state
        .manager
        .load(&body.source, body.version.as_deref())
        .await?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "message": format!("plugin {} loaded from {}", entry.id(), body.source),
            "plugin": summarize(&state, &entry),
        })),
    )
        .into_response())
}

/// GET /api/plugins
pub async fn list_plugins(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    let plugins: Vec<PluginSummary> = state
        .manager
        .list()
        .iter()
        .map(|entry| summarize(&state, entry))
        .collect();
    Json(json!({ "count": plugins.len(), "plugins": plugins }))
}

/// GET /api/plugins/{id}
pub async fn get_plugin(State(state): State<GatewayState>, Path(id): Path<String>) -> ApiResult {
    let entry = state.manager.get(&id).ok_or_else(|| not_found(&id))?;
    Ok(Json(json!({
        "plugin": {
            "summary": summarize(&state, &entry),
            "manifest": entry.manifest,
            "status": state.manager.registry().status(&id),
            "errors": entry.errors(),
            "artifact_path": entry.artifact_path,
        }
    }))
    .into_response())
}

/// DELETE /api/plugins/{id}
pub async fn unload_plugin(State(state): State<GatewayState>, Path(id): Path<String>) -> ApiResult {
    state.manager.unload(&id).await?;
    state.limiter.forget(&namespace(&state, &id));
    Ok(message(format!("plugin {id} unloaded")))
}

/// POST /api/plugins/{id}/reload
pub async fn reload_plugin(State(state): State<GatewayState>, Path(id): Path<String>) -> ApiResult {
    let entry = state.manager.reload(&id).await?;
    state.limiter.forget(&namespace(&state, &id));
    Ok((
        StatusCode::OK,
        Json(json!({
            "message": format!("plugin {id} reloaded"),
            "plugin": summarize(&state, &entry),
        })),
    )
        .into_response())
}

/// POST /api/plugins/{id}/enable
pub async fn enable_plugin(State(state): State<GatewayState>, Path(id): Path<String>) -> ApiResult {
    state.manager.enable(&id)?;
    Ok(message(format!("plugin {id} enabled")))
}

/// POST /api/plugins/{id}/disable
pub async fn disable_plugin(State(state): State<GatewayState>, Path(id): Path<String>) -> ApiResult {
    state.manager.disable(&id)?;
    Ok(message(format!("plugin {id} disabled")))
}

/// GET /api/plugins/{id}/status
pub async fn get_status(State(state): State<GatewayState>, Path(id): Path<String>) -> ApiResult {
    let status = state
        .manager
        .registry()
        .status(&id)
        .ok_or_else(|| not_found(&id))?;
    Ok(Json(json!({ "plugin_id": id, "status": status })).into_response())
}

/// GET /api/plugins/{id}/health
pub async fn get_health(State(state): State<GatewayState>, Path(id): Path<String>) -> ApiResult {
    let status = state
        .manager
        .registry()
        .status(&id)
        .ok_or_else(|| not_found(&id))?;
    Ok(Json(json!({
        "plugin_id": id,
        "health": status.health,
        "last_check": status.last_check,
        "monitor": state.manager.health().health_data(&id),
    }))
    .into_response())
}

/// POST /api/plugins/{id}/health/check
pub async fn check_health(State(state): State<GatewayState>, Path(id): Path<String>) -> ApiResult {
    let data = state.manager.health().check_plugin(&id).await?;
    Ok(Json(json!({ "plugin_id": id, "health": data })).into_response())
}

/// DELETE /api/plugins/{id}/errors
pub async fn clear_errors(State(state): State<GatewayState>, Path(id): Path<String>) -> ApiResult {
    state.manager.registry().clear_errors(&id)?;
    Ok(message(format!("errors cleared for plugin {id}")))
}

/// POST /api/plugins/validate
///
/// The body is the manifest TOML itself.
pub async fn validate_manifest(body: String) -> Response {
    let result = parse_plugin_manifest(&body).and_then(|manifest| {
        ManifestValidator::new()
            .validate_manifest(&manifest)
            .map(|()| manifest)
    });
    match result {
        Ok(manifest) => (
            StatusCode::OK,
            Json(json!({
                "valid": true,
                "message": format!("manifest for {} is valid", manifest.id),
                "plugin_id": manifest.id,
                "endpoints": manifest.endpoints.len(),
            })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "valid": false, "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// GET /api/system/plugins/metrics
pub async fn get_metrics(State(state): State<GatewayState>) -> Response {
    Json(state.manager.metrics()).into_response()
}

/// GET /api/system/plugins/config
pub async fn get_configuration(State(state): State<GatewayState>) -> Response {
    let config = state.manager.config();
    Json(json!({
        "plugins": config.plugins,
        "security_policy": config.plugins.security_mode.policy(),
        "health": render_settings(&state.manager.health().settings()),
        "loader": config.loader,
    }))
    .into_response()
}

/// PUT /api/system/plugins/config
pub async fn update_configuration(
    State(state): State<GatewayState>,
    Json(update): Json<HealthSettingsUpdate>,
) -> Response {
    let settings = state.manager.health().update_configuration(update);
    Json(json!({
        "message": "configuration updated",
        "health": render_settings(&settings),
    }))
    .into_response()
}

/// GET /api/system/plugins/health
pub async fn get_health_summary(State(state): State<GatewayState>) -> Response {
    let monitor = state.manager.health();
    Json(json!({
        "summary": monitor.summary(),
        "plugins": monitor.all_health_data(),
    }))
    .into_response()
}

/// GET /api/system/plugins/cache
pub async fn get_cache_info(State(state): State<GatewayState>) -> Response {
    Json(state.manager.cache_info()).into_response()
}

/// DELETE /api/system/plugins/cache
pub async fn clear_cache(State(state): State<GatewayState>) -> ApiResult {
    state.manager.clear_cache()?;
    Ok(message("build cache cleared".to_string()))
}

/// GET /api/system/plugins/routes
pub async fn get_routes(State(state): State<GatewayState>) -> Response {
    let routes = state.manager.routes().keys();
    Json(json!({
        "count": routes.len(),
        "routes": routes,
        "by_plugin": state.manager.registry().all_routes(),
    }))
    .into_response()
}

/// GET /health
pub async fn get_liveness(State(state): State<GatewayState>) -> Response {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "plugins": state.manager.registry().len(),
    }))
    .into_response()
}
