// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Router fallback that dispatches requests to plugin handlers.
//!
//! Order of checks: route lookup (404), plugin enabled (503), request
//! validation (400), rate limit (429). Handlers are synchronous and run
//! on the blocking pool; a panic there becomes a 500.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use dynaplug_core::{HttpMethod, PluginRequest, PluginResponse};
use dynaplug_plugin::panic_message;
use tracing::{debug, warn};

use crate::error::ErrorResponse;
use crate::middleware::validate_request;
use crate::server::GatewayState;

/// Largest request body forwarded to a plugin.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

fn reject(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse::new(message))).into_response()
}

/// Client address: first `x-forwarded-for` hop, then `x-real-ip`, then the
/// socket peer.
pub fn client_addr(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
        })
        .map(str::to_string)
        .or_else(|| peer.map(|p| p.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn parse_query(query: Option<&str>) -> BTreeMap<String, String> {
    query
        .unwrap_or_default()
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

fn lowercase_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

fn into_http(plugin_id: &str, resp: PluginResponse) -> Response {
    let status = StatusCode::from_u16(resp.status).unwrap_or_else(|_| {
        warn!(plugin_id = %plugin_id, status = resp.status, "plugin returned an invalid status");
        StatusCode::INTERNAL_SERVER_ERROR
    });
    let mut response = Response::new(Body::from(resp.body));
    *response.status_mut() = status;
    for (name, value) in resp.headers {
        match (HeaderName::try_from(name.as_str()), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().insert(name, value);
            }
            _ => debug!(plugin_id = %plugin_id, header = %name, "dropping invalid response header"),
        }
    }
    response
}

/// Fallback handler for every request not matched by the admin API.
pub async fn dispatch(State(state): State<GatewayState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_string();

    let Ok(method) = HttpMethod::from_str(parts.method.as_str()) else {
        return reject(StatusCode::NOT_FOUND, format!("no route for {} {path}", parts.method));
    };
    let Some(matched) = state.manager.routes().resolve(method, &path) else {
        return reject(StatusCode::NOT_FOUND, format!("no route for {method} {path}"));
    };
    let target = matched.target;

    let Some(entry) = state.manager.registry().get(&target.plugin_id) else {
        return reject(StatusCode::NOT_FOUND, format!("plugin {} is not loaded", target.plugin_id));
    };
    if !entry.is_enabled() {
        return reject(
            StatusCode::SERVICE_UNAVAILABLE,
            format!("plugin {} is disabled", target.plugin_id),
        );
    }

    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => return reject(StatusCode::BAD_REQUEST, format!("failed to read request body: {e}")),
    };
    let headers = lowercase_headers(&parts.headers);

    if let Some(rules) = &target.endpoint.validation {
        if let Err(resp) = validate_request(rules, &headers, &bytes) {
            return resp;
        }
    }

    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_addr(&parts.headers, peer);
    if let Some(limit) = &target.endpoint.rate_limit {
        if let Err(retry_after) = state.limiter.check(&target.key(), &client, limit, Instant::now()) {
            debug!(plugin_id = %target.plugin_id, client = %client, "rate limit exceeded");
            return (
                StatusCode::TOO_MANY_REQUESTS,
                Json(serde_json::json!({
                    "error": "rate limit exceeded",
                    "retry_after": retry_after,
                })),
            )
                .into_response();
        }
    }

    if let Err(e) = state.manager.registry().record_request(&target.plugin_id) {
        debug!(plugin_id = %target.plugin_id, error = %e, "request count not recorded");
    }

    let plugin_path = path
        .strip_prefix(&format!(
            "{}/{}",
            state.manager.route_prefix().trim_end_matches('/'),
            target.plugin_id
        ))
        .unwrap_or(&path)
        .to_string();
    let plugin_request = PluginRequest {
        method: method.to_string(),
        route: target.declared_path.clone(),
        path: plugin_path,
        params: matched.params,
        query: parse_query(parts.uri.query()),
        headers,
        body: bytes.to_vec(),
        client_addr: Some(client),
    };

    let plugin_id = target.plugin_id.clone();
    let handler_target = std::sync::Arc::clone(&target);
    let outcome =
        tokio::task::spawn_blocking(move || (handler_target.handler)(&plugin_request)).await;

    match outcome {
        Ok(Ok(resp)) => into_http(&plugin_id, resp),
        Ok(Err(e)) => {
            warn!(plugin_id = %plugin_id, route = %target.key(), error = %e, "plugin handler failed");
            reject(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(join) if join.is_panic() => {
            let message = panic_message(join.into_panic().as_ref());
            warn!(plugin_id = %plugin_id, route = %target.key(), panic = %message, "plugin handler panicked");
            reject(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("plugin {plugin_id} handler panicked"),
            )
        }
        Err(join) => reject(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("plugin handler task failed: {join}"),
        ),
    }
}
