// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-endpoint request validation and rate limiting.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dashmap::DashMap;
use dynaplug_plugin::manifest::{RateLimitConfig, RequestValidation};

const DEFAULT_WINDOW_MS: i64 = 60_000;

/// Checks content type, then required JSON fields. Returns the 400
/// response to send when a rule fails.
pub fn validate_request(
    rules: &RequestValidation,
    headers: &BTreeMap<String, String>,
    body: &[u8],
) -> Result<(), Response> {
    if !rules.content_type.is_empty() {
        let content_type = headers.get("content-type").map(String::as_str).unwrap_or("");
        if !rules.content_type.iter().any(|ct| content_type.contains(ct.as_str())) {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "error": "invalid content type",
                    "expected": rules.content_type,
                })),
            )
                .into_response());
        }
    }

    if !rules.required.is_empty() {
        let payload: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(body)
            .map_err(|_| {
                (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({"error": "invalid json payload"})),
                )
                    .into_response()
            })?;
        if let Some(field) = rules.required.iter().find(|f| !payload.contains_key(*f)) {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "error": format!("required field '{field}' is missing"),
                })),
            )
                .into_response());
        }
    }
    Ok(())
}

/// Sliding-window limiter keyed by route and client address.
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: DashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits or rejects one request at `now`. On rejection returns the
    /// `retry_after` value in seconds.
    pub fn check(
        &self,
        route: &str,
        client: &str,
        limit: &RateLimitConfig,
        now: Instant,
    ) -> Result<(), u64> {
        if !limit.enabled || limit.rpm <= 0 {
            return Ok(());
        }
        let window_ms = if limit.window_ms > 0 {
            limit.window_ms
        } else {
            DEFAULT_WINDOW_MS
        };
        let window = Duration::from_millis(window_ms.unsigned_abs());

        let mut hits = self.windows.entry(format!("{route}|{client}")).or_default();
        while hits
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= window)
        {
            hits.pop_front();
        }

        if hits.len() as i64 >= limit.rpm {
            return Err((window_ms / 1000).unsigned_abs());
        }
        hits.push_back(now);
        Ok(())
    }

    /// Drops every window belonging to routes that start with `prefix`.
    pub fn forget(&self, prefix: &str) {
        self.windows.retain(|key, _| {
            !key.split_once(' ')
                .is_some_and(|(_, rest)| rest.starts_with(prefix))
        });
    }

    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}
