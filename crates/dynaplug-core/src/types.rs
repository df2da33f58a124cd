// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared between the host runtime and plugin libraries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle state of a registered plugin.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    Loading,
    Loaded,
    Error,
    Unloading,
    Unloaded,
}

/// Health of a registered plugin as reported by the health monitor.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
    Unknown,
    Degraded,
}

/// HTTP methods a plugin endpoint may declare.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Options,
}

/// Identity a live plugin instance reports about itself.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PluginMetadata {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
}

/// A request forwarded from the gateway to a plugin handler.
#[derive(Debug, Clone, Default)]
pub struct PluginRequest {
    /// Upper-case HTTP method.
    pub method: String,
    /// Path as declared in the manifest, e.g. `/items/{id}`.
    pub route: String,
    /// Concrete path relative to the plugin namespace, e.g. `/items/42`.
    pub path: String,
    /// Values captured from `{name}` or `:name` segments of the route.
    pub params: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    /// Header names are lower-cased.
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub client_addr: Option<String>,
}

impl PluginRequest {
    /// Decodes the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// A response produced by a plugin handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl PluginResponse {
    /// A JSON response with the given status.
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        Self {
            status,
            headers,
            body: value.to_string().into_bytes(),
        }
    }

    /// A plain-text response with the given status.
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert(
            "content-type".to_string(),
            "text/plain; charset=utf-8".to_string(),
        );
        Self {
            status,
            headers,
            body: body.into().into_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn http_method_parses_case_insensitively() {
        assert_eq!(HttpMethod::from_str("get").unwrap(), HttpMethod::Get);
        assert_eq!(HttpMethod::from_str("Patch").unwrap(), HttpMethod::Patch);
        assert!(HttpMethod::from_str("TRACE").is_err());
        assert_eq!(HttpMethod::Options.to_string(), "OPTIONS");
    }

    #[test]
    fn states_render_lowercase() {
        assert_eq!(PluginState::Unloading.to_string(), "unloading");
        assert_eq!(HealthState::Degraded.to_string(), "degraded");
        let json = serde_json::to_string(&HealthState::Unknown).unwrap();
        assert_eq!(json, "\"unknown\"");
    }

    #[test]
    fn json_response_sets_content_type() {
        let resp = PluginResponse::json(200, &serde_json::json!({"ok": true}));
        assert_eq!(resp.status, 200);
        assert_eq!(
            resp.headers.get("content-type").map(String::as_str),
            Some("application/json")
        );
        assert_eq!(resp.body, br#"{"ok":true}"#);
    }

    #[test]
    fn request_header_lookup_ignores_case() {
        let mut req = PluginRequest::default();
        req.headers
            .insert("content-type".into(), "application/json".into());
        assert_eq!(req.header("Content-Type"), Some("application/json"));
    }
}
