// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Plugin manifest parsing from `plugin.toml` files.
//!
//! A manifest carries the plugin's identity in a `[plugin]` table, followed
//! by `[[endpoints]]`, optional `[[ui_components]]`, and the `compatibility`,
//! `configuration`, `security`, and `health` tables.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use dynaplug_core::{DynaplugError, HttpMethod, PluginConfig};
use serde::{Deserialize, Serialize};

/// Parsed plugin manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ui_components: Vec<UiComponentConfig>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Component name to version constraint, e.g. `host = ">=0.1.0"`.
    #[serde(default)]
    pub compatibility: BTreeMap<String, String>,
    /// Passed verbatim to the plugin's initialize call.
    #[serde(default)]
    pub configuration: PluginConfig,
    #[serde(default)]
    pub security: ManifestSecurity,
    #[serde(default)]
    pub health: ManifestHealth,
}

/// One HTTP endpoint a plugin exposes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Path relative to the plugin namespace. May contain `{name}` or `:name` segments.
    pub path: String,
    pub method: String,
    /// Key into the plugin's handler table.
    pub handler: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub middleware: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<RequestValidation>,
}

impl EndpointConfig {
    /// The declared method, if it is one the runtime supports.
    pub fn http_method(&self) -> Option<HttpMethod> {
        HttpMethod::from_str(self.method.trim()).ok()
    }
}

/// Per-client sliding-window limit for one endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Requests allowed per window.
    #[serde(default)]
    pub rpm: i64,
    #[serde(default)]
    pub burst: i64,
    #[serde(default)]
    pub window_ms: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Request checks applied by the gateway before the handler runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestValidation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    /// Top-level JSON fields the body must contain.
    #[serde(default)]
    pub required: Vec<String>,
    /// Accepted content types. Empty accepts any.
    #[serde(default)]
    pub content_type: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiComponentConfig {
    pub name: String,
    pub route: String,
    pub component: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub props: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSecurity {
    /// Expected sha256 of the built artifact, hex encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default)]
    pub sandboxed: bool,
    #[serde(default)]
    pub network_access: bool,
    #[serde(default)]
    pub filesystem_access: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestHealth {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub interval_seconds: u64,
    #[serde(default)]
    pub timeout_seconds: u64,
}

/// On-disk layout of `plugin.toml`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestFile {
    plugin: IdentitySection,
    #[serde(default)]
    endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    ui_components: Vec<UiComponentConfig>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    permissions: Vec<String>,
    #[serde(default)]
    compatibility: BTreeMap<String, String>,
    #[serde(default)]
    configuration: PluginConfig,
    #[serde(default)]
    security: ManifestSecurity,
    #[serde(default)]
    health: ManifestHealth,
}

/// The `[plugin]` table. Missing identity fields default to empty so the
/// validator can report them by name.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct IdentitySection {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    author: String,
    homepage: Option<String>,
    repository: Option<String>,
    license: Option<String>,
}

/// Parse a plugin manifest from TOML content.
///
/// Only the syntax is checked here; semantic rules live in
/// [`crate::validator::ManifestValidator`].
pub fn parse_plugin_manifest(toml_content: &str) -> Result<PluginManifest, DynaplugError> {
    let file: ManifestFile = toml::from_str(toml_content)
        .map_err(|e| DynaplugError::Validation(format!("invalid plugin manifest: {e}")))?;

    let identity = file.plugin;
    Ok(PluginManifest {
        id: identity.id,
        name: identity.name,
        version: identity.version,
        description: identity.description,
        author: identity.author,
        homepage: identity.homepage,
        repository: identity.repository,
        license: identity.license,
        endpoints: file.endpoints,
        ui_components: file.ui_components,
        dependencies: file.dependencies,
        permissions: file.permissions,
        compatibility: file.compatibility,
        configuration: file.configuration,
        security: file.security,
        health: file.health,
    })
}

/// Read and parse a manifest file.
pub fn load_manifest(path: &Path) -> Result<PluginManifest, DynaplugError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            DynaplugError::NotFound(format!("manifest {}", path.display()))
        } else {
            DynaplugError::io(format!("failed to read manifest {}", path.display()), e)
        }
    })?;
    parse_plugin_manifest(&content)
}
