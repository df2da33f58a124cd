// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Rule checks over plugin manifests and built artifacts.
//!
//! Validation is pure: the first failing rule wins and is reported as a
//! [`DynaplugError::Validation`] (shape problems) or
//! [`DynaplugError::Security`] (size, checksum, sandbox).

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use dynaplug_config::SecurityPolicy;
use dynaplug_core::DynaplugError;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::manifest::{
    AuthConfig, EndpointConfig, PluginManifest, RateLimitConfig, RequestValidation,
    UiComponentConfig,
};

static PLUGIN_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{3,50}$").unwrap());
static VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v?\d+\.\d+\.\d+(-[A-Za-z0-9.-]+)?(\+[A-Za-z0-9.-]+)?$").unwrap()
});
static HANDLER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").unwrap());
static DEPENDENCY_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").unwrap());
static PERMISSION_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+\.[A-Za-z0-9_]+$").unwrap());
static CONFIG_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_.]*$").unwrap());
static VERSION_CONSTRAINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(>=|<=|>|<|~|\^)?v?\d+(\.\d+)?(\.\d+)?.*$").unwrap());

pub const SUPPORTED_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "PATCH", "OPTIONS"];

pub const COMPATIBILITY_KEYS: &[&str] = &["host", "rust", "kubernetes", "helm", "docker"];

pub const VALIDATION_CONTENT_TYPES: &[&str] = &[
    "application/json",
    "application/xml",
    "text/plain",
    "multipart/form-data",
];

const PERMISSION_RESOURCES: &[&str] = &[
    "cluster",
    "configmap",
    "secret",
    "namespace",
    "deployment",
    "service",
    "ingress",
    "pod",
    "node",
];

const PERMISSION_ACTIONS: &[&str] = &["read", "write", "delete"];

const SYSTEM_PERMISSIONS: &[&str] = &["admin.all", "system.metrics", "system.logs"];

/// Longest accepted string value in a manifest's configuration table.
pub const MAX_CONFIG_STRING_LEN: usize = 1000;

/// Native module extension of the host platform (`so`, `dylib`, or `dll`).
pub const NATIVE_EXTENSION: &str = std::env::consts::DLL_EXTENSION;

/// The full permission allow-list.
pub fn allowed_permissions() -> Vec<String> {
    PERMISSION_RESOURCES
        .iter()
        .flat_map(|r| PERMISSION_ACTIONS.iter().map(move |a| format!("{r}.{a}")))
        .chain(SYSTEM_PERMISSIONS.iter().map(|p| p.to_string()))
        .collect()
}

fn invalid(message: impl Into<String>) -> DynaplugError {
    DynaplugError::Validation(message.into())
}

/// Checks a plugin id against the id grammar.
pub fn validate_id(id: &str) -> Result<(), DynaplugError> {
    if !PLUGIN_ID.is_match(id) {
        return Err(invalid(format!(
            "plugin id `{id}` must be 3-50 characters of letters, digits, `-` or `_`"
        )));
    }
    Ok(())
}

/// Validates manifests and artifacts against the runtime's limits.
#[derive(Debug, Clone)]
pub struct ManifestValidator {
    pub max_endpoints: usize,
    pub max_dependencies: usize,
    pub max_permissions: usize,
    allowed_permissions: HashSet<String>,
}

impl Default for ManifestValidator {
    fn default() -> Self {
        Self {
            max_endpoints: 50,
            max_dependencies: 20,
            max_permissions: 30,
            allowed_permissions: allowed_permissions().into_iter().collect(),
        }
    }
}

impl ManifestValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check every manifest rule in order, stopping at the first violation.
    pub fn validate_manifest(&self, manifest: &PluginManifest) -> Result<(), DynaplugError> {
        for (field, value) in [
            ("id", &manifest.id),
            ("name", &manifest.name),
            ("version", &manifest.version),
            ("author", &manifest.author),
        ] {
            if value.trim().is_empty() {
                return Err(invalid(format!("plugin {field} is required")));
            }
        }

        validate_id(&manifest.id)?;
        if !VERSION.is_match(&manifest.version) {
            return Err(invalid(format!(
                "plugin version `{}` must follow semantic versioning (e.g. 1.0.0)",
                manifest.version
            )));
        }

        self.validate_endpoints(&manifest.endpoints)
            .map_err(|e| invalid(format!("endpoint validation failed: {e}")))?;
        validate_ui_components(&manifest.ui_components)
            .map_err(|e| invalid(format!("ui component validation failed: {e}")))?;
        self.validate_dependencies(&manifest.dependencies)
            .map_err(|e| invalid(format!("dependency validation failed: {e}")))?;
        self.validate_permissions(&manifest.permissions)
            .map_err(|e| invalid(format!("permission validation failed: {e}")))?;
        validate_compatibility(&manifest.compatibility)
            .map_err(|e| invalid(format!("compatibility validation failed: {e}")))?;
        validate_configuration(&manifest.configuration)
            .map_err(|e| invalid(format!("configuration validation failed: {e}")))?;

        Ok(())
    }

    fn validate_endpoints(&self, endpoints: &[EndpointConfig]) -> Result<(), String> {
        if endpoints.is_empty() {
            return Err("at least one endpoint is required".into());
        }
        if endpoints.len() > self.max_endpoints {
            return Err(format!(
                "too many endpoints ({}), maximum allowed is {}",
                endpoints.len(),
                self.max_endpoints
            ));
        }

        let mut routes = HashSet::new();
        let mut handlers = HashSet::new();
        for (i, endpoint) in endpoints.iter().enumerate() {
            if endpoint.path.is_empty() {
                return Err(format!("endpoint {i}: path is required"));
            }
            if endpoint.method.is_empty() {
                return Err(format!("endpoint {i}: method is required"));
            }
            if endpoint.handler.is_empty() {
                return Err(format!("endpoint {i}: handler is required"));
            }
            if !endpoint.path.starts_with('/') {
                return Err(format!("endpoint {i}: path must start with `/`"));
            }

            let method = endpoint.method.to_ascii_uppercase();
            if !SUPPORTED_METHODS.contains(&method.as_str()) {
                return Err(format!(
                    "endpoint {i}: unsupported http method `{}`",
                    endpoint.method
                ));
            }
            if !routes.insert(format!("{method} {}", endpoint.path)) {
                return Err(format!(
                    "endpoint {i}: duplicate path and method `{method} {}`",
                    endpoint.path
                ));
            }
            if !handlers.insert(endpoint.handler.as_str()) {
                return Err(format!(
                    "endpoint {i}: duplicate handler name `{}`",
                    endpoint.handler
                ));
            }
            if !HANDLER_NAME.is_match(&endpoint.handler) {
                return Err(format!(
                    "endpoint {i}: invalid handler name `{}`",
                    endpoint.handler
                ));
            }

            if let Some(limit) = &endpoint.rate_limit {
                validate_rate_limit(limit).map_err(|e| format!("endpoint {i}: {e}"))?;
            }
            if let Some(auth) = &endpoint.auth {
                validate_auth(auth).map_err(|e| format!("endpoint {i}: {e}"))?;
            }
            if let Some(validation) = &endpoint.validation {
                validate_request_validation(validation)
                    .map_err(|e| format!("endpoint {i}: {e}"))?;
            }
        }
        Ok(())
    }

    fn validate_dependencies(&self, dependencies: &[String]) -> Result<(), String> {
        if dependencies.len() > self.max_dependencies {
            return Err(format!(
                "too many dependencies ({}), maximum allowed is {}",
                dependencies.len(),
                self.max_dependencies
            ));
        }
        let mut seen = HashSet::new();
        for (i, dep) in dependencies.iter().enumerate() {
            if dep.is_empty() {
                return Err(format!("dependency {i}: empty dependency name"));
            }
            if !seen.insert(dep.as_str()) {
                return Err(format!("dependency {i}: duplicate dependency `{dep}`"));
            }
            if !DEPENDENCY_NAME.is_match(dep) {
                return Err(format!("dependency {i}: invalid dependency name `{dep}`"));
            }
        }
        Ok(())
    }

    fn validate_permissions(&self, permissions: &[String]) -> Result<(), String> {
        if permissions.len() > self.max_permissions {
            return Err(format!(
                "too many permissions ({}), maximum allowed is {}",
                permissions.len(),
                self.max_permissions
            ));
        }
        let mut seen = HashSet::new();
        for (i, perm) in permissions.iter().enumerate() {
            if perm.is_empty() {
                return Err(format!("permission {i}: empty permission name"));
            }
            if !seen.insert(perm.as_str()) {
                return Err(format!("permission {i}: duplicate permission `{perm}`"));
            }
            if !PERMISSION_NAME.is_match(perm) {
                return Err(format!("permission {i}: invalid permission format `{perm}`"));
            }
            if !self.allowed_permissions.contains(perm) {
                return Err(format!("permission {i}: permission `{perm}` is not allowed"));
            }
        }
        Ok(())
    }

    /// Check a built artifact before it is opened.
    ///
    /// `policy` is the host's effective security posture; the manifest's own
    /// `sandboxed` flag can only tighten it.
    pub fn validate_artifact(
        &self,
        path: &Path,
        manifest: &PluginManifest,
        max_size: u64,
        policy: SecurityPolicy,
    ) -> Result<(), DynaplugError> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DynaplugError::NotFound(format!("plugin artifact {}", path.display()))
            } else {
                DynaplugError::io(format!("failed to stat {}", path.display()), e)
            }
        })?;

        if metadata.len() > max_size {
            return Err(DynaplugError::Security(format!(
                "plugin size {} exceeds maximum allowed size {max_size}",
                metadata.len()
            )));
        }

        if let Some(expected) = manifest
            .security
            .checksum
            .as_deref()
            .filter(|c| !c.trim().is_empty())
        {
            let actual = sha256_file(path)?;
            if !actual.eq_ignore_ascii_case(expected.trim()) {
                return Err(DynaplugError::Security(format!(
                    "checksum mismatch: expected {expected}, got {actual}"
                )));
            }
        }

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        if extension != NATIVE_EXTENSION {
            return Err(invalid(format!(
                "plugin artifact must have the `.{NATIVE_EXTENSION}` extension, got `{}`",
                path.display()
            )));
        }

        validate_sandbox(manifest, policy)
    }
}

/// Rejects endpoints that advertise external access when the plugin runs
/// sandboxed without declared network access.
pub fn validate_sandbox(
    manifest: &PluginManifest,
    policy: SecurityPolicy,
) -> Result<(), DynaplugError> {
    let sandboxed = policy.sandboxed || manifest.security.sandboxed;
    if !sandboxed || manifest.security.network_access {
        return Ok(());
    }
    match manifest
        .endpoints
        .iter()
        .find(|e| e.description.to_ascii_lowercase().contains("external"))
    {
        Some(endpoint) => Err(DynaplugError::Security(format!(
            "endpoint {} appears to require external access but plugin is sandboxed",
            endpoint.path
        ))),
        None => Ok(()),
    }
}

/// Lower-case hex sha256 of a file.
pub fn sha256_file(path: &Path) -> Result<String, DynaplugError> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| DynaplugError::io(format!("failed to open {}", path.display()), e))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)
        .map_err(|e| DynaplugError::io(format!("failed to hash {}", path.display()), e))?;
    Ok(hex::encode(hasher.finalize()))
}

fn validate_rate_limit(limit: &RateLimitConfig) -> Result<(), String> {
    if !limit.enabled {
        return Ok(());
    }
    if limit.rpm <= 0 {
        return Err("rate limit rpm must be positive when enabled".into());
    }
    if limit.burst <= 0 {
        return Err("rate limit burst must be positive when enabled".into());
    }
    if limit.window_ms <= 0 {
        return Err("rate limit window must be positive when enabled".into());
    }
    Ok(())
}

fn validate_auth(auth: &AuthConfig) -> Result<(), String> {
    if auth.required
        && auth.roles.is_empty()
        && auth.permissions.is_empty()
        && auth.scopes.is_empty()
    {
        return Err(
            "auth requires at least one of roles, permissions, or scopes when required".into(),
        );
    }
    Ok(())
}

fn validate_request_validation(validation: &RequestValidation) -> Result<(), String> {
    if validation.required.iter().any(String::is_empty) {
        return Err("required field name cannot be empty".into());
    }
    if let Some(ct) = validation
        .content_type
        .iter()
        .find(|ct| !VALIDATION_CONTENT_TYPES.contains(&ct.as_str()))
    {
        return Err(format!("unsupported content type `{ct}`"));
    }
    Ok(())
}

fn validate_ui_components(components: &[UiComponentConfig]) -> Result<(), String> {
    let mut names = HashSet::new();
    let mut routes = HashSet::new();
    for (i, component) in components.iter().enumerate() {
        if component.name.is_empty() {
            return Err(format!("ui component {i}: name is required"));
        }
        if component.route.is_empty() {
            return Err(format!("ui component {i}: route is required"));
        }
        if component.component.is_empty() {
            return Err(format!("ui component {i}: component is required"));
        }
        if !names.insert(component.name.as_str()) {
            return Err(format!("ui component {i}: duplicate name `{}`", component.name));
        }
        if !routes.insert(component.route.as_str()) {
            return Err(format!("ui component {i}: duplicate route `{}`", component.route));
        }
        if !component.route.starts_with('/') {
            return Err(format!("ui component {i}: route must start with `/`"));
        }
    }
    Ok(())
}

fn validate_compatibility(
    compatibility: &std::collections::BTreeMap<String, String>,
) -> Result<(), String> {
    for (key, value) in compatibility {
        if !COMPATIBILITY_KEYS.contains(&key.as_str()) {
            return Err(format!("unsupported compatibility key `{key}`"));
        }
        if value.is_empty() {
            return Err(format!("compatibility value for `{key}` cannot be empty"));
        }
        if !VERSION_CONSTRAINT.is_match(value) {
            return Err(format!("invalid version constraint for `{key}`: `{value}`"));
        }
    }
    Ok(())
}

fn validate_configuration(
    config: &serde_json::Map<String, serde_json::Value>,
) -> Result<(), String> {
    for (key, value) in config {
        if key.is_empty() {
            return Err("configuration key cannot be empty".into());
        }
        if !CONFIG_KEY.is_match(key) {
            return Err(format!("invalid configuration key format `{key}`"));
        }
        match value {
            serde_json::Value::Null => {
                return Err(format!("configuration value for `{key}` cannot be null"));
            }
            serde_json::Value::String(s) if s.chars().count() > MAX_CONFIG_STRING_LEN => {
                return Err(format!(
                    "configuration string value for `{key}` is too long (max {MAX_CONFIG_STRING_LEN} characters)"
                ));
            }
            serde_json::Value::Object(nested) => {
                validate_configuration(nested)
                    .map_err(|e| format!("nested configuration for `{key}`: {e}"))?;
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{ManifestSecurity, RequestValidation};
    use dynaplug_config::SecurityMode;
    use std::io::Write;

    fn endpoint(method: &str, path: &str, handler: &str) -> EndpointConfig {
        EndpointConfig {
            path: path.into(),
            method: method.into(),
            handler: handler.into(),
            ..Default::default()
        }
    }

    fn valid_manifest() -> PluginManifest {
        PluginManifest {
            id: "sample-analytics".into(),
            name: "Sample Analytics".into(),
            version: "1.0.0".into(),
            author: "tests".into(),
            endpoints: vec![
                endpoint("GET", "/data", "get_data"),
                endpoint("GET", "/metrics", "get_metrics"),
            ],
            ..Default::default()
        }
    }

    fn check(manifest: &PluginManifest) -> Result<(), DynaplugError> {
        ManifestValidator::new().validate_manifest(manifest)
    }

    #[test]
    fn valid_manifest_passes() {
        assert!(check(&valid_manifest()).is_ok());
    }

    #[test]
    fn missing_author_is_named() {
        let mut m = valid_manifest();
        m.author.clear();
        let err = check(&m).unwrap_err();
        assert_eq!(err.to_string(), "validation failed: plugin author is required");
    }

    #[test]
    fn id_grammar() {
        let too_long = "x".repeat(51);
        for id in ["ab", "has space", "dots.not.allowed", too_long.as_str()] {
            let mut m = valid_manifest();
            m.id = id.to_string();
            assert!(check(&m).is_err(), "id {id:?} should be rejected");
        }
        let mut m = valid_manifest();
        m.id = "a_b-C".into();
        assert!(check(&m).is_ok());
        assert!(validate_id("../admin x").is_err());
    }

    #[test]
    fn version_grammar() {
        for ok in ["1.0.0", "v2.3.4", "1.0.0-rc.1", "1.0.0+build.5", "1.0.0-beta+exp.sha"] {
            let mut m = valid_manifest();
            m.version = ok.into();
            assert!(check(&m).is_ok(), "{ok} should be accepted");
        }
        for bad in ["1.0", "1.0.0.0", "one.two.three", "1.0.0-"] {
            let mut m = valid_manifest();
            m.version = bad.into();
            assert!(check(&m).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn duplicate_method_and_path_rejected() {
        let mut m = valid_manifest();
        m.endpoints = vec![endpoint("GET", "/x", "a"), endpoint("get", "/x", "b")];
        let err = check(&m).unwrap_err();
        assert!(err.to_string().contains("duplicate path and method"));
    }

    #[test]
    fn same_path_different_method_is_fine() {
        let mut m = valid_manifest();
        m.endpoints = vec![endpoint("GET", "/x", "a"), endpoint("POST", "/x", "b")];
        assert!(check(&m).is_ok());
    }

    #[test]
    fn duplicate_handler_rejected() {
        let mut m = valid_manifest();
        m.endpoints = vec![endpoint("GET", "/a", "h"), endpoint("GET", "/b", "h")];
        assert!(check(&m).unwrap_err().to_string().contains("duplicate handler"));
    }

    #[test]
    fn endpoint_shape_rules() {
        let cases = [
            (endpoint("GET", "", "h"), "path is required"),
            (endpoint("", "/a", "h"), "method is required"),
            (endpoint("GET", "/a", ""), "handler is required"),
            (endpoint("GET", "a", "h"), "must start with"),
            (endpoint("TRACE", "/a", "h"), "unsupported http method"),
            (endpoint("GET", "/a", "9lives"), "invalid handler name"),
        ];
        for (ep, expected) in cases {
            let mut m = valid_manifest();
            m.endpoints = vec![ep];
            let err = check(&m).unwrap_err().to_string();
            assert!(err.contains(expected), "{err} should contain {expected}");
        }
    }

    #[test]
    fn endpoint_count_bounds() {
        let mut m = valid_manifest();
        m.endpoints.clear();
        assert!(check(&m).unwrap_err().to_string().contains("at least one endpoint"));

        m.endpoints = (0..51)
            .map(|i| endpoint("GET", &format!("/e{i}"), &format!("h{i}")))
            .collect();
        assert!(check(&m).unwrap_err().to_string().contains("too many endpoints"));

        m.endpoints.truncate(50);
        assert!(check(&m).is_ok());
    }

    #[test]
    fn enabled_rate_limit_needs_positive_values() {
        let mut m = valid_manifest();
        m.endpoints[0].rate_limit = Some(RateLimitConfig {
            enabled: true,
            rpm: 10,
            burst: 0,
            window_ms: 1000,
        });
        assert!(check(&m).unwrap_err().to_string().contains("burst"));

        m.endpoints[0].rate_limit = Some(RateLimitConfig::default());
        assert!(check(&m).is_ok());
    }

    #[test]
    fn required_auth_needs_a_grant() {
        let mut m = valid_manifest();
        m.endpoints[0].auth = Some(AuthConfig {
            required: true,
            ..Default::default()
        });
        assert!(check(&m).is_err());

        m.endpoints[0].auth = Some(AuthConfig {
            required: true,
            scopes: vec!["read".into()],
            ..Default::default()
        });
        assert!(check(&m).is_ok());
    }

    #[test]
    fn validation_content_types_are_restricted() {
        let mut m = valid_manifest();
        m.endpoints[0].validation = Some(RequestValidation {
            content_type: vec!["application/yaml".into()],
            ..Default::default()
        });
        assert!(check(&m).unwrap_err().to_string().contains("unsupported content type"));
    }

    #[test]
    fn dependency_rules() {
        let mut m = valid_manifest();
        m.dependencies = vec!["serde".into(), "serde".into()];
        assert!(check(&m).unwrap_err().to_string().contains("duplicate dependency"));

        m.dependencies = vec!["bad name".into()];
        assert!(check(&m).is_err());

        m.dependencies = (0..21).map(|i| format!("dep{i}")).collect();
        assert!(check(&m).unwrap_err().to_string().contains("too many dependencies"));
    }

    #[test]
    fn permission_rules() {
        let mut m = valid_manifest();
        m.permissions = vec!["pod.read".into(), "admin.all".into()];
        assert!(check(&m).is_ok());

        m.permissions = vec!["pod.execute".into()];
        assert!(check(&m).unwrap_err().to_string().contains("not allowed"));

        m.permissions = vec!["podread".into()];
        assert!(check(&m).unwrap_err().to_string().contains("invalid permission format"));

        m.permissions = vec!["pod.read".into(), "pod.read".into()];
        assert!(check(&m).unwrap_err().to_string().contains("duplicate permission"));

        m.permissions = vec!["pod.read".to_string(); 31];
        assert!(check(&m).unwrap_err().to_string().contains("too many permissions"));
    }

    #[test]
    fn allow_list_has_expected_size() {
        assert_eq!(allowed_permissions().len(), 9 * 3 + 3);
    }

    #[test]
    fn ui_component_rules() {
        let component = |name: &str, route: &str| UiComponentConfig {
            name: name.into(),
            route: route.into(),
            component: "Dashboard".into(),
            ..Default::default()
        };
        let mut m = valid_manifest();
        m.ui_components = vec![component("a", "/a"), component("b", "/a")];
        assert!(check(&m).unwrap_err().to_string().contains("duplicate route"));

        m.ui_components = vec![component("a", "a")];
        assert!(check(&m).unwrap_err().to_string().contains("route must start"));

        m.ui_components = vec![component("a", "/a"), component("b", "/b")];
        assert!(check(&m).is_ok());
    }

    #[test]
    fn compatibility_rules() {
        let mut m = valid_manifest();
        m.compatibility.insert("host".into(), ">=0.1.0".into());
        m.compatibility.insert("kubernetes".into(), "^1.28".into());
        assert!(check(&m).is_ok());

        m.compatibility.insert("python".into(), "3".into());
        assert!(check(&m).unwrap_err().to_string().contains("unsupported compatibility key"));

        m.compatibility.remove("python");
        m.compatibility.insert("helm".into(), "latest".into());
        assert!(check(&m).unwrap_err().to_string().contains("invalid version constraint"));
    }

    #[test]
    fn configuration_rules() {
        let mut m = valid_manifest();
        m.configuration.insert(
            "limits".into(),
            serde_json::json!({"max_rows": 10, "mode": "fast"}),
        );
        assert!(check(&m).is_ok());

        m.configuration
            .insert("nested".into(), serde_json::json!({"inner": null}));
        assert!(check(&m).unwrap_err().to_string().contains("cannot be null"));

        m.configuration.remove("nested");
        m.configuration
            .insert("blob".into(), serde_json::json!("x".repeat(1001)));
        assert!(check(&m).unwrap_err().to_string().contains("too long"));

        m.configuration.remove("blob");
        m.configuration.insert("1bad".into(), serde_json::json!(1));
        assert!(check(&m).unwrap_err().to_string().contains("invalid configuration key"));
    }

    fn artifact(bytes: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("plugin.{NATIVE_EXTENSION}"));
        std::fs::File::create(&path).unwrap().write_all(bytes).unwrap();
        (dir, path)
    }

    #[test]
    fn artifact_size_ceiling() {
        let (_dir, path) = artifact(&[0u8; 64]);
        let policy = SecurityMode::Normal.policy();
        let v = ManifestValidator::new();
        assert!(v.validate_artifact(&path, &valid_manifest(), 64, policy).is_ok());
        let err = v.validate_artifact(&path, &valid_manifest(), 63, policy).unwrap_err();
        assert!(matches!(err, DynaplugError::Security(_)));
    }

    #[test]
    fn artifact_checksum_is_case_insensitive() {
        let (_dir, path) = artifact(b"hello");
        let digest = sha256_file(&path).unwrap();
        let mut m = valid_manifest();
        m.security = ManifestSecurity {
            checksum: Some(digest.to_ascii_uppercase()),
            ..Default::default()
        };
        let v = ManifestValidator::new();
        let policy = SecurityMode::Normal.policy();
        assert!(v.validate_artifact(&path, &m, 1024, policy).is_ok());

        m.security.checksum = Some("00".repeat(32));
        let err = v.validate_artifact(&path, &m, 1024, policy).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn artifact_extension_must_be_native() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin.bin");
        std::fs::write(&path, b"x").unwrap();
        let err = ManifestValidator::new()
            .validate_artifact(&path, &valid_manifest(), 1024, SecurityMode::Normal.policy())
            .unwrap_err();
        assert!(matches!(err, DynaplugError::Validation(_)));
    }

    #[test]
    fn sandbox_rejects_external_endpoints() {
        let mut m = valid_manifest();
        m.endpoints[0].description = "Calls an EXTERNAL api".into();

        assert!(validate_sandbox(&m, SecurityMode::Normal.policy()).is_ok());
        let err = validate_sandbox(&m, SecurityMode::Strict.policy()).unwrap_err();
        assert!(matches!(err, DynaplugError::Security(_)));

        m.security.sandboxed = true;
        assert!(validate_sandbox(&m, SecurityMode::Permissive.policy()).is_err());

        m.security.network_access = true;
        assert!(validate_sandbox(&m, SecurityMode::Strict.policy()).is_ok());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn ids_matching_grammar_are_accepted(id in "[A-Za-z0-9_-]{3,50}") {
                let mut m = valid_manifest();
                m.id = id;
                prop_assert!(check(&m).is_ok());
            }

            #[test]
            fn short_ids_are_rejected(id in "[A-Za-z0-9_-]{0,2}") {
                let mut m = valid_manifest();
                m.id = id;
                prop_assert!(check(&m).is_err());
            }
        }
    }
}
