// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the dynaplug runtime.
//!
//! All structs use `#[serde(deny_unknown_fields)]` so a misspelt key fails
//! at startup with a suggestion instead of being silently ignored.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DynaplugConfig {
    /// HTTP server and logging settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Plugin directories, auto-load list, and security posture.
    #[serde(default)]
    pub plugins: PluginsConfig,

    /// Build orchestrator settings.
    #[serde(default)]
    pub build: BuildConfig,

    /// Remote source retrieval limits.
    #[serde(default)]
    pub acquire: AcquireConfig,

    /// Health monitor schedule and hysteresis thresholds.
    #[serde(default)]
    pub health: HealthConfig,

    /// Loader behaviour.
    #[serde(default)]
    pub loader: LoaderConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

/// How much a loaded plugin is trusted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Deserialize, Serialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    /// Sandboxed, no network, no filesystem.
    Strict,
    /// Network allowed, no filesystem.
    #[default]
    Normal,
    /// Network and filesystem allowed.
    Permissive,
}

/// Effective permissions derived from a [`SecurityMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SecurityPolicy {
    pub sandboxed: bool,
    pub network_access: bool,
    pub filesystem_access: bool,
}

impl SecurityMode {
    pub fn policy(self) -> SecurityPolicy {
        SecurityPolicy {
            sandboxed: self == SecurityMode::Strict,
            network_access: self != SecurityMode::Strict,
            filesystem_access: self == SecurityMode::Permissive,
        }
    }
}

/// Plugin storage, auto-loading, and trust configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PluginsConfig {
    /// Directory holding installed artifacts and manifests, named by plugin id.
    #[serde(default = "default_plugin_dir")]
    pub plugin_dir: String,

    /// Directory holding the content-hash build cache.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    /// Sources loaded at startup (repository URLs, artifact paths, or `local:<dir>`).
    #[serde(default)]
    pub auto_load: Vec<String>,

    /// Repository URL prefixes remote sources must start with. Empty allows any.
    #[serde(default)]
    pub allowed_repos: Vec<String>,

    /// Artifact size ceiling in bytes.
    #[serde(default = "default_max_plugin_size")]
    pub max_plugin_size: u64,

    #[serde(default = "default_true")]
    pub enable_health_checks: bool,

    #[serde(default)]
    pub security_mode: SecurityMode,

    /// Path prefix under which plugin endpoints are exposed.
    #[serde(default = "default_route_prefix")]
    pub route_prefix: String,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            plugin_dir: default_plugin_dir(),
            cache_dir: default_cache_dir(),
            auto_load: Vec::new(),
            allowed_repos: Vec::new(),
            max_plugin_size: default_max_plugin_size(),
            enable_health_checks: true,
            security_mode: SecurityMode::default(),
            route_prefix: default_route_prefix(),
        }
    }
}

fn default_plugin_dir() -> String {
    "./dynamic_plugins/cache".to_string()
}

fn default_cache_dir() -> String {
    "./dynamic_plugins/build_cache".to_string()
}

fn default_max_plugin_size() -> u64 {
    100 * 1024 * 1024
}

fn default_route_prefix() -> String {
    "/plugins".to_string()
}

fn default_true() -> bool {
    true
}

/// Build orchestrator configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    /// Root of the host workspace whose manifest and crates plugins build against.
    /// Defaults to the process working directory.
    #[serde(default)]
    pub host_root: Option<String>,

    /// Directory (relative to `host_root`) holding the host's crates.
    #[serde(default = "default_host_crates_dir")]
    pub host_crates_dir: String,

    /// Crate shared with plugins by path instead of through a private alias.
    #[serde(default = "default_interface_crate")]
    pub interface_crate: String,

    #[serde(default = "default_cargo_program")]
    pub cargo_program: String,

    /// Extra arguments appended to `cargo build`.
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Manifest file name expected at the root of a plugin source tree.
    #[serde(default = "default_manifest_file")]
    pub manifest_file: String,

    /// Primary source file expected in a plugin source tree.
    #[serde(default = "default_primary_source")]
    pub primary_source: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            host_root: None,
            host_crates_dir: default_host_crates_dir(),
            interface_crate: default_interface_crate(),
            cargo_program: default_cargo_program(),
            extra_args: Vec::new(),
            manifest_file: default_manifest_file(),
            primary_source: default_primary_source(),
        }
    }
}

fn default_host_crates_dir() -> String {
    "crates".to_string()
}

fn default_interface_crate() -> String {
    "dynaplug-core".to_string()
}

fn default_cargo_program() -> String {
    "cargo".to_string()
}

fn default_manifest_file() -> String {
    "plugin.toml".to_string()
}

fn default_primary_source() -> String {
    "src/lib.rs".to_string()
}

/// Remote source retrieval configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AcquireConfig {
    #[serde(default = "default_git_program")]
    pub git_program: String,

    /// Upper bound on a single `git clone`.
    #[serde(default = "default_clone_timeout_secs")]
    pub clone_timeout_secs: u64,

    /// Upper bound on the size of a cloned or copied source tree.
    #[serde(default = "default_max_source_bytes")]
    pub max_source_bytes: u64,

    /// Clone with `--depth 1`.
    #[serde(default = "default_true")]
    pub shallow_clone: bool,
}

impl Default for AcquireConfig {
    fn default() -> Self {
        Self {
            git_program: default_git_program(),
            clone_timeout_secs: default_clone_timeout_secs(),
            max_source_bytes: default_max_source_bytes(),
            shallow_clone: true,
        }
    }
}

fn default_git_program() -> String {
    "git".to_string()
}

fn default_clone_timeout_secs() -> u64 {
    300
}

fn default_max_source_bytes() -> u64 {
    100 * 1024 * 1024
}

/// Health monitor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HealthConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Per-probe timeout. Must be shorter than the interval.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Consecutive successes required to report healthy.
    #[serde(default = "default_healthy_threshold")]
    pub healthy_threshold: u32,

    /// Consecutive failures required to report unhealthy.
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            timeout_secs: default_timeout_secs(),
            healthy_threshold: default_healthy_threshold(),
            unhealthy_threshold: default_unhealthy_threshold(),
        }
    }
}

fn default_interval_secs() -> u64 {
    30
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_healthy_threshold() -> u32 {
    2
}

fn default_unhealthy_threshold() -> u32 {
    3
}

/// Loader configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoaderConfig {
    /// Reject a plugin whose self-reported id differs from its manifest id.
    /// When false the live id is used and a warning is logged.
    #[serde(default)]
    pub strict_identity: bool,
}
