// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Checks semantic constraints serde cannot express: a usable bind address,
//! non-empty directories, sane health thresholds, and a well-formed route
//! prefix.

use crate::diagnostic::ConfigError;
use crate::model::DynaplugConfig;

/// Validate a deserialized configuration for semantic correctness.
///
/// Collects every violation instead of stopping at the first one.
pub fn validate_config(config: &DynaplugConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut fail = |message: String| errors.push(ConfigError::Validation { message });

    let host = config.server.host.trim();
    if host.is_empty() {
        fail("server.host must not be empty".to_string());
    } else if host.parse::<std::net::IpAddr>().is_err()
        && !host
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        fail(format!(
            "server.host `{host}` is not a valid IP address or hostname"
        ));
    }

    if config.server.port == 0 {
        fail("server.port must be between 1 and 65535".to_string());
    }

    if config.plugins.plugin_dir.trim().is_empty() {
        fail("plugins.plugin_dir must not be empty".to_string());
    }
    if config.plugins.cache_dir.trim().is_empty() {
        fail("plugins.cache_dir must not be empty".to_string());
    }
    if !config.plugins.plugin_dir.trim().is_empty()
        && config.plugins.plugin_dir.trim() == config.plugins.cache_dir.trim()
    {
        fail("plugins.plugin_dir and plugins.cache_dir must be different directories".to_string());
    }
    if config.plugins.max_plugin_size == 0 {
        fail("plugins.max_plugin_size must be greater than 0".to_string());
    }

    let prefix = &config.plugins.route_prefix;
    if !prefix.starts_with('/') || (prefix.len() > 1 && prefix.ends_with('/')) {
        fail(format!(
            "plugins.route_prefix `{prefix}` must start with `/` and must not end with `/`"
        ));
    }
    if prefix.starts_with("/api/") || prefix == "/api" || prefix == "/" {
        fail(format!(
            "plugins.route_prefix `{prefix}` would shadow the runtime's own endpoints"
        ));
    }

    if config.build.interface_crate.trim().is_empty() {
        fail("build.interface_crate must not be empty".to_string());
    }
    if config.build.cargo_program.trim().is_empty() {
        fail("build.cargo_program must not be empty".to_string());
    }

    if config.acquire.clone_timeout_secs == 0 {
        fail("acquire.clone_timeout_secs must be at least 1".to_string());
    }
    if config.acquire.max_source_bytes == 0 {
        fail("acquire.max_source_bytes must be greater than 0".to_string());
    }

    let health = &config.health;
    if health.interval_secs == 0 {
        fail("health.interval_secs must be at least 1".to_string());
    }
    if health.timeout_secs == 0 {
        fail("health.timeout_secs must be at least 1".to_string());
    }
    if health.timeout_secs >= health.interval_secs && health.interval_secs > 0 {
        fail(format!(
            "health.timeout_secs ({}) must be shorter than health.interval_secs ({})",
            health.timeout_secs, health.interval_secs
        ));
    }
    if health.healthy_threshold < 1 {
        fail("health.healthy_threshold must be at least 1".to_string());
    }
    if health.unhealthy_threshold < 1 {
        fail("health.unhealthy_threshold must be at least 1".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
