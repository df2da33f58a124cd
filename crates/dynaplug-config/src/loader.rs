// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Lookup order: `./dynaplug.toml` > `~/.config/dynaplug/dynaplug.toml` >
//! `/etc/dynaplug/dynaplug.toml`, with `DYNAPLUG_*` environment overrides on
//! top and a handful of unprefixed compatibility variables applied last.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;
use std::str::FromStr;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use tracing::warn;

use crate::model::{DynaplugConfig, SecurityMode};

/// System-wide config file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/dynaplug/dynaplug.toml";

/// Config file in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "dynaplug.toml";

/// Load configuration from the standard hierarchy with env var overrides.
pub fn load_config() -> Result<DynaplugConfig, figment::Error> {
    let mut config: DynaplugConfig = build_figment().extract()?;
    apply_env_aliases(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Load configuration from a TOML string over compiled defaults only.
pub fn load_config_from_str(toml_content: &str) -> Result<DynaplugConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(DynaplugConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<DynaplugConfig, figment::Error> {
    let mut config: DynaplugConfig = Figment::new()
        .merge(Serialized::defaults(DynaplugConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()?;
    apply_env_aliases(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Build the Figment used for hierarchy loading, before extraction.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(DynaplugConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG_PATH))
        .merge(Toml::file(user_config_path().unwrap_or_default()))
        .merge(Toml::file(LOCAL_CONFIG_FILE))
        .merge(env_provider())
}

/// `~/.config/dynaplug/dynaplug.toml` on platforms that have a config dir.
pub fn user_config_path() -> Option<std::path::PathBuf> {
    dirs::config_dir().map(|d| d.join("dynaplug").join(LOCAL_CONFIG_FILE))
}

/// Maps `DYNAPLUG_SECTION_KEY` to `section.key`.
///
/// Uses `Env::map()` rather than `Env::split("_")` because keys themselves
/// contain underscores: `DYNAPLUG_PLUGINS_MAX_PLUGIN_SIZE` must become
/// `plugins.max_plugin_size`.
fn env_provider() -> Env {
    Env::prefixed("DYNAPLUG_").map(|key| {
        let key_str = key.as_str();
        let mapped = ["server", "plugins", "build", "acquire", "health", "loader"]
            .iter()
            .find_map(|section| {
                key_str
                    .strip_prefix(section)
                    .and_then(|rest| rest.strip_prefix('_'))
                    .map(|rest| format!("{section}.{rest}"))
            })
            .unwrap_or_else(|| key_str.to_string());
        mapped.into()
    })
}

/// Applies unprefixed variables kept for deployments that predate the
/// `DYNAPLUG_` prefix. `lookup` is `std::env::var` outside of tests.
///
/// - `PLUGIN_DIR` sets `plugins.plugin_dir`
/// - `PLUGIN_CACHE_DIR` sets `plugins.cache_dir`
/// - `PLUGIN_SECURITY_MODE` sets `plugins.security_mode`
/// - `AUTO_LOAD_PLUGINS` (comma-separated) replaces `plugins.auto_load`
pub fn apply_env_aliases<F>(config: &mut DynaplugConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(dir) = lookup("PLUGIN_DIR").filter(|v| !v.trim().is_empty()) {
        config.plugins.plugin_dir = dir;
    }
    if let Some(dir) = lookup("PLUGIN_CACHE_DIR").filter(|v| !v.trim().is_empty()) {
        config.plugins.cache_dir = dir;
    }
    if let Some(mode) = lookup("PLUGIN_SECURITY_MODE") {
        match SecurityMode::from_str(mode.trim()) {
            Ok(mode) => config.plugins.security_mode = mode,
            Err(_) => warn!(value = %mode, "ignoring unrecognised PLUGIN_SECURITY_MODE"),
        }
    }
    if let Some(list) = lookup("AUTO_LOAD_PLUGINS") {
        config.plugins.auto_load = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn aliases_override_plugin_settings() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("PLUGIN_DIR", "/srv/plugins"),
            ("PLUGIN_SECURITY_MODE", "strict"),
            ("AUTO_LOAD_PLUGINS", " https://github.com/a/b.git, ,local:./demo "),
        ]);
        let mut config = DynaplugConfig::default();
        apply_env_aliases(&mut config, |k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.plugins.plugin_dir, "/srv/plugins");
        assert_eq!(config.plugins.cache_dir, "./dynamic_plugins/build_cache");
        assert_eq!(config.plugins.security_mode, SecurityMode::Strict);
        assert_eq!(
            config.plugins.auto_load,
            vec!["https://github.com/a/b.git", "local:./demo"]
        );
    }

    #[test]
    fn invalid_security_alias_is_ignored() {
        let mut config = DynaplugConfig::default();
        apply_env_aliases(&mut config, |k| {
            (k == "PLUGIN_SECURITY_MODE").then(|| "lax".to_string())
        });
        assert_eq!(config.plugins.security_mode, SecurityMode::Normal);
    }

    #[test]
    fn prefixed_env_maps_to_sections() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("DYNAPLUG_SERVER_PORT", "9090");
            jail.set_env("DYNAPLUG_PLUGINS_MAX_PLUGIN_SIZE", "1024");
            jail.set_env("DYNAPLUG_HEALTH_UNHEALTHY_THRESHOLD", "5");
            let config: DynaplugConfig = Figment::new()
                .merge(Serialized::defaults(DynaplugConfig::default()))
                .merge(env_provider())
                .extract()?;
            assert_eq!(config.server.port, 9090);
            assert_eq!(config.plugins.max_plugin_size, 1024);
            assert_eq!(config.health.unhealthy_threshold, 5);
            Ok(())
        });
    }
}
