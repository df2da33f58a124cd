// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the dynaplug configuration system.

use std::io::Write;

use dynaplug_config::diagnostic::ConfigError;
use dynaplug_config::model::SecurityMode;
use dynaplug_config::{load_and_validate_path, load_and_validate_str, load_config_from_str};

#[test]
fn full_toml_deserializes() {
    let toml = r#"
[server]
host = "0.0.0.0"
port = 9000
log_level = "debug"

[plugins]
plugin_dir = "/var/lib/dynaplug/plugins"
cache_dir = "/var/cache/dynaplug"
auto_load = ["https://github.com/acme/analytics.git"]
allowed_repos = ["https://github.com/acme/"]
max_plugin_size = 2048
enable_health_checks = false
security_mode = "strict"
route_prefix = "/ext"

[build]
host_root = "/src/host"
extra_args = ["--offline"]

[acquire]
clone_timeout_secs = 60
shallow_clone = false

[health]
interval_secs = 10
timeout_secs = 2

[loader]
strict_identity = true
"#;

    let config = load_config_from_str(toml).expect("valid TOML should deserialize");
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.plugins.auto_load.len(), 1);
    assert_eq!(config.plugins.allowed_repos, vec!["https://github.com/acme/"]);
    assert_eq!(config.plugins.max_plugin_size, 2048);
    assert!(!config.plugins.enable_health_checks);
    assert_eq!(config.plugins.security_mode, SecurityMode::Strict);
    assert_eq!(config.plugins.route_prefix, "/ext");
    assert_eq!(config.build.host_root.as_deref(), Some("/src/host"));
    assert_eq!(config.build.extra_args, vec!["--offline"]);
    assert_eq!(config.acquire.clone_timeout_secs, 60);
    assert!(!config.acquire.shallow_clone);
    assert_eq!(config.health.interval_secs, 10);
    assert!(config.loader.strict_identity);
}

#[test]
fn empty_toml_uses_defaults() {
    let config = load_and_validate_str("").expect("defaults must validate");
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.plugins.route_prefix, "/plugins");
    assert_eq!(config.plugins.security_mode, SecurityMode::Normal);
}

#[test]
fn unknown_key_gets_suggestion() {
    let toml = r#"
[health]
interval_sec = 10
"#;

    let errors = load_and_validate_str(toml).expect_err("unknown key must fail");
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        ConfigError::UnknownKey {
            key, suggestion, ..
        } => {
            assert_eq!(key, "interval_sec");
            assert_eq!(suggestion.as_deref(), Some("interval_secs"));
        }
        other => panic!("expected UnknownKey, got {other:?}"),
    }
}

#[test]
fn wrong_type_is_reported() {
    let toml = r#"
[server]
port = "eighty"
"#;
    let errors = load_and_validate_str(toml).expect_err("bad type must fail");
    match &errors[0] {
        ConfigError::InvalidType { key, .. } => assert_eq!(key, "server.port"),
        other => panic!("expected InvalidType, got {other:?}"),
    }
}

#[test]
fn explicit_path_wrong_type_points_at_key() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, r#"[server]
host = "0.0.0.0"
port = "eighty""#).unwrap();

    let errors = load_and_validate_path(file.path()).expect_err("bad type must fail");
    match &errors[0] {
        ConfigError::InvalidType { span, src, .. } => {
            let span = span.expect("span should point into the file");
            assert_eq!(span.offset(), "[server]\nhost = \"0.0.0.0\"\n".len());
            assert_eq!(span.len(), "port".len());
            assert!(src.is_some());
        }
        other => panic!("expected InvalidType, got {other:?}"),
    }
}

#[test]
fn invalid_security_mode_is_rejected() {
    let toml = r#"
[plugins]
security_mode = "paranoid"
"#;
    assert!(load_and_validate_str(toml).is_err());
}

#[test]
fn semantic_errors_surface_as_validation() {
    let toml = r#"
[plugins]
route_prefix = "/api"
"#;
    let errors = load_and_validate_str(toml).expect_err("shadowing prefix must fail");
    assert!(matches!(errors[0], ConfigError::Validation { .. }));
    assert!(errors[0].to_string().contains("route_prefix"));
}

#[test]
fn explicit_path_is_loaded() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[server]\nport = 7070").unwrap();

    let config = load_and_validate_path(file.path()).expect("file config must validate");
    assert_eq!(config.server.port, 7070);
}

#[test]
fn explicit_path_unknown_key_points_at_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[plugins]\nplugin_dri = \"x\"").unwrap();

    let errors = load_and_validate_path(file.path()).expect_err("unknown key must fail");
    match &errors[0] {
        ConfigError::UnknownKey { suggestion, .. } => {
            assert_eq!(suggestion.as_deref(), Some("plugin_dir"));
        }
        other => panic!("expected UnknownKey, got {other:?}"),
    }
}
