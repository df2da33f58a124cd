// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Build pipeline tests driven by a scripted stand-in for cargo.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dynaplug_config::model::{AcquireConfig, BuildConfig};
use dynaplug_config::DynaplugConfig;
use dynaplug_core::DynaplugError;
use dynaplug_plugin::{
    BuildCache, BuildOrchestrator, PluginEvent, PluginManager, SourceAcquirer,
};
use dynaplug_test_utils::fixtures::{write_host_workspace, write_plugin_source};
use dynaplug_test_utils::test_manifest_toml;

const PLUGIN_ID: &str = "mock-plugin";

fn artifact_file() -> String {
    format!(
        "{}dynaplug_plugin_mock_plugin.{}",
        std::env::consts::DLL_PREFIX,
        std::env::consts::DLL_EXTENSION
    )
}

fn write_script(path: &Path, body: &str) {
    std::fs::write(path, format!("#!/bin/sh\n{body}")).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// A cargo stand-in that logs each run and drops a fake artifact.
fn succeeding_cargo(dir: &Path) -> (PathBuf, PathBuf) {
    let script = dir.join("fake-cargo");
    let log = dir.join("cargo.log");
    write_script(
        &script,
        &format!(
            r#"echo run >> "{log}"
target=""
while [ $# -gt 0 ]; do
  if [ "$1" = "--target-dir" ]; then target="$2"; fi
  shift
done
mkdir -p "$target/release"
printf 'not really a library' > "$target/release/{artifact}"
echo "Finished release"
"#,
            log = log.display(),
            artifact = artifact_file(),
        ),
    );
    (script, log)
}

fn failing_cargo(dir: &Path) -> PathBuf {
    let script = dir.join("broken-cargo");
    write_script(
        &script,
        "echo \"Compiling mock-plugin\"\necho \"error[E0425]: cannot find value `x`\" >&2\nexit 101\n",
    );
    script
}

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
    host: PathBuf,
    source: PathBuf,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let host = root.join("host");
    let source = root.join("plugin-src");
    std::fs::create_dir_all(&host).unwrap();
    write_host_workspace(&host).unwrap();
    write_plugin_source(&source, &test_manifest_toml(PLUGIN_ID)).unwrap();
    Fixture {
        _dir: dir,
        root,
        host,
        source,
    }
}

fn build_config(fx: &Fixture, cargo: &Path) -> BuildConfig {
    BuildConfig {
        host_root: Some(fx.host.display().to_string()),
        cargo_program: cargo.display().to_string(),
        ..BuildConfig::default()
    }
}

fn run_count(log: &Path) -> usize {
    std::fs::read_to_string(log)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

#[tokio::test]
async fn build_installs_artifact_and_reuses_cache() {
    let fx = fixture();
    let (cargo, log) = succeeding_cargo(&fx.root);
    let config = build_config(&fx, &cargo);
    let acquirer = SourceAcquirer::new(AcquireConfig::default(), Vec::new(), &config);
    let cache = Arc::new(BuildCache::open(fx.root.join("cache")).unwrap());
    let plugin_dir = fx.root.join("plugins");
    let builder = BuildOrchestrator::new(config, &plugin_dir, Arc::clone(&cache)).unwrap();

    let workspace = acquirer.copy_directory(&fx.source).await.unwrap();
    let built = builder.build(&workspace).await.unwrap();
    assert!(!built.from_cache);
    assert_eq!(built.name, PLUGIN_ID);
    assert_eq!(
        built.artifact,
        plugin_dir.join(format!("{PLUGIN_ID}.{}", std::env::consts::DLL_EXTENSION))
    );
    assert!(built.artifact.is_file());
    assert!(plugin_dir.join(format!("{PLUGIN_ID}.toml")).is_file());
    assert_eq!(run_count(&log), 1);
    assert_eq!(cache.len(), 1);

    let rewritten = std::fs::read_to_string(workspace.root().join("src/lib.rs")).unwrap();
    assert!(rewritten.contains("plughost_dynaplug_config"));
    drop(workspace);

    let again = acquirer.copy_directory(&fx.source).await.unwrap();
    let cached = builder.build(&again).await.unwrap();
    assert!(cached.from_cache);
    assert_eq!(run_count(&log), 1);
}

#[tokio::test]
async fn changed_source_misses_cache() {
    let fx = fixture();
    let (cargo, log) = succeeding_cargo(&fx.root);
    let config = build_config(&fx, &cargo);
    let acquirer = SourceAcquirer::new(AcquireConfig::default(), Vec::new(), &config);
    let cache = Arc::new(BuildCache::open(fx.root.join("cache")).unwrap());
    let builder = BuildOrchestrator::new(config, fx.root.join("plugins"), cache).unwrap();

    let ws = acquirer.copy_directory(&fx.source).await.unwrap();
    builder.build(&ws).await.unwrap();

    std::fs::write(fx.source.join("src/lib.rs"), "pub fn changed() {}\n").unwrap();
    let ws = acquirer.copy_directory(&fx.source).await.unwrap();
    let rebuilt = builder.build(&ws).await.unwrap();
    assert!(!rebuilt.from_cache);
    assert_eq!(run_count(&log), 2);
}

#[tokio::test]
async fn compiler_failure_carries_output() {
    let fx = fixture();
    let cargo = failing_cargo(&fx.root);
    let config = build_config(&fx, &cargo);
    let acquirer = SourceAcquirer::new(AcquireConfig::default(), Vec::new(), &config);
    let cache = Arc::new(BuildCache::open(fx.root.join("cache")).unwrap());
    let plugin_dir = fx.root.join("plugins");
    let builder = BuildOrchestrator::new(config, &plugin_dir, Arc::clone(&cache)).unwrap();

    let ws = acquirer.copy_directory(&fx.source).await.unwrap();
    let err = builder.build(&ws).await.unwrap_err();
    let output = err.build_output().unwrap();
    assert!(output.contains("Compiling mock-plugin"));
    assert!(output.contains("error[E0425]"));
    assert!(cache.is_empty());
    assert!(!plugin_dir.join(format!("{PLUGIN_ID}.toml")).exists());
}

#[tokio::test]
async fn invalid_manifest_stops_before_compiling() {
    let fx = fixture();
    let (cargo, log) = succeeding_cargo(&fx.root);
    std::fs::write(
        fx.source.join("plugin.toml"),
        "[plugin]\nid = \"x\"\nname = \"X\"\nversion = \"1.0.0\"\nauthor = \"a\"\n",
    )
    .unwrap();
    let config = build_config(&fx, &cargo);
    let acquirer = SourceAcquirer::new(AcquireConfig::default(), Vec::new(), &config);
    let cache = Arc::new(BuildCache::open(fx.root.join("cache")).unwrap());
    let builder = BuildOrchestrator::new(config, fx.root.join("plugins"), cache).unwrap();

    let ws = acquirer.copy_directory(&fx.source).await.unwrap();
    let err = builder.build(&ws).await.unwrap_err();
    assert!(matches!(err, DynaplugError::Validation(_)));
    assert_eq!(run_count(&log), 0);
}

#[tokio::test]
async fn manager_reports_unloadable_artifact() {
    let fx = fixture();
    let (cargo, _) = succeeding_cargo(&fx.root);
    let mut config = DynaplugConfig::default();
    config.plugins.plugin_dir = fx.root.join("plugins").display().to_string();
    config.plugins.cache_dir = fx.root.join("cache").display().to_string();
    config.build = build_config(&fx, &cargo);

    let manager = PluginManager::new(config).unwrap();
    let mut events = manager.events().subscribe();
    let err = manager
        .load(&format!("local:{}", fx.source.display()), None)
        .await
        .unwrap_err();
    assert!(matches!(err, DynaplugError::Runtime { .. }));
    assert!(manager.list().is_empty());
    assert_eq!(manager.cache_info().cache_size, 1);

    assert!(matches!(events.try_recv().unwrap(), PluginEvent::Loading { .. }));
    assert!(matches!(events.try_recv().unwrap(), PluginEvent::LoadFailed { .. }));
}
