// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Load, route registration, and unload through the loader and manager.

use std::sync::Arc;

use dynaplug_config::DynaplugConfig;
use dynaplug_core::{
    DynaplugError, HealthState, HttpMethod, PluginExport, PluginRequest, PluginState,
};
use dynaplug_plugin::{
    parse_plugin_manifest, LoaderSettings, PluginEvent, PluginLoader, PluginManager,
    PluginRegistry, RouteRegistrar, RouteTable, RouteTarget, FALLBACK_DESCRIPTION,
};
use dynaplug_test_utils::{
    sample_analytics_manifest_toml, test_manifest_toml, MockControl, MockPlugin, OpaqueMock,
};

fn loader_with(settings: LoaderSettings) -> (PluginLoader, Arc<PluginRegistry>, Arc<RouteTable>) {
    let registry = Arc::new(PluginRegistry::new());
    let routes = Arc::new(RouteTable::new());
    let registrar: Arc<dyn RouteRegistrar> = routes.clone();
    (
        PluginLoader::new(Arc::clone(&registry), registrar, settings),
        registry,
        routes,
    )
}

fn loader() -> (PluginLoader, Arc<PluginRegistry>, Arc<RouteTable>) {
    loader_with(LoaderSettings::default())
}

fn manager_config(dir: &std::path::Path) -> DynaplugConfig {
    let mut config = DynaplugConfig::default();
    config.plugins.plugin_dir = dir.join("plugins").display().to_string();
    config.plugins.cache_dir = dir.join("cache").display().to_string();
    config.build.host_root = Some(dir.display().to_string());
    config
}

#[test]
fn sample_analytics_loads_with_two_routes() {
    let (loader, registry, routes) = loader();
    let manifest = parse_plugin_manifest(&sample_analytics_manifest_toml()).unwrap();

    let entry = loader
        .load_in_process(Box::new(MockPlugin::new("sample-analytics")), manifest)
        .unwrap();

    let status = registry.status("sample-analytics").unwrap();
    assert_eq!(status.state, PluginState::Loaded);
    assert_eq!(status.health, HealthState::Unknown);
    assert_eq!(
        entry.routes,
        vec![
            "GET /plugins/sample-analytics/data",
            "GET /plugins/sample-analytics/metrics",
        ]
    );
    assert_eq!(routes.len(), 2);
    assert!(routes.contains("GET /plugins/sample-analytics/metrics"));
}

#[test]
fn duplicate_endpoint_is_rejected_before_anything_registers() {
    let (loader, registry, routes) = loader();
    let mut manifest = parse_plugin_manifest(&test_manifest_toml("dup-plugin")).unwrap();
    let mut copy = manifest.endpoints[0].clone();
    copy.handler = "get_metrics".into();
    manifest.endpoints.push(copy);

    let err = loader
        .load_in_process(Box::new(MockPlugin::new("dup-plugin")), manifest)
        .unwrap_err();
    assert!(matches!(err, DynaplugError::Validation(_)));
    assert!(err.to_string().contains("duplicate path and method"));
    assert!(registry.is_empty());
    assert!(routes.is_empty());
}

#[test]
fn unloading_unknown_plugin_is_not_found() {
    let (loader, _, _) = loader();
    assert!(matches!(
        loader.unload("ghost-plugin"),
        Err(DynaplugError::NotFound(_))
    ));
}

#[test]
fn second_load_of_same_id_conflicts() {
    let (loader, registry, routes) = loader();
    let manifest = parse_plugin_manifest(&test_manifest_toml("twice-plugin")).unwrap();
    loader
        .load_in_process(Box::new(MockPlugin::new("twice-plugin")), manifest.clone())
        .unwrap();
    let before = routes.len();

    let err = loader
        .load_in_process(Box::new(MockPlugin::new("twice-plugin")), manifest)
        .unwrap_err();
    assert!(matches!(err, DynaplugError::Conflict(_)));
    assert_eq!(registry.len(), 1);
    assert_eq!(routes.len(), before);
}

#[test]
fn unload_runs_cleanup_and_frees_routes() {
    let (loader, registry, routes) = loader();
    let plugin = MockPlugin::new("gone-plugin").failing_cleanup();
    let control = plugin.control();
    let manifest = parse_plugin_manifest(&test_manifest_toml("gone-plugin")).unwrap();
    loader.load_in_process(Box::new(plugin), manifest).unwrap();
    assert_eq!(routes.len(), 5);

    loader.unload("gone-plugin").unwrap();
    assert_eq!(MockControl::count(&control.cleanup_calls), 1);
    assert!(registry.get("gone-plugin").is_none());
    assert!(registry.status("gone-plugin").is_none());
    assert!(routes.is_empty());
}

#[test]
fn already_initialized_plugin_still_loads() {
    let (loader, registry, _) = loader();
    let plugin = MockPlugin::new("warm-plugin").already_initialized();
    let control = plugin.control();
    let manifest = parse_plugin_manifest(&test_manifest_toml("warm-plugin")).unwrap();

    loader.load_in_process(Box::new(plugin), manifest).unwrap();
    assert_eq!(MockControl::count(&control.init_calls), 1);
    assert_eq!(
        registry.status("warm-plugin").unwrap().state,
        PluginState::Loaded
    );
}

#[test]
fn failing_init_aborts_load() {
    let (loader, registry, routes) = loader();
    let manifest = parse_plugin_manifest(&test_manifest_toml("cold-plugin")).unwrap();
    let err = loader
        .load_in_process(Box::new(MockPlugin::new("cold-plugin").failing_init()), manifest)
        .unwrap_err();
    assert!(matches!(err, DynaplugError::Runtime { .. }));
    assert!(err.to_string().contains("missing api key"));
    assert!(registry.is_empty());
    assert!(routes.is_empty());
}

#[test]
fn endpoint_without_handler_is_skipped() {
    let (loader, _, routes) = loader();
    let manifest = parse_plugin_manifest(&test_manifest_toml("partial-plugin")).unwrap();
    let entry = loader
        .load_in_process(
            Box::new(MockPlugin::new("partial-plugin").without_handler("echo")),
            manifest,
        )
        .unwrap();
    assert_eq!(entry.routes.len(), 4);
    assert!(!routes.contains("POST /plugins/partial-plugin/echo"));
    assert!(routes.contains("GET /plugins/partial-plugin/data"));
}

#[test]
fn opaque_plugin_without_describe_uses_fallback_metadata() {
    let (loader, _, _) = loader();
    let manifest = parse_plugin_manifest(&test_manifest_toml("opaque-plugin")).unwrap();
    let entry = loader
        .load_export(
            PluginExport::Opaque(Box::new(OpaqueMock::new("opaque-plugin").without_describe())),
            manifest,
        )
        .unwrap();

    let metadata = entry.instance.plugin().metadata();
    assert_eq!(metadata.id, "opaque-plugin");
    assert_eq!(metadata.description, FALLBACK_DESCRIPTION);
    assert_eq!(entry.routes.len(), 5);
}

#[test]
fn opaque_plugin_missing_health_is_rejected() {
    let (loader, registry, _) = loader();
    let manifest = parse_plugin_manifest(&test_manifest_toml("opaque-plugin")).unwrap();
    let err = loader
        .load_export(
            PluginExport::Opaque(Box::new(OpaqueMock::new("opaque-plugin").without_health())),
            manifest,
        )
        .unwrap_err();
    assert!(matches!(err, DynaplugError::Validation(_)));
    assert!(err.to_string().contains("health"));
    assert!(registry.is_empty());
}

#[test]
fn identity_mismatch_prefers_live_id_by_default() {
    let (loader, registry, routes) = loader();
    let manifest = parse_plugin_manifest(&test_manifest_toml("declared-id")).unwrap();
    let entry = loader
        .load_in_process(
            Box::new(MockPlugin::new("declared-id").reporting_id("live-id")),
            manifest,
        )
        .unwrap();
    assert_eq!(entry.id(), "live-id");
    assert!(registry.contains("live-id"));
    assert!(!registry.contains("declared-id"));
    assert!(routes.contains("GET /plugins/live-id/data"));
}

#[test]
fn identity_mismatch_fails_when_strict() {
    let (loader, registry, _) = loader_with(LoaderSettings {
        strict_identity: true,
        ..LoaderSettings::default()
    });
    let manifest = parse_plugin_manifest(&test_manifest_toml("declared-id")).unwrap();
    let plugin = MockPlugin::new("declared-id").reporting_id("live-id");
    let control = plugin.control();
    let err = loader.load_in_process(Box::new(plugin), manifest).unwrap_err();
    assert!(matches!(err, DynaplugError::Validation(_)));
    assert!(registry.is_empty());
    assert_eq!(MockControl::count(&control.init_calls), 1);
    assert_eq!(MockControl::count(&control.cleanup_calls), 1);
}

#[test]
fn live_id_must_follow_id_grammar() {
    let (loader, registry, routes) = loader();
    let manifest = parse_plugin_manifest(&test_manifest_toml("declared-id")).unwrap();
    let plugin = MockPlugin::new("declared-id").reporting_id("../admin x");
    let control = plugin.control();

    let err = loader.load_in_process(Box::new(plugin), manifest).unwrap_err();
    assert!(matches!(err, DynaplugError::Validation(_)));
    assert!(err.to_string().contains("../admin x"));
    assert!(registry.is_empty());
    assert!(routes.is_empty());
    assert_eq!(MockControl::count(&control.cleanup_calls), 1);
}

#[test]
fn live_id_conflict_cleans_up_new_instance() {
    let (loader, registry, routes) = loader();
    let first = parse_plugin_manifest(&test_manifest_toml("live-id")).unwrap();
    loader
        .load_in_process(Box::new(MockPlugin::new("live-id")), first)
        .unwrap();

    let manifest = parse_plugin_manifest(&test_manifest_toml("other-id")).unwrap();
    let plugin = MockPlugin::new("other-id").reporting_id("live-id");
    let control = plugin.control();
    let err = loader.load_in_process(Box::new(plugin), manifest).unwrap_err();

    assert!(matches!(err, DynaplugError::Conflict(_)));
    assert_eq!(MockControl::count(&control.init_calls), 1);
    assert_eq!(MockControl::count(&control.cleanup_calls), 1);
    assert_eq!(registry.len(), 1);
    assert!(routes.contains("GET /plugins/live-id/data"));
}

/// A registrar that accepts routes until it sees the poisoned path.
struct PanickyRegistrar {
    inner: RouteTable,
    poisoned: &'static str,
}

impl RouteRegistrar for PanickyRegistrar {
    fn register(&self, target: RouteTarget) -> Result<bool, DynaplugError> {
        if target.declared_path == self.poisoned {
            panic!("router rejected {}", target.full_path);
        }
        Ok(self.inner.insert(target))
    }

    fn unregister(&self, key: &str) -> bool {
        self.inner.remove(key)
    }
}

#[test]
fn panicking_registrar_skips_only_that_route() {
    let registry = Arc::new(PluginRegistry::new());
    let registrar = Arc::new(PanickyRegistrar {
        inner: RouteTable::new(),
        poisoned: "/echo",
    });
    let loader = PluginLoader::new(
        Arc::clone(&registry),
        registrar.clone(),
        LoaderSettings::default(),
    );
    let manifest = parse_plugin_manifest(&test_manifest_toml("panicky-plugin")).unwrap();

    let entry = loader
        .load_in_process(Box::new(MockPlugin::new("panicky-plugin")), manifest)
        .unwrap();
    assert_eq!(entry.routes.len(), 4);
    assert!(!registrar.inner.contains("POST /plugins/panicky-plugin/echo"));
    assert!(registrar.inner.contains("GET /plugins/panicky-plugin/boom"));
}

#[test]
fn registered_handler_dispatches_through_route_table() {
    let (loader, _, routes) = loader();
    let manifest = parse_plugin_manifest(&test_manifest_toml("dispatch-plugin")).unwrap();
    loader
        .load_in_process(Box::new(MockPlugin::new("dispatch-plugin")), manifest)
        .unwrap();

    let matched = routes
        .resolve(HttpMethod::Get, "/plugins/dispatch-plugin/items/9")
        .unwrap();
    let req = PluginRequest {
        method: "GET".into(),
        route: matched.target.declared_path.clone(),
        params: matched.params.clone(),
        ..Default::default()
    };
    let resp = (matched.target.handler)(&req).unwrap();
    let body: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
    assert_eq!(body["id"], "9");
}

#[tokio::test]
async fn manager_publishes_lifecycle_events() {
    let dir = tempfile::tempdir().unwrap();
    let manager = PluginManager::new(manager_config(dir.path())).unwrap();
    let mut events = manager.events().subscribe();

    let manifest = parse_plugin_manifest(&test_manifest_toml("evented-plugin")).unwrap();
    manager
        .load_in_process(Box::new(MockPlugin::new("evented-plugin")), manifest)
        .await
        .unwrap();
    manager.disable("evented-plugin").unwrap();
    manager.unload("evented-plugin").await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(matches!(&seen[0], PluginEvent::Loaded { plugin_id, .. } if plugin_id == "evented-plugin"));
    assert!(matches!(&seen[1], PluginEvent::Disabled { .. }));
    assert!(matches!(&seen[2], PluginEvent::Unloaded { .. }));
    assert!(manager.list().is_empty());
}

#[tokio::test]
async fn in_process_plugins_cannot_be_reloaded() {
    let dir = tempfile::tempdir().unwrap();
    let manager = PluginManager::new(manager_config(dir.path())).unwrap();
    let manifest = parse_plugin_manifest(&test_manifest_toml("fixed-plugin")).unwrap();
    manager
        .load_in_process(Box::new(MockPlugin::new("fixed-plugin")), manifest)
        .await
        .unwrap();

    let err = manager.reload("fixed-plugin").await.unwrap_err();
    assert!(matches!(err, DynaplugError::Validation(_)));
    assert!(manager.get("fixed-plugin").is_some());
    assert!(matches!(
        manager.reload("ghost-plugin").await,
        Err(DynaplugError::NotFound(_))
    ));
}

#[tokio::test]
async fn missing_artifact_source_fails_with_event() {
    let dir = tempfile::tempdir().unwrap();
    let manager = PluginManager::new(manager_config(dir.path())).unwrap();
    let mut events = manager.events().subscribe();

    let missing = dir
        .path()
        .join(format!("absent.{}", std::env::consts::DLL_EXTENSION));
    let err = manager
        .load(&missing.display().to_string(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, DynaplugError::Io { .. } | DynaplugError::Validation(_)));

    let first = events.try_recv().unwrap();
    assert!(matches!(first, PluginEvent::Loading { .. }));
    let second = events.try_recv().unwrap();
    assert!(matches!(second, PluginEvent::LoadFailed { .. }));
}

#[tokio::test]
async fn shutdown_unloads_everything() {
    let dir = tempfile::tempdir().unwrap();
    let manager = PluginManager::new(manager_config(dir.path())).unwrap();
    for id in ["first-plugin", "second-plugin"] {
        let manifest = parse_plugin_manifest(&test_manifest_toml(id)).unwrap();
        manager
            .load_in_process(Box::new(MockPlugin::new(id)), manifest)
            .await
            .unwrap();
    }
    assert_eq!(manager.routes().len(), 10);

    manager.shutdown().await;
    assert!(manager.list().is_empty());
    assert!(manager.routes().is_empty());
    assert!(manager.health().is_stopped());
}
