// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Registry of loaded plugins and their status.
//!
//! One `RwLock` guards two maps: registered plugins and their status
//! projections. Per-plugin mutable fields (request count, error ring,
//! enabled flag) sit behind a per-entry `Mutex`, so traffic to one plugin
//! never serialises another. Poisoned locks are recovered, never unwrapped.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use dynaplug_core::{DynaplugError, HealthState, PluginState};
use serde::Serialize;
use strum::{Display, EnumString};

use crate::instance::PluginInstance;
use crate::manifest::PluginManifest;

/// Errors kept on each registered plugin.
pub const ENTRY_ERROR_CAPACITY: usize = 10;

/// Errors kept on each status projection.
pub const STATUS_ERROR_CAPACITY: usize = 5;

/// Classification of a recorded plugin error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize)]
pub enum ErrorCode {
    #[strum(serialize = "VALIDATION_ERROR")]
    #[serde(rename = "VALIDATION_ERROR")]
    Validation,
    #[strum(serialize = "DEPENDENCY_ERROR")]
    #[serde(rename = "DEPENDENCY_ERROR")]
    Dependency,
    #[strum(serialize = "PERMISSION_ERROR")]
    #[serde(rename = "PERMISSION_ERROR")]
    Permission,
    #[strum(serialize = "CONFIGURATION_ERROR")]
    #[serde(rename = "CONFIGURATION_ERROR")]
    Configuration,
    #[strum(serialize = "RUNTIME_ERROR")]
    #[serde(rename = "RUNTIME_ERROR")]
    Runtime,
    #[strum(serialize = "HEALTH_CHECK_ERROR")]
    #[serde(rename = "HEALTH_CHECK_ERROR")]
    HealthCheck,
}

/// One element of an error ring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// RFC 3339.
    pub timestamp: String,
}

impl ErrorRecord {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            timestamp: rfc3339_now(),
        }
    }
}

pub(crate) fn rfc3339_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn push_bounded<T>(ring: &mut VecDeque<T>, item: T, capacity: usize) {
    ring.push_back(item);
    while ring.len() > capacity {
        ring.pop_front();
    }
}

/// Where a plugin was loaded from, kept so it can be rebuilt on reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PluginSource {
    /// A repository URL and optional version reference.
    Remote {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reference: Option<String>,
    },
    /// A prebuilt artifact with its manifest.
    Artifact { artifact: PathBuf, manifest: PathBuf },
    /// A source directory built in place.
    Directory { path: PathBuf },
    /// Compiled into the host process; cannot be rebuilt.
    InProcess,
}

impl std::fmt::Display for PluginSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote {
                url,
                reference: Some(r),
            } => write!(f, "{url}@{r}"),
            Self::Remote { url, .. } => write!(f, "{url}"),
            Self::Artifact { artifact, .. } => write!(f, "{}", artifact.display()),
            Self::Directory { path } => write!(f, "local:{}", path.display()),
            Self::InProcess => write!(f, "in-process"),
        }
    }
}

/// Mutable per-plugin fields.
#[derive(Debug)]
struct EntryRuntime {
    enabled: bool,
    request_count: u64,
    errors: VecDeque<ErrorRecord>,
}

/// A loaded plugin, owned by the registry.
pub struct RegisteredPlugin {
    pub manifest: PluginManifest,
    pub instance: Arc<PluginInstance>,
    pub artifact_path: Option<PathBuf>,
    pub source: PluginSource,
    /// Route keys actually registered, e.g. `GET /plugins/demo/data`.
    pub routes: Vec<String>,
    pub loaded_at: DateTime<Utc>,
    runtime: Mutex<EntryRuntime>,
}

impl RegisteredPlugin {
    pub fn new(
        manifest: PluginManifest,
        instance: Arc<PluginInstance>,
        artifact_path: Option<PathBuf>,
        source: PluginSource,
        routes: Vec<String>,
    ) -> Self {
        Self {
            manifest,
            instance,
            artifact_path,
            source,
            routes,
            loaded_at: Utc::now(),
            runtime: Mutex::new(EntryRuntime {
                enabled: true,
                request_count: 0,
                errors: VecDeque::with_capacity(ENTRY_ERROR_CAPACITY),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    fn runtime(&self) -> MutexGuard<'_, EntryRuntime> {
        self.runtime.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(plugin_id = %self.manifest.id, "plugin entry mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.runtime().enabled
    }

    pub fn request_count(&self) -> u64 {
        self.runtime().request_count
    }

    /// Error ring, oldest first.
    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.runtime().errors.iter().cloned().collect()
    }
}

impl std::fmt::Debug for RegisteredPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredPlugin")
            .field("id", &self.manifest.id)
            .field("source", &self.source)
            .field("routes", &self.routes)
            .finish()
    }
}

/// Independently updatable status projection of a registered plugin.
#[derive(Debug, Clone)]
struct StatusRecord {
    state: PluginState,
    health: HealthState,
    last_check: String,
    errors: VecDeque<ErrorRecord>,
}

/// Point-in-time view of a plugin's status.
#[derive(Debug, Clone, Serialize)]
pub struct PluginStatusSnapshot {
    pub state: PluginState,
    pub health: HealthState,
    pub last_check: String,
    pub errors: Vec<ErrorRecord>,
    pub uptime_secs: i64,
    pub request_count: u64,
    pub enabled: bool,
}

/// Aggregate figures across the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryMetrics {
    pub total_plugins: usize,
    /// Health state name to number of plugins in it. Sums to `total_plugins`.
    pub health: BTreeMap<String, usize>,
    pub total_routes: usize,
    pub total_requests: u64,
    pub total_errors: usize,
    pub enabled_plugins: usize,
}

#[derive(Default)]
struct RegistryMaps {
    plugins: HashMap<String, Arc<RegisteredPlugin>>,
    status: HashMap<String, StatusRecord>,
}

/// Thread-safe catalog of loaded plugins.
#[derive(Default)]
pub struct PluginRegistry {
    maps: RwLock<RegistryMaps>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryMaps> {
        self.maps.read().unwrap_or_else(|poisoned| {
            tracing::warn!("plugin registry lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryMaps> {
        self.maps.write().unwrap_or_else(|poisoned| {
            tracing::warn!("plugin registry lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn not_registered(id: &str) -> DynaplugError {
        DynaplugError::NotFound(format!("plugin {id} is not registered"))
    }

    /// Insert a plugin with status loaded/unknown. Conflict if the id is taken.
    pub fn register(&self, plugin: RegisteredPlugin) -> Result<Arc<RegisteredPlugin>, DynaplugError> {
        let id = plugin.id().to_string();
        let mut maps = self.write();
        if maps.plugins.contains_key(&id) {
            return Err(DynaplugError::Conflict(format!(
                "plugin {id} is already registered"
            )));
        }
        let plugin = Arc::new(plugin);
        maps.plugins.insert(id.clone(), Arc::clone(&plugin));
        maps.status.insert(
            id,
            StatusRecord {
                state: PluginState::Loaded,
                health: HealthState::Unknown,
                last_check: rfc3339_now(),
                errors: VecDeque::with_capacity(STATUS_ERROR_CAPACITY),
            },
        );
        Ok(plugin)
    }

    /// Remove both entries. The caller runs cleanup before this.
    pub fn unregister(&self, id: &str) -> Result<Arc<RegisteredPlugin>, DynaplugError> {
        let mut maps = self.write();
        let plugin = maps.plugins.remove(id).ok_or_else(|| Self::not_registered(id))?;
        maps.status.remove(id);
        Ok(plugin)
    }

    pub fn get(&self, id: &str) -> Option<Arc<RegisteredPlugin>> {
        self.read().plugins.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().plugins.contains_key(id)
    }

    /// All registered plugins, sorted by id.
    pub fn list(&self) -> Vec<Arc<RegisteredPlugin>> {
        let mut plugins: Vec<_> = self.read().plugins.values().cloned().collect();
        plugins.sort_by(|a, b| a.id().cmp(b.id()));
        plugins
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read().plugins.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.read().plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().plugins.is_empty()
    }

    pub fn status(&self, id: &str) -> Option<PluginStatusSnapshot> {
        let maps = self.read();
        let plugin = maps.plugins.get(id)?;
        let status = maps.status.get(id)?;
        let runtime = plugin.runtime();
        Some(PluginStatusSnapshot {
            state: status.state,
            health: status.health,
            last_check: status.last_check.clone(),
            errors: status.errors.iter().cloned().collect(),
            uptime_secs: (Utc::now() - plugin.loaded_at).num_seconds().max(0),
            request_count: runtime.request_count,
            enabled: runtime.enabled,
        })
    }

    pub fn update_state(&self, id: &str, state: PluginState) -> Result<(), DynaplugError> {
        let mut maps = self.write();
        let status = maps.status.get_mut(id).ok_or_else(|| Self::not_registered(id))?;
        status.state = state;
        status.last_check = rfc3339_now();
        Ok(())
    }

    /// Overwrite health. Returns the previous value.
    ///
    /// Reaching healthy moves a plugin in the error state back to loaded.
    pub fn update_health(&self, id: &str, health: HealthState) -> Result<HealthState, DynaplugError> {
        let mut maps = self.write();
        let status = maps.status.get_mut(id).ok_or_else(|| Self::not_registered(id))?;
        let previous = std::mem::replace(&mut status.health, health);
        if health == HealthState::Healthy && status.state == PluginState::Error {
            status.state = PluginState::Loaded;
        }
        status.last_check = rfc3339_now();
        Ok(previous)
    }

    /// Increment the request counter. Takes the registry lock in shared mode only.
    pub fn record_request(&self, id: &str) -> Result<u64, DynaplugError> {
        let maps = self.read();
        let plugin = maps.plugins.get(id).ok_or_else(|| Self::not_registered(id))?;
        let mut runtime = plugin.runtime();
        runtime.request_count += 1;
        Ok(runtime.request_count)
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), DynaplugError> {
        let maps = self.read();
        let plugin = maps.plugins.get(id).ok_or_else(|| Self::not_registered(id))?;
        plugin.runtime().enabled = enabled;
        Ok(())
    }

    /// Append to both error rings and flip the status to error/unhealthy.
    pub fn add_error(&self, id: &str, record: ErrorRecord) -> Result<(), DynaplugError> {
        let mut maps = self.write();
        let plugin = maps.plugins.get(id).ok_or_else(|| Self::not_registered(id))?;
        push_bounded(&mut plugin.runtime().errors, record.clone(), ENTRY_ERROR_CAPACITY);

        if let Some(status) = maps.status.get_mut(id) {
            status.state = PluginState::Error;
            status.health = HealthState::Unhealthy;
            status.last_check = rfc3339_now();
            push_bounded(&mut status.errors, record, STATUS_ERROR_CAPACITY);
        }
        Ok(())
    }

    /// Empty both error rings. A plugin in the error state returns to loaded.
    pub fn clear_errors(&self, id: &str) -> Result<(), DynaplugError> {
        let mut maps = self.write();
        let plugin = maps.plugins.get(id).ok_or_else(|| Self::not_registered(id))?;
        plugin.runtime().errors.clear();

        if let Some(status) = maps.status.get_mut(id) {
            status.errors.clear();
            if status.state == PluginState::Error {
                status.state = PluginState::Loaded;
            }
            status.last_check = rfc3339_now();
        }
        Ok(())
    }

    /// Plugin id to its registered route keys.
    pub fn all_routes(&self) -> BTreeMap<String, Vec<String>> {
        self.read()
            .plugins
            .iter()
            .map(|(id, p)| (id.clone(), p.routes.clone()))
            .collect()
    }

    /// Aggregate counters, computed under the read lock.
    pub fn metrics(&self) -> RegistryMetrics {
        let maps = self.read();
        let mut metrics = RegistryMetrics {
            total_plugins: maps.plugins.len(),
            health: [
                HealthState::Healthy,
                HealthState::Unhealthy,
                HealthState::Unknown,
                HealthState::Degraded,
            ]
            .iter()
            .map(|h| (h.to_string(), 0))
            .collect(),
            ..Default::default()
        };

        for (id, plugin) in &maps.plugins {
            let health = maps
                .status
                .get(id)
                .map(|s| s.health)
                .unwrap_or(HealthState::Unknown);
            *metrics.health.entry(health.to_string()).or_default() += 1;
            metrics.total_routes += plugin.routes.len();

            let runtime = plugin.runtime();
            metrics.total_requests += runtime.request_count;
            metrics.total_errors += runtime.errors.len();
            if runtime.enabled {
                metrics.enabled_plugins += 1;
            }
        }
        metrics
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynaplug_test_utils::MockPlugin;

    fn entry(id: &str, routes: &[&str]) -> RegisteredPlugin {
        let manifest = PluginManifest {
            id: id.into(),
            name: id.into(),
            version: "1.0.0".into(),
            author: "tests".into(),
            ..Default::default()
        };
        let instance = Arc::new(PluginInstance::in_process(Box::new(MockPlugin::new(id))));
        RegisteredPlugin::new(
            manifest,
            instance,
            None,
            PluginSource::InProcess,
            routes.iter().map(|r| r.to_string()).collect(),
        )
    }

    fn error(n: usize) -> ErrorRecord {
        ErrorRecord::new(ErrorCode::Runtime, format!("error {n}"), None)
    }

    #[test]
    fn register_sets_loaded_unknown() {
        let registry = PluginRegistry::new();
        registry.register(entry("alpha", &["GET /plugins/alpha/a"])).unwrap();

        let status = registry.status("alpha").unwrap();
        assert_eq!(status.state, PluginState::Loaded);
        assert_eq!(status.health, HealthState::Unknown);
        assert!(status.enabled);
        assert_eq!(status.request_count, 0);
    }

    #[test]
    fn duplicate_register_keeps_first() {
        let registry = PluginRegistry::new();
        registry.register(entry("alpha", &["GET /plugins/alpha/a"])).unwrap();
        let err = registry.register(entry("alpha", &[])).unwrap_err();
        assert!(matches!(err, DynaplugError::Conflict(_)));
        assert_eq!(registry.get("alpha").unwrap().routes.len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregister_unknown_is_not_found() {
        let registry = PluginRegistry::new();
        registry.register(entry("alpha", &[])).unwrap();
        let err = registry.unregister("ghost").unwrap_err();
        assert!(matches!(err, DynaplugError::NotFound(_)));
        assert_eq!(registry.ids(), vec!["alpha"]);
    }

    #[test]
    fn unregister_removes_status_too() {
        let registry = PluginRegistry::new();
        registry.register(entry("alpha", &[])).unwrap();
        registry.unregister("alpha").unwrap();
        assert!(registry.status("alpha").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn error_rings_evict_oldest() {
        let registry = PluginRegistry::new();
        let plugin = registry.register(entry("alpha", &[])).unwrap();
        for n in 0..11 {
            registry.add_error("alpha", error(n)).unwrap();
        }

        let errors = plugin.errors();
        assert_eq!(errors.len(), ENTRY_ERROR_CAPACITY);
        assert_eq!(errors[0].message, "error 1");
        assert_eq!(errors[9].message, "error 10");

        let status = registry.status("alpha").unwrap();
        assert_eq!(status.errors.len(), STATUS_ERROR_CAPACITY);
        assert_eq!(status.errors[0].message, "error 6");
        assert_eq!(status.state, PluginState::Error);
        assert_eq!(status.health, HealthState::Unhealthy);
    }

    #[test]
    fn clear_errors_restores_loaded() {
        let registry = PluginRegistry::new();
        registry.register(entry("alpha", &[])).unwrap();
        registry.add_error("alpha", error(0)).unwrap();
        registry.clear_errors("alpha").unwrap();

        let status = registry.status("alpha").unwrap();
        assert!(status.errors.is_empty());
        assert_eq!(status.state, PluginState::Loaded);
        assert!(registry.get("alpha").unwrap().errors().is_empty());
    }

    #[test]
    fn record_request_and_enable_flag() {
        let registry = PluginRegistry::new();
        registry.register(entry("alpha", &[])).unwrap();
        assert_eq!(registry.record_request("alpha").unwrap(), 1);
        assert_eq!(registry.record_request("alpha").unwrap(), 2);

        registry.set_enabled("alpha", false).unwrap();
        assert!(!registry.get("alpha").unwrap().is_enabled());
        assert!(registry.set_enabled("ghost", true).is_err());
        assert!(registry.record_request("ghost").is_err());
    }

    #[test]
    fn update_health_returns_previous() {
        let registry = PluginRegistry::new();
        registry.register(entry("alpha", &[])).unwrap();
        let prev = registry.update_health("alpha", HealthState::Degraded).unwrap();
        assert_eq!(prev, HealthState::Unknown);
        let prev = registry.update_health("alpha", HealthState::Healthy).unwrap();
        assert_eq!(prev, HealthState::Degraded);
    }

    #[test]
    fn healthy_update_clears_error_state() {
        let registry = PluginRegistry::new();
        registry.register(entry("alpha", &[])).unwrap();
        registry
            .add_error("alpha", ErrorRecord::new(ErrorCode::HealthCheck, "boom", None))
            .unwrap();
        registry.update_health("alpha", HealthState::Degraded).unwrap();
        assert_eq!(registry.status("alpha").unwrap().state, PluginState::Error);

        registry.update_health("alpha", HealthState::Healthy).unwrap();
        let status = registry.status("alpha").unwrap();
        assert_eq!(status.state, PluginState::Loaded);
        assert_eq!(status.errors.len(), 1);
    }

    #[test]
    fn metrics_invariants() {
        let registry = PluginRegistry::new();
        registry
            .register(entry("alpha", &["GET /plugins/alpha/a", "POST /plugins/alpha/b"]))
            .unwrap();
        registry.register(entry("beta", &["GET /plugins/beta/x"])).unwrap();
        registry.register(entry("gamma", &[])).unwrap();
        registry.update_health("alpha", HealthState::Healthy).unwrap();
        registry.add_error("beta", error(0)).unwrap();
        registry.record_request("alpha").unwrap();
        registry.set_enabled("gamma", false).unwrap();

        let metrics = registry.metrics();
        assert_eq!(metrics.total_plugins, 3);
        assert_eq!(metrics.health.values().sum::<usize>(), metrics.total_plugins);
        assert_eq!(metrics.health["healthy"], 1);
        assert_eq!(metrics.health["unhealthy"], 1);
        assert_eq!(metrics.health["unknown"], 1);
        assert_eq!(metrics.health["degraded"], 0);

        let route_sum: usize = registry.all_routes().values().map(Vec::len).sum();
        assert_eq!(metrics.total_routes, route_sum);
        assert_eq!(metrics.total_routes, 3);
        assert_eq!(metrics.total_requests, 1);
        assert_eq!(metrics.total_errors, 1);
        assert_eq!(metrics.enabled_plugins, 2);
    }

    #[test]
    fn concurrent_requests_are_counted() {
        let registry = Arc::new(PluginRegistry::new());
        registry.register(entry("alpha", &[])).unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        registry.record_request("alpha").unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.get("alpha").unwrap().request_count(), 800);
    }

    #[test]
    fn source_display() {
        let remote = PluginSource::Remote {
            url: "https://github.com/acme/demo.git".into(),
            reference: Some("v1.0.0".into()),
        };
        assert_eq!(remote.to_string(), "https://github.com/acme/demo.git@v1.0.0");
        let dir = PluginSource::Directory {
            path: PathBuf::from("./demo"),
        };
        assert_eq!(dir.to_string(), "local:./demo");
    }
}
