// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Opens plugin artifacts, activates instances, and registers their routes.

use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use dynaplug_config::{DynaplugConfig, SecurityPolicy};
use dynaplug_core::{
    is_already_initialized, DynamicPlugin, DynaplugError, HandlerTable, PluginEntryFn,
    PluginExport, PLUGIN_ENTRY_SYMBOL,
};
use libloading::Library;
use tracing::{debug, info, warn};

use crate::adapter::resolve_export;
use crate::instance::PluginInstance;
use crate::manifest::PluginManifest;
use crate::panic_message;
use crate::registry::{PluginRegistry, PluginSource, RegisteredPlugin};
use crate::routes::{plugin_path, RouteRegistrar, RouteTarget};
use crate::validator::{validate_id, ManifestValidator};

/// Loader knobs derived from the runtime configuration.
#[derive(Debug, Clone)]
pub struct LoaderSettings {
    pub route_prefix: String,
    /// Reject identity mismatches instead of preferring the live id.
    pub strict_identity: bool,
    pub max_plugin_size: u64,
    pub policy: SecurityPolicy,
}

impl LoaderSettings {
    pub fn from_config(config: &DynaplugConfig) -> Self {
        Self {
            route_prefix: config.plugins.route_prefix.clone(),
            strict_identity: config.loader.strict_identity,
            max_plugin_size: config.plugins.max_plugin_size,
            policy: config.plugins.security_mode.policy(),
        }
    }
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self::from_config(&DynaplugConfig::default())
    }
}

/// Opens `path` and calls its entry function.
///
/// The returned export must be dropped before the library.
fn open_library(path: &Path) -> Result<(PluginExport, Library), DynaplugError> {
    // SAFETY: loading a library runs its initialisers. Artifacts are only
    // opened after validation, and were built against this host's own
    // interface crate by the same toolchain.
    let library = unsafe { Library::new(path) }.map_err(|e| DynaplugError::Runtime {
        message: format!("failed to open plugin library {}", path.display()),
        source: Some(Box::new(e)),
    })?;

    // SAFETY: the symbol is declared by `declare_plugin!` with exactly the
    // `PluginEntryFn` signature. The copied fn pointer is only called while
    // `library` is alive.
    let entry: PluginEntryFn = unsafe {
        let symbol = library
            .get::<PluginEntryFn>(PLUGIN_ENTRY_SYMBOL.as_bytes())
            .map_err(|e| {
                DynaplugError::Validation(format!(
                    "{} does not export `{PLUGIN_ENTRY_SYMBOL}`: {e}",
                    path.display()
                ))
            })?;
        *symbol
    };

    let export = catch_unwind(entry).map_err(|payload| {
        DynaplugError::runtime(format!(
            "plugin entry panicked: {}",
            panic_message(payload.as_ref())
        ))
    })?;
    Ok((export, library))
}

/// Undoes a successful initialize when activation fails afterwards.
fn cleanup_after_failure(instance: &PluginInstance, id: &str) {
    let plugin = instance.plugin();
    match catch_unwind(AssertUnwindSafe(|| plugin.cleanup())) {
        Ok(Ok(())) => debug!(plugin_id = %id, "cleaned up after failed load"),
        Ok(Err(e)) => warn!(plugin_id = %id, error = %e, "cleanup after failed load failed"),
        Err(payload) => warn!(
            plugin_id = %id,
            panic = %panic_message(payload.as_ref()),
            "cleanup after failed load panicked"
        ),
    }
}

pub struct PluginLoader {
    registry: Arc<PluginRegistry>,
    routes: Arc<dyn RouteRegistrar>,
    settings: LoaderSettings,
    validator: ManifestValidator,
}

impl PluginLoader {
    pub fn new(
        registry: Arc<PluginRegistry>,
        routes: Arc<dyn RouteRegistrar>,
        settings: LoaderSettings,
    ) -> Self {
        Self {
            registry,
            routes,
            settings,
            validator: ManifestValidator::new(),
        }
    }

    pub fn settings(&self) -> &LoaderSettings {
        &self.settings
    }

    fn ensure_absent(&self, id: &str) -> Result<(), DynaplugError> {
        if self.registry.contains(id) {
            return Err(DynaplugError::Conflict(format!(
                "plugin {id} is already loaded"
            )));
        }
        Ok(())
    }

    /// Validates, opens, and activates a built artifact.
    pub fn load_artifact(
        &self,
        artifact: &Path,
        manifest: PluginManifest,
        source: PluginSource,
    ) -> Result<Arc<RegisteredPlugin>, DynaplugError> {
        self.ensure_absent(&manifest.id)?;
        self.validator.validate_manifest(&manifest)?;
        self.validator.validate_artifact(
            artifact,
            &manifest,
            self.settings.max_plugin_size,
            self.settings.policy,
        )?;

        let (export, library) = open_library(artifact)?;
        debug!(
            plugin_id = %manifest.id,
            convention = export.convention(),
            "resolved plugin entry"
        );
        let plugin = resolve_export(export, &manifest)?;
        let instance = PluginInstance::from_library(plugin, library);
        self.activate(instance, manifest, Some(artifact), source)
    }

    /// Activates an export obtained without a library (tests, built-ins).
    pub fn load_export(
        &self,
        export: PluginExport,
        manifest: PluginManifest,
    ) -> Result<Arc<RegisteredPlugin>, DynaplugError> {
        self.ensure_absent(&manifest.id)?;
        self.validator.validate_manifest(&manifest)?;
        let plugin = resolve_export(export, &manifest)?;
        self.activate(
            PluginInstance::in_process(plugin),
            manifest,
            None,
            PluginSource::InProcess,
        )
    }

    /// Activates a plugin compiled into the host.
    pub fn load_in_process(
        &self,
        plugin: Box<dyn DynamicPlugin>,
        manifest: PluginManifest,
    ) -> Result<Arc<RegisteredPlugin>, DynaplugError> {
        self.load_export(PluginExport::Capable(plugin), manifest)
    }

    fn activate(
        &self,
        instance: PluginInstance,
        manifest: PluginManifest,
        artifact: Option<&Path>,
        source: PluginSource,
    ) -> Result<Arc<RegisteredPlugin>, DynaplugError> {
        let plugin = instance.plugin();

        let init = catch_unwind(AssertUnwindSafe(|| {
            plugin.initialize(&manifest.configuration)
        }))
        .map_err(|payload| {
            DynaplugError::runtime(format!(
                "plugin {} panicked during initialization: {}",
                manifest.id,
                panic_message(payload.as_ref())
            ))
        })?;
        match init {
            Ok(()) => {}
            Err(e) if is_already_initialized(e.as_ref()) => {
                info!(plugin_id = %manifest.id, "plugin was already initialized, continuing");
            }
            Err(e) => {
                return Err(DynaplugError::Runtime {
                    message: format!("plugin {} failed to initialize: {e}", manifest.id),
                    source: Some(e),
                });
            }
        }

        match self.finish_activation(instance, manifest, artifact, source) {
            Ok(registered) => Ok(registered),
            Err((instance, id, e)) => {
                cleanup_after_failure(&instance, &id);
                Err(e)
            }
        }
    }

    /// Everything after a successful initialize. On failure the instance is
    /// handed back so the caller can clean it up.
    fn finish_activation(
        &self,
        instance: PluginInstance,
        mut manifest: PluginManifest,
        artifact: Option<&Path>,
        source: PluginSource,
    ) -> Result<Arc<RegisteredPlugin>, (Arc<PluginInstance>, String, DynaplugError)> {
        let instance = Arc::new(instance);
        let plugin = instance.plugin();
        let fail = |id: &str, e: DynaplugError| (Arc::clone(&instance), id.to_string(), e);

        let live = catch_unwind(AssertUnwindSafe(|| plugin.metadata())).map_err(|payload| {
            fail(
                &manifest.id,
                DynaplugError::runtime(format!(
                    "plugin {} panicked while describing itself: {}",
                    manifest.id,
                    panic_message(payload.as_ref())
                )),
            )
        })?;
        if !live.id.is_empty() && live.id != manifest.id {
            if self.settings.strict_identity {
                return Err(fail(
                    &manifest.id,
                    DynaplugError::Validation(format!(
                        "plugin reports id {} but manifest declares {}",
                        live.id, manifest.id
                    )),
                ));
            }
            validate_id(&live.id).map_err(|e| fail(&manifest.id, e))?;
            warn!(
                manifest_id = %manifest.id,
                live_id = %live.id,
                "plugin identity differs from manifest, using the live id"
            );
            manifest.id = live.id;
            self.ensure_absent(&manifest.id)
                .map_err(|e| fail(&manifest.id, e))?;
        }

        let handlers = catch_unwind(AssertUnwindSafe(|| plugin.handlers())).map_err(|payload| {
            fail(
                &manifest.id,
                DynaplugError::runtime(format!(
                    "plugin {} panicked while listing handlers: {}",
                    manifest.id,
                    panic_message(payload.as_ref())
                )),
            )
        })?;

        let routes = self.register_routes(&manifest, &handlers, &instance);
        let id = manifest.id.clone();
        let version = manifest.version.clone();
        let entry = RegisteredPlugin::new(
            manifest,
            Arc::clone(&instance),
            artifact.map(Path::to_path_buf),
            source,
            routes.clone(),
        );

        match self.registry.register(entry) {
            Ok(registered) => {
                info!(
                    plugin_id = %id,
                    version = %version,
                    routes = routes.len(),
                    "plugin loaded"
                );
                Ok(registered)
            }
            Err(e) => {
                for key in &routes {
                    self.routes.unregister(key);
                }
                Err(fail(&id, e))
            }
        }
    }

    /// Registers each endpoint whose handler exists. Returns the keys added.
    fn register_routes(
        &self,
        manifest: &PluginManifest,
        handlers: &HandlerTable,
        instance: &Arc<PluginInstance>,
    ) -> Vec<String> {
        let mut registered = Vec::new();
        let mut seen = BTreeSet::new();

        for endpoint in &manifest.endpoints {
            let Some(method) = endpoint.http_method() else {
                warn!(plugin_id = %manifest.id, method = %endpoint.method, "unsupported method, skipping endpoint");
                continue;
            };
            let Some(handler) = handlers.get(&endpoint.handler) else {
                warn!(
                    plugin_id = %manifest.id,
                    handler = %endpoint.handler,
                    path = %endpoint.path,
                    "handler not exported by plugin, skipping endpoint"
                );
                continue;
            };

            let target = RouteTarget {
                plugin_id: manifest.id.clone(),
                method,
                declared_path: endpoint.path.clone(),
                full_path: plugin_path(&self.settings.route_prefix, &manifest.id, &endpoint.path),
                endpoint: endpoint.clone(),
                handler: Arc::clone(handler),
                instance: Arc::clone(instance),
            };
            let key = target.key();
            if !seen.insert(key.clone()) {
                continue;
            }

            let routes = &self.routes;
            match catch_unwind(AssertUnwindSafe(|| routes.register(target))) {
                Ok(Ok(true)) => {
                    debug!(plugin_id = %manifest.id, route = %key, "registered route");
                    registered.push(key);
                }
                Ok(Ok(false)) => {
                    debug!(plugin_id = %manifest.id, route = %key, "route already registered");
                }
                Ok(Err(e)) => {
                    warn!(plugin_id = %manifest.id, route = %key, error = %e, "route registration failed, skipping");
                }
                Err(payload) => {
                    warn!(
                        plugin_id = %manifest.id,
                        route = %key,
                        panic = %panic_message(payload.as_ref()),
                        "route registration panicked, skipping"
                    );
                }
            }
        }
        registered
    }

    /// Unloads a plugin: unloading, cleanup, routes, registry entries.
    ///
    /// Health monitoring is the caller's to remove. A cleanup failure is
    /// logged and does not stop the unload.
    pub fn unload(&self, id: &str) -> Result<Arc<RegisteredPlugin>, DynaplugError> {
        let entry = self
            .registry
            .get(id)
            .ok_or_else(|| DynaplugError::NotFound(format!("plugin {id}")))?;

        self.registry
            .update_state(id, dynaplug_core::PluginState::Unloading)?;

        let plugin = entry.instance.plugin();
        match catch_unwind(AssertUnwindSafe(|| plugin.cleanup())) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(plugin_id = %id, error = %e, "plugin cleanup failed"),
            Err(payload) => warn!(
                plugin_id = %id,
                panic = %panic_message(payload.as_ref()),
                "plugin cleanup panicked"
            ),
        }

        for key in &entry.routes {
            self.routes.unregister(key);
        }
        let removed = self.registry.unregister(id)?;
        info!(plugin_id = %id, "plugin unloaded");
        Ok(removed)
    }
}

impl std::fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginLoader")
            .field("settings", &self.settings)
            .finish()
    }
}
