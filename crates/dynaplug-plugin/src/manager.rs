// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Façade tying acquisition, build, load, health, and events together.

use std::path::Path;
use std::sync::Arc;

use dynaplug_config::DynaplugConfig;
use dynaplug_core::{DynamicPlugin, DynaplugError, PluginExport};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::acquire::{verify_local_pair, SourceAcquirer, SourceSpec, SourceWorkspace};
use crate::build::{BuildCache, BuildCacheInfo, BuildOrchestrator};
use crate::events::{EventBus, PluginEvent};
use crate::health::{HealthMonitor, HealthSettings};
use crate::loader::{LoaderSettings, PluginLoader};
use crate::manifest::{load_manifest, PluginManifest};
use crate::registry::{PluginRegistry, PluginSource, RegisteredPlugin, RegistryMetrics};
use crate::routes::{RouteRegistrar, RouteTable};

/// The source spec a recorded plugin source can be rebuilt from.
fn respec(source: &PluginSource) -> Option<SourceSpec> {
    match source {
        PluginSource::Remote { url, reference } => Some(SourceSpec::Remote {
            url: url.clone(),
            reference: reference.clone(),
        }),
        PluginSource::Artifact { artifact, manifest } => Some(SourceSpec::Artifact {
            artifact: artifact.clone(),
            manifest: manifest.clone(),
        }),
        PluginSource::Directory { path } => Some(SourceSpec::Directory { path: path.clone() }),
        PluginSource::InProcess => None,
    }
}

pub struct PluginManager {
    config: DynaplugConfig,
    registry: Arc<PluginRegistry>,
    routes: Arc<RouteTable>,
    loader: Arc<PluginLoader>,
    builder: BuildOrchestrator,
    acquirer: SourceAcquirer,
    health: Arc<HealthMonitor>,
    events: EventBus,
    lifecycle: Mutex<()>,
}

impl PluginManager {
    pub fn new(config: DynaplugConfig) -> Result<Self, DynaplugError> {
        let cache = Arc::new(BuildCache::open(&config.plugins.cache_dir)?);
        let builder =
            BuildOrchestrator::new(config.build.clone(), &config.plugins.plugin_dir, cache)?;
        let acquirer = SourceAcquirer::new(
            config.acquire.clone(),
            config.plugins.allowed_repos.clone(),
            &config.build,
        );

        let registry = Arc::new(PluginRegistry::new());
        let routes = Arc::new(RouteTable::new());
        let registrar: Arc<dyn RouteRegistrar> = routes.clone();
        let loader = Arc::new(PluginLoader::new(
            Arc::clone(&registry),
            registrar,
            LoaderSettings::from_config(&config),
        ));

        let events = EventBus::default();
        let health = Arc::new(HealthMonitor::new(
            Arc::clone(&registry),
            events.clone(),
            HealthSettings::from(&config.health),
        ));

        info!(
            plugin_dir = %config.plugins.plugin_dir,
            cache_dir = %config.plugins.cache_dir,
            security_mode = %config.plugins.security_mode,
            "plugin manager initialized"
        );

        Ok(Self {
            config,
            registry,
            routes,
            loader,
            builder,
            acquirer,
            health,
            events,
            lifecycle: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &DynaplugConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn build_cache(&self) -> &Arc<BuildCache> {
        self.builder.cache()
    }

    pub fn route_prefix(&self) -> &str {
        &self.config.plugins.route_prefix
    }

    /// Loads a plugin from a repository URL, `local:<dir>`, or artifact path.
    pub async fn load(
        &self,
        source: &str,
        reference: Option<&str>,
    ) -> Result<Arc<RegisteredPlugin>, DynaplugError> {
        let spec = SourceSpec::parse(source, reference)?;
        let _guard = self.lifecycle.lock().await;
        self.load_spec(spec).await
    }

    async fn load_spec(&self, spec: SourceSpec) -> Result<Arc<RegisteredPlugin>, DynaplugError> {
        let label = spec.to_source().to_string();
        self.events.publish(PluginEvent::Loading {
            source: label.clone(),
        });

        match self.acquire_and_load(spec).await {
            Ok(entry) => {
                self.after_load(&entry);
                Ok(entry)
            }
            Err(e) => {
                error!(source = %label, error = %e, "plugin load failed");
                self.events.publish(PluginEvent::LoadFailed {
                    source: label,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn acquire_and_load(
        &self,
        spec: SourceSpec,
    ) -> Result<Arc<RegisteredPlugin>, DynaplugError> {
        let source = spec.to_source();
        match spec {
            SourceSpec::Remote { url, reference } => {
                let workspace = self.acquirer.clone_remote(&url, reference.as_deref()).await?;
                self.build_and_load(workspace, source).await
            }
            SourceSpec::Directory { path } => {
                let workspace = self.acquirer.copy_directory(&path).await?;
                self.build_and_load(workspace, source).await
            }
            SourceSpec::Artifact { artifact, manifest } => {
                verify_local_pair(&artifact, &manifest)?;
                let parsed = load_manifest(&manifest)?;
                self.load_blocking(artifact, parsed, source).await
            }
        }
    }

    /// The workspace is dropped (and deleted) once the build returns.
    async fn build_and_load(
        &self,
        workspace: SourceWorkspace,
        source: PluginSource,
    ) -> Result<Arc<RegisteredPlugin>, DynaplugError> {
        let built = self.builder.build(&workspace).await?;
        drop(workspace);
        self.load_blocking(built.artifact, built.manifest, source)
            .await
    }

    async fn load_blocking(
        &self,
        artifact: impl AsRef<Path>,
        manifest: PluginManifest,
        source: PluginSource,
    ) -> Result<Arc<RegisteredPlugin>, DynaplugError> {
        let loader = Arc::clone(&self.loader);
        let artifact = artifact.as_ref().to_path_buf();
        tokio::task::spawn_blocking(move || loader.load_artifact(&artifact, manifest, source))
            .await
            .map_err(|e| DynaplugError::runtime(format!("plugin load task failed: {e}")))?
    }

    fn after_load(&self, entry: &Arc<RegisteredPlugin>) {
        if self.config.plugins.enable_health_checks {
            self.health.add_plugin(entry.id());
        }
        self.events.publish(PluginEvent::Loaded {
            plugin_id: entry.id().to_string(),
            version: entry.manifest.version.clone(),
        });
    }

    /// Registers a plugin compiled into the host.
    pub async fn load_in_process(
        &self,
        plugin: Box<dyn DynamicPlugin>,
        manifest: PluginManifest,
    ) -> Result<Arc<RegisteredPlugin>, DynaplugError> {
        self.load_export(PluginExport::Capable(plugin), manifest)
            .await
    }

    /// Registers an entry-function export without opening a library.
    pub async fn load_export(
        &self,
        export: PluginExport,
        manifest: PluginManifest,
    ) -> Result<Arc<RegisteredPlugin>, DynaplugError> {
        let _guard = self.lifecycle.lock().await;
        let entry = self.loader.load_export(export, manifest)?;
        self.after_load(&entry);
        Ok(entry)
    }

    pub async fn unload(&self, id: &str) -> Result<(), DynaplugError> {
        let _guard = self.lifecycle.lock().await;
        self.unload_locked(id).await
    }

    async fn unload_locked(&self, id: &str) -> Result<(), DynaplugError> {
        let loader = Arc::clone(&self.loader);
        let owned = id.to_string();
        tokio::task::spawn_blocking(move || loader.unload(&owned))
            .await
            .map_err(|e| DynaplugError::runtime(format!("plugin unload task failed: {e}")))??;
        self.health.remove_plugin(id);
        self.events.publish(PluginEvent::Unloaded {
            plugin_id: id.to_string(),
        });
        Ok(())
    }

    /// Unloads and loads again from the recorded source.
    ///
    /// If the fresh load fails the plugin stays unloaded.
    pub async fn reload(&self, id: &str) -> Result<Arc<RegisteredPlugin>, DynaplugError> {
        let _guard = self.lifecycle.lock().await;
        let entry = self
            .registry
            .get(id)
            .ok_or_else(|| DynaplugError::NotFound(format!("plugin {id}")))?;
        let spec = respec(&entry.source).ok_or_else(|| {
            DynaplugError::Validation(format!("plugin {id} was loaded in-process and cannot be reloaded"))
        })?;
        drop(entry);

        self.unload_locked(id).await?;
        let reloaded = self.load_spec(spec).await?;
        self.events.publish(PluginEvent::Reloaded {
            plugin_id: reloaded.id().to_string(),
        });
        info!(plugin_id = %reloaded.id(), "plugin reloaded");
        Ok(reloaded)
    }

    pub fn enable(&self, id: &str) -> Result<(), DynaplugError> {
        self.registry.set_enabled(id, true)?;
        info!(plugin_id = %id, "plugin enabled");
        self.events.publish(PluginEvent::Enabled {
            plugin_id: id.to_string(),
        });
        Ok(())
    }

    /// Disabled plugins stay loaded and monitored; their endpoints answer 503.
    pub fn disable(&self, id: &str) -> Result<(), DynaplugError> {
        self.registry.set_enabled(id, false)?;
        info!(plugin_id = %id, "plugin disabled");
        self.events.publish(PluginEvent::Disabled {
            plugin_id: id.to_string(),
        });
        Ok(())
    }

    pub fn list(&self) -> Vec<Arc<RegisteredPlugin>> {
        self.registry.list()
    }

    pub fn get(&self, id: &str) -> Option<Arc<RegisteredPlugin>> {
        self.registry.get(id)
    }

    pub fn metrics(&self) -> RegistryMetrics {
        self.registry.metrics()
    }

    pub fn cache_info(&self) -> BuildCacheInfo {
        self.builder.cache().info()
    }

    pub fn clear_cache(&self) -> Result<(), DynaplugError> {
        self.builder.cache().clear()
    }

    /// Loads each configured auto-load source. Failures are logged and
    /// skipped. Returns how many plugins loaded.
    pub async fn auto_load(&self) -> usize {
        let mut loaded = 0;
        for source in &self.config.plugins.auto_load {
            match self.load(source, None).await {
                Ok(entry) => {
                    info!(source = %source, plugin_id = %entry.id(), "auto-loaded plugin");
                    loaded += 1;
                }
                Err(e) => warn!(source = %source, error = %e, "auto-load failed, continuing"),
            }
        }
        loaded
    }

    /// Starts periodic health checks if enabled in configuration.
    pub fn start_health_monitor(&self) -> Option<JoinHandle<()>> {
        self.config
            .plugins
            .enable_health_checks
            .then(|| self.health.start())
    }

    /// Stops the health monitor and unloads every plugin.
    pub async fn shutdown(&self) {
        self.health.stop();
        for id in self.registry.ids() {
            if let Err(e) = self.unload(&id).await {
                warn!(plugin_id = %id, error = %e, "failed to unload plugin during shutdown");
            }
        }
        info!("plugin manager shut down");
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("plugins", &self.registry.ids())
            .field("routes", &self.routes.len())
            .finish()
    }
}
