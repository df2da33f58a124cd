// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter that lifts a probed [`OpaquePlugin`] into a [`DynamicPlugin`].

use dynaplug_core::{
    Cleanup, Describe, DynaplugError, HandlerTable, HealthCheck, Initialize, OpaquePlugin,
    PluginConfig, PluginExport, PluginMetadata, PluginResult, ProvideHandlers, DynamicPlugin,
};

use crate::manifest::PluginManifest;

/// Description reported by opaque plugins that cannot describe themselves.
pub const FALLBACK_DESCRIPTION: &str = "Dynamically loaded plugin";

/// Forwards every capability call to an opaque plugin value.
///
/// Required capabilities are verified once in [`ProbedPlugin::probe`];
/// describe is optional and falls back to the manifest identity.
pub struct ProbedPlugin {
    inner: Box<dyn OpaquePlugin>,
    fallback: PluginMetadata,
}

impl ProbedPlugin {
    pub fn probe(
        inner: Box<dyn OpaquePlugin>,
        manifest: &PluginManifest,
    ) -> Result<Self, DynaplugError> {
        let missing: Vec<&str> = [
            ("initialize", inner.as_initialize().is_none()),
            ("handlers", inner.as_handlers().is_none()),
            ("health", inner.as_health_check().is_none()),
            ("cleanup", inner.as_cleanup().is_none()),
        ]
        .into_iter()
        .filter_map(|(name, absent)| absent.then_some(name))
        .collect();

        if !missing.is_empty() {
            return Err(DynaplugError::Validation(format!(
                "plugin {} does not implement required capabilities: {}",
                manifest.id,
                missing.join(", ")
            )));
        }

        Ok(Self {
            inner,
            fallback: PluginMetadata {
                id: manifest.id.clone(),
                name: manifest.name.clone(),
                version: manifest.version.clone(),
                description: FALLBACK_DESCRIPTION.to_string(),
                author: manifest.author.clone(),
            },
        })
    }

    /// Whether the wrapped value describes itself.
    pub fn has_describe(&self) -> bool {
        self.inner.as_describe().is_some()
    }
}

fn vanished(capability: &str) -> Box<dyn std::error::Error + Send + Sync> {
    format!("{capability} capability is no longer available").into()
}

impl Initialize for ProbedPlugin {
    fn initialize(&self, config: &PluginConfig) -> PluginResult<()> {
        self.inner
            .as_initialize()
            .ok_or_else(|| vanished("initialize"))?
            .initialize(config)
    }
}

impl Describe for ProbedPlugin {
    fn metadata(&self) -> PluginMetadata {
        self.inner
            .as_describe()
            .map(Describe::metadata)
            .unwrap_or_else(|| self.fallback.clone())
    }
}

impl ProvideHandlers for ProbedPlugin {
    fn handlers(&self) -> HandlerTable {
        self.inner
            .as_handlers()
            .map(ProvideHandlers::handlers)
            .unwrap_or_default()
    }
}

impl HealthCheck for ProbedPlugin {
    fn health(&self) -> PluginResult<()> {
        self.inner
            .as_health_check()
            .ok_or_else(|| vanished("health"))?
            .health()
    }
}

impl Cleanup for ProbedPlugin {
    fn cleanup(&self) -> PluginResult<()> {
        self.inner
            .as_cleanup()
            .ok_or_else(|| vanished("cleanup"))?
            .cleanup()
    }
}

/// Turns whatever an entry function returned into a full plugin.
pub fn resolve_export(
    export: PluginExport,
    manifest: &PluginManifest,
) -> Result<Box<dyn DynamicPlugin>, DynaplugError> {
    match export {
        PluginExport::Capable(plugin) => Ok(plugin),
        PluginExport::Opaque(opaque) => {
            let probed = ProbedPlugin::probe(opaque, manifest)?;
            if !probed.has_describe() {
                tracing::debug!(plugin_id = %manifest.id, "plugin has no describe capability, using manifest identity");
            }
            Ok(Box::new(probed))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynaplug_test_utils::{test_manifest_toml, OpaqueMock};

    fn manifest() -> PluginManifest {
        crate::manifest::parse_plugin_manifest(&test_manifest_toml("opaque-demo")).unwrap()
    }

    #[test]
    fn opaque_without_describe_uses_fallback() {
        let plugin = resolve_export(
            PluginExport::Opaque(Box::new(OpaqueMock::new("opaque-demo").without_describe())),
            &manifest(),
        )
        .unwrap();
        let meta = plugin.metadata();
        assert_eq!(meta.description, FALLBACK_DESCRIPTION);
        assert_eq!(meta.id, "opaque-demo");
        assert!(plugin.initialize(&PluginConfig::new()).is_ok());
        assert!(plugin.health().is_ok());
        assert!(!plugin.handlers().is_empty());
    }

    #[test]
    fn opaque_with_describe_reports_itself() {
        let plugin = resolve_export(
            PluginExport::Opaque(Box::new(OpaqueMock::new("opaque-demo"))),
            &manifest(),
        )
        .unwrap();
        assert_ne!(plugin.metadata().description, FALLBACK_DESCRIPTION);
    }

    #[test]
    fn missing_required_capability_is_validation_error() {
        let result = resolve_export(
            PluginExport::Opaque(Box::new(OpaqueMock::new("opaque-demo").without_health())),
            &manifest(),
        );
        match result {
            Err(DynaplugError::Validation(msg)) => assert!(msg.contains("health")),
            Err(other) => panic!("expected validation error, got {other}"),
            Ok(_) => panic!("expected validation error"),
        }
    }
}
