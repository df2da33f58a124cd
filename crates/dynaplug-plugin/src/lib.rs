// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Plugin lifecycle for the dynaplug runtime.
//!
//! Source acquisition, namespace-isolated builds with a content-hash cache,
//! manifest and artifact validation, dynamic loading through `libloading`,
//! the plugin registry and route table, health monitoring, and the
//! [`PluginManager`] façade over all of them.

pub mod acquire;
pub mod adapter;
pub mod build;
pub mod events;
pub mod fsutil;
pub mod health;
pub mod instance;
pub mod loader;
pub mod manager;
pub mod manifest;
pub mod registry;
pub mod routes;
pub mod validator;

pub use acquire::{SourceAcquirer, SourceSpec, SourceWorkspace};
pub use adapter::{ProbedPlugin, FALLBACK_DESCRIPTION};
pub use build::{BuildCache, BuildCacheInfo, BuildOrchestrator, BuiltPlugin};
pub use events::{EventBus, PluginEvent};
pub use health::{HealthMonitor, HealthSettings, HealthSettingsUpdate, HealthSummary, PluginHealthData};
pub use instance::PluginInstance;
pub use loader::{LoaderSettings, PluginLoader};
pub use manager::PluginManager;
pub use manifest::{load_manifest, parse_plugin_manifest, EndpointConfig, PluginManifest};
pub use registry::{
    ErrorCode, ErrorRecord, PluginRegistry, PluginSource, PluginStatusSnapshot, RegisteredPlugin,
    RegistryMetrics,
};
pub use routes::{RouteMatch, RouteRegistrar, RouteTable, RouteTarget};
pub use validator::{validate_id, ManifestValidator};

/// Best-effort text of a caught panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
