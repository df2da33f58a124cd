// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A live plugin value paired with the library that provides its code.

use dynaplug_core::DynamicPlugin;
use libloading::Library;

/// A plugin instance and, for dynamically loaded plugins, its library.
///
/// Field order matters: `plugin` is dropped before `library`, so vtables and
/// handler closures never outlive the code they point into. Anything that
/// can call into the plugin (routes, health probes) holds an `Arc` of this.
pub struct PluginInstance {
    plugin: Box<dyn DynamicPlugin>,
    library: Option<Library>,
}

impl PluginInstance {
    /// Wraps a plugin compiled into the host process.
    pub fn in_process(plugin: Box<dyn DynamicPlugin>) -> Self {
        Self {
            plugin,
            library: None,
        }
    }

    pub(crate) fn from_library(plugin: Box<dyn DynamicPlugin>, library: Library) -> Self {
        Self {
            plugin,
            library: Some(library),
        }
    }

    pub fn plugin(&self) -> &dyn DynamicPlugin {
        self.plugin.as_ref()
    }

    /// Whether the instance came from a dynamically opened library.
    pub fn is_dynamic(&self) -> bool {
        self.library.is_some()
    }
}

impl std::fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginInstance")
            .field("id", &self.plugin.metadata().id)
            .field("dynamic", &self.is_dynamic())
            .finish()
    }
}
