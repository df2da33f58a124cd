// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Entry-point contract between the host and a plugin library.
//!
//! A plugin library exports exactly one function named
//! [`PLUGIN_ENTRY_SYMBOL`] with the signature [`PluginEntryFn`]. The simplest
//! way to do that is [`declare_plugin!`](crate::declare_plugin):
//!
//! ```ignore
//! struct Analytics;
//! // impl Initialize, Describe, ProvideHandlers, HealthCheck, Cleanup ...
//! dynaplug_core::declare_plugin!(capable Analytics::new);
//! ```
//!
//! Host and plugin must be built by the same compiler against the same
//! `dynaplug-core` sources; the build orchestrator guarantees this by
//! pointing the plugin's `dynaplug-core` dependency at the host's own tree.

use crate::traits::{DynamicPlugin, OpaquePlugin};

/// Name of the function every plugin library exports.
pub const PLUGIN_ENTRY_SYMBOL: &str = "dynaplug_plugin_entry";

/// What a plugin entry function hands back to the host.
pub enum PluginExport {
    /// The value implements every capability directly.
    Capable(Box<dyn DynamicPlugin>),
    /// The value must be probed for its capabilities.
    Opaque(Box<dyn OpaquePlugin>),
}

impl PluginExport {
    pub fn convention(&self) -> &'static str {
        match self {
            Self::Capable(_) => "capable",
            Self::Opaque(_) => "opaque",
        }
    }
}

impl std::fmt::Debug for PluginExport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PluginExport")
            .field(&self.convention())
            .finish()
    }
}

/// Signature of [`PLUGIN_ENTRY_SYMBOL`].
pub type PluginEntryFn = fn() -> PluginExport;

/// Exports the plugin entry function from a `cdylib` crate.
///
/// `capable` expects a constructor returning a type that implements all
/// capability traits; `opaque` expects one returning an [`OpaquePlugin`].
#[macro_export]
macro_rules! declare_plugin {
    (capable $ctor:expr) => {
        #[unsafe(no_mangle)]
        pub fn dynaplug_plugin_entry() -> $crate::abi::PluginExport {
            $crate::abi::PluginExport::Capable(::std::boxed::Box::new(($ctor)()))
        }
    };
    (opaque $ctor:expr) => {
        #[unsafe(no_mangle)]
        pub fn dynaplug_plugin_entry() -> $crate::abi::PluginExport {
            $crate::abi::PluginExport::Opaque(::std::boxed::Box::new(($ctor)()))
        }
    };
}
