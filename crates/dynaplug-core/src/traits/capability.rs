// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Capability traits implemented by dynamically loaded plugins.
//!
//! A plugin is the sum of five capabilities: initialise, describe, provide
//! handlers, health-check, and clean up. Libraries that implement all five
//! are exported as a [`DynamicPlugin`]. Libraries that only expose some of
//! them through an [`OpaquePlugin`] are probed at load time and wrapped by
//! the host in an adapter.

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{PluginMetadata, PluginRequest, PluginResponse};

/// Error type that crosses the plugin boundary.
pub type PluginFailure = Box<dyn std::error::Error + Send + Sync>;

/// Result type for every plugin-facing call.
pub type PluginResult<T> = Result<T, PluginFailure>;

/// A request handler exported by a plugin.
///
/// Handlers are synchronous. The gateway runs them on the blocking pool so a
/// slow or panicking handler never stalls the async runtime.
pub type PluginHandler =
    Arc<dyn Fn(&PluginRequest) -> PluginResult<PluginResponse> + Send + Sync>;

/// Handler name to handler, as returned by [`ProvideHandlers::handlers`].
pub type HandlerTable = HashMap<String, PluginHandler>;

/// Free-form configuration passed to [`Initialize::initialize`].
pub type PluginConfig = serde_json::Map<String, serde_json::Value>;

pub trait Initialize: Send + Sync {
    /// Prepares the plugin for use.
    ///
    /// Returning [`AlreadyInitialized`] (or any error whose message contains
    /// "already initialized") is tolerated by the loader.
    fn initialize(&self, config: &PluginConfig) -> PluginResult<()>;
}

pub trait Describe: Send + Sync {
    /// Self-reported identity of the live instance.
    fn metadata(&self) -> PluginMetadata;
}

pub trait ProvideHandlers: Send + Sync {
    fn handlers(&self) -> HandlerTable;
}

pub trait HealthCheck: Send + Sync {
    /// `Ok(())` means healthy. May block; the host bounds it with a timeout.
    fn health(&self) -> PluginResult<()>;
}

pub trait Cleanup: Send + Sync {
    fn cleanup(&self) -> PluginResult<()>;
}

/// The full capability set. Implemented automatically for any type that
/// provides all five capabilities.
pub trait DynamicPlugin: Initialize + Describe + ProvideHandlers + HealthCheck + Cleanup {}

impl<T> DynamicPlugin for T where T: Initialize + Describe + ProvideHandlers + HealthCheck + Cleanup
{}

/// A plugin value whose capabilities are discovered at load time.
///
/// Each accessor returns `None` unless overridden. The loader requires
/// initialise, handlers, health, and cleanup; describe is optional.
pub trait OpaquePlugin: Send + Sync {
    fn as_initialize(&self) -> Option<&dyn Initialize> {
        None
    }

    fn as_describe(&self) -> Option<&dyn Describe> {
        None
    }

    fn as_handlers(&self) -> Option<&dyn ProvideHandlers> {
        None
    }

    fn as_health_check(&self) -> Option<&dyn HealthCheck> {
        None
    }

    fn as_cleanup(&self) -> Option<&dyn Cleanup> {
        None
    }
}

/// Returned from [`Initialize::initialize`] when the instance was set up before.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("plugin already initialized")]
pub struct AlreadyInitialized;

/// Whether a plugin init error signals a repeated initialisation.
pub fn is_already_initialized(err: &(dyn std::error::Error + Send + Sync + 'static)) -> bool {
    err.downcast_ref::<AlreadyInitialized>().is_some()
        || err
            .to_string()
            .to_ascii_lowercase()
            .contains("already initialized")
}
