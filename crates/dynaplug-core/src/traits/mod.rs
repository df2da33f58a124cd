// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Plugin capability traits.

pub mod capability;

pub use capability::{
    is_already_initialized, AlreadyInitialized, Cleanup, Describe, DynamicPlugin, HandlerTable,
    HealthCheck, Initialize, OpaquePlugin, PluginConfig, PluginFailure, PluginHandler,
    PluginResult, ProvideHandlers,
};
