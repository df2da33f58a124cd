// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the dynaplug runtime.
//!
//! This crate is shared by the host and by every plugin library: it defines
//! the error taxonomy, the request/response types handlers exchange, the
//! capability traits plugins implement, and the exported entry-point ABI.

pub mod abi;
pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use abi::{PluginEntryFn, PluginExport, PLUGIN_ENTRY_SYMBOL};
pub use error::{DynaplugError, ErrorKind};
pub use traits::{
    is_already_initialized, AlreadyInitialized, Cleanup, Describe, DynamicPlugin, HandlerTable,
    HealthCheck, Initialize, OpaquePlugin, PluginConfig, PluginFailure, PluginHandler,
    PluginResult, ProvideHandlers,
};
pub use types::{
    HealthState, HttpMethod, PluginMetadata, PluginRequest, PluginResponse, PluginState,
};
