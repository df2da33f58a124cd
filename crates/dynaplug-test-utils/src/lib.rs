// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for dynaplug crates.
//!
//! Provides in-process mock plugins and manifest/workspace fixtures, so
//! registry, loader, health, and gateway tests run without compiling or
//! opening a real plugin library.
//!
//! # Components
//!
//! - [`MockPlugin`] - Capable plugin with scripted health and init behaviour
//! - [`OpaqueMock`] - Opaque plugin with selectively missing capabilities
//! - [`fixtures`] - Manifest TOML and on-disk host/plugin trees

pub mod fixtures;
pub mod mock_plugin;

pub use fixtures::{sample_analytics_manifest_toml, test_manifest_toml};
pub use mock_plugin::{HealthMode, MockControl, MockPlugin, OpaqueMock};
