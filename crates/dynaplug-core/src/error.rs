// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the dynamic plugin runtime.

use strum::Display;
use thiserror::Error;

/// The primary error type returned by every runtime operation.
///
/// Variants map one-to-one onto the failure classes an operator sees:
/// the gateway turns [`ErrorKind`] into an HTTP status, and the registry
/// turns it into an error-ring code.
#[derive(Debug, Error)]
pub enum DynaplugError {
    /// A plugin, manifest, artifact, or handler does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Manifest or artifact shape violation, or a missing plugin capability.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Duplicate plugin identity or route.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Filesystem failures (unreadable file, copy failure).
    #[error("i/o error: {message}")]
    Io {
        message: String,
        source: std::io::Error,
    },

    /// External toolchain failure. `output` holds the captured combined output.
    #[error("build failed: {message}")]
    Build { message: String, output: String },

    /// Plugin initialisation failure, caught panic, or other runtime fault.
    #[error("runtime error: {message}")]
    Runtime {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Checksum mismatch, sandbox violation, or size ceiling exceeded.
    #[error("security violation: {0}")]
    Security(String),

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Invalid runtime configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Coarse classification of a [`DynaplugError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Validation,
    Conflict,
    Io,
    Build,
    Runtime,
    Security,
    Config,
}

impl DynaplugError {
    /// Wraps an I/O error with a description of what was being attempted.
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Builds a runtime error without an underlying source.
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
            source: None,
        }
    }

    /// Returns the failure class. Timeouts are runtime failures.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Io { .. } => ErrorKind::Io,
            Self::Build { .. } => ErrorKind::Build,
            Self::Runtime { .. } | Self::Timeout { .. } => ErrorKind::Runtime,
            Self::Security(_) => ErrorKind::Security,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Captured toolchain output, present only on build failures.
    pub fn build_output(&self) -> Option<&str> {
        match self {
            Self::Build { output, .. } => Some(output.as_str()),
            _ => None,
        }
    }
}
