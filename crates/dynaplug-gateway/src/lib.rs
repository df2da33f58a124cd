// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP surface of the dynaplug runtime.
//!
//! Serves the plugin administration API under `/api` and proxies every
//! other request to the plugin route table, applying each endpoint's
//! validation and rate-limit rules before calling the plugin handler.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod proxy;
pub mod server;

pub use error::{status_for, ApiError, ErrorResponse};
pub use middleware::RateLimiter;
pub use server::{build_router, start_server, GatewayState, ServerConfig};
