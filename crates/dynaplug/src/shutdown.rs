// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Graceful shutdown coordination with signal handling.
//!
//! SIGTERM and SIGINT (Ctrl+C) cancel a [`CancellationToken`]. The serve
//! loop then stops health monitoring, unloads every plugin, and only then
//! stops the HTTP server.

use std::time::Duration;

use dynaplug_plugin::PluginManager;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Installs signal handlers for SIGTERM and SIGINT.
///
/// Returns a token that is cancelled when either signal is received.
pub fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => info!("received SIGINT (Ctrl+C), initiating shutdown"),
                        _ = sigterm.recv() => info!("received SIGTERM, initiating shutdown"),
                        _ = token_clone.cancelled() => return,
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to install SIGTERM handler, using Ctrl+C only");
                    tokio::select! {
                        _ = ctrl_c => info!("received SIGINT (Ctrl+C), initiating shutdown"),
                        _ = token_clone.cancelled() => return,
                    }
                }
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                _ = ctrl_c => info!("received Ctrl+C, initiating shutdown"),
                _ = token_clone.cancelled() => return,
            }
        }

        token_clone.cancel();
        debug!("shutdown signal handler completed");
    });

    token
}

/// Runs the shutdown sequence once `signal` fires.
///
/// Plugins are unloaded while the server is still up, so in-flight proxy
/// calls finish against live instances. `server_cancel` is triggered last
/// and the server task is given `grace` to drain.
pub async fn shutdown_sequence(
    signal: CancellationToken,
    manager: &PluginManager,
    server_cancel: CancellationToken,
    server: JoinHandle<()>,
    grace: Duration,
) {
    signal.cancelled().await;

    // Stops the health monitor, then unloads each plugin.
    manager.shutdown().await;

    server_cancel.cancel();
    match tokio::time::timeout(grace, server).await {
        Ok(Ok(())) => info!("gateway stopped"),
        Ok(Err(e)) => warn!(error = %e, "gateway task ended abnormally"),
        Err(_) => warn!(grace_secs = grace.as_secs(), "gateway did not stop in time"),
    }
}
