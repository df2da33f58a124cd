// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `dynaplug serve` implementation.
//!
//! Wires the plugin manager to the HTTP gateway, auto-loads configured
//! plugins, starts health monitoring, and waits for a shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use dynaplug_config::DynaplugConfig;
use dynaplug_core::DynaplugError;
use dynaplug_gateway::{start_server, GatewayState, ServerConfig};
use dynaplug_plugin::{EventBus, PluginManager};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::shutdown;

/// How long the gateway gets to drain after plugins are unloaded.
const SERVER_GRACE: Duration = Duration::from_secs(10);

/// Runs the `dynaplug serve` command until SIGINT or SIGTERM.
pub async fn run_serve(config: DynaplugConfig) -> Result<(), DynaplugError> {
    init_tracing(&config.server.log_level);

    let server_config = ServerConfig {
        host: config.server.host.clone(),
        port: config.server.port,
    };
    let manager = Arc::new(PluginManager::new(config)?);
    let event_log = spawn_event_logger(manager.events());

    let loaded = manager.auto_load().await;
    info!(
        loaded,
        configured = manager.config().plugins.auto_load.len(),
        "auto-load complete"
    );

    if manager.start_health_monitor().is_some() {
        let settings = manager.health().settings();
        info!(interval_secs = settings.interval.as_secs(), "health monitor started");
    } else {
        info!("health checks disabled");
    }

    let signal = shutdown::install_signal_handler();
    let server_cancel = CancellationToken::new();
    let state = GatewayState::new(Arc::clone(&manager));
    let server = {
        let server_cancel = server_cancel.clone();
        let signal = signal.clone();
        tokio::spawn(async move {
            if let Err(e) = start_server(&server_config, state, server_cancel).await {
                error!(error = %e, "gateway failed");
                signal.cancel();
            }
        })
    };

    info!("dynaplug ready");
    shutdown::shutdown_sequence(signal, &manager, server_cancel, server, SERVER_GRACE).await;

    event_log.abort();
    info!("dynaplug stopped");
    Ok(())
}

/// Mirrors lifecycle events into the log.
fn spawn_event_logger(events: &EventBus) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    debug!(plugin_id = event.plugin_id().unwrap_or("-"), ?event, "lifecycle event");
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event logger lagged behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Initializes the tracing subscriber with the given log level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("dynaplug={log_level},warn")));

    // A second init (tests, embedding) is not an error worth failing over.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .try_init();
}
