// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lifecycle events broadcast to interested subscribers.

use dynaplug_core::HealthState;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

/// Default channel capacity; slow subscribers lag rather than block.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Something that happened to a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PluginEvent {
    Loading {
        source: String,
    },
    Loaded {
        plugin_id: String,
        version: String,
    },
    LoadFailed {
        source: String,
        error: String,
    },
    Unloaded {
        plugin_id: String,
    },
    Reloaded {
        plugin_id: String,
    },
    Enabled {
        plugin_id: String,
    },
    Disabled {
        plugin_id: String,
    },
    HealthChanged {
        plugin_id: String,
        from: HealthState,
        to: HealthState,
    },
}

impl PluginEvent {
    /// The plugin the event is about, when it is known.
    pub fn plugin_id(&self) -> Option<&str> {
        match self {
            Self::Loading { .. } | Self::LoadFailed { .. } => None,
            Self::Loaded { plugin_id, .. }
            | Self::Unloaded { plugin_id }
            | Self::Reloaded { plugin_id }
            | Self::Enabled { plugin_id }
            | Self::Disabled { plugin_id }
            | Self::HealthChanged { plugin_id, .. } => Some(plugin_id),
        }
    }
}

/// Fan-out of [`PluginEvent`]s. Cloning shares the channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PluginEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PluginEvent> {
        self.tx.subscribe()
    }

    /// Publishes an event. Having no subscribers is not an error.
    pub fn publish(&self, event: PluginEvent) {
        trace!(?event, "plugin event");
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
