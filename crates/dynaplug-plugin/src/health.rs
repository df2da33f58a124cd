// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Periodic and on-demand plugin health probing with hysteresis.
//!
//! Counters are updated first, then the reported health is derived:
//! a failure is `unhealthy` once consecutive failures reach the unhealthy
//! threshold and `degraded` before that; a success is `healthy` once
//! consecutive successes reach the healthy threshold and `degraded` before
//! that. Probes run on the blocking pool under a timeout, so a hung or
//! panicking plugin is reported as a failure instead of stalling the sweep.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dynaplug_config::model::HealthConfig;
use dynaplug_core::{DynaplugError, HealthState};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::{EventBus, PluginEvent};
use crate::panic_message;
use crate::registry::{ErrorCode, ErrorRecord, PluginRegistry, RegisteredPlugin};

/// Counters the monitor keeps per plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginHealthData {
    pub status: HealthState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_check: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub total_checks: u64,
    pub total_failures: u64,
}

impl Default for PluginHealthData {
    fn default() -> Self {
        Self {
            status: HealthState::Unknown,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_check: None,
            last_error: None,
            total_checks: 0,
            total_failures: 0,
        }
    }
}

/// Schedule and hysteresis thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSettings {
    pub interval: Duration,
    pub timeout: Duration,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
}

impl From<&HealthConfig> for HealthSettings {
    fn from(config: &HealthConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_secs),
            timeout: Duration::from_secs(config.timeout_secs),
            healthy_threshold: config.healthy_threshold,
            unhealthy_threshold: config.unhealthy_threshold,
        }
    }
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self::from(&HealthConfig::default())
    }
}

/// Partial update for [`HealthMonitor::update_configuration`]. Zero or
/// absent values leave the current setting alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
pub struct HealthSettingsUpdate {
    #[serde(default)]
    pub interval_secs: Option<u64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub healthy_threshold: Option<u32>,
    #[serde(default)]
    pub unhealthy_threshold: Option<u32>,
}

/// Aggregate view across all monitored plugins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSummary {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub degraded: usize,
    pub unknown: usize,
    pub overall: HealthState,
}

fn apply_outcome(
    data: &mut PluginHealthData,
    outcome: &Result<(), String>,
    settings: &HealthSettings,
    now: DateTime<Utc>,
) {
    data.total_checks += 1;
    data.last_check = Some(now);
    match outcome {
        Ok(()) => {
            data.consecutive_successes += 1;
            data.consecutive_failures = 0;
            data.last_error = None;
            data.status = if data.consecutive_successes >= settings.healthy_threshold {
                HealthState::Healthy
            } else {
                HealthState::Degraded
            };
        }
        Err(message) => {
            data.consecutive_failures += 1;
            data.consecutive_successes = 0;
            data.total_failures += 1;
            data.last_error = Some(message.clone());
            data.status = if data.consecutive_failures >= settings.unhealthy_threshold {
                HealthState::Unhealthy
            } else {
                HealthState::Degraded
            };
        }
    }
}

/// Runs one probe on the blocking pool, bounded by `timeout`.
async fn probe(entry: Arc<RegisteredPlugin>, timeout: Duration) -> Result<(), String> {
    let instance = Arc::clone(&entry.instance);
    let task = tokio::task::spawn_blocking(move || {
        instance.plugin().health().map_err(|e| e.to_string())
    });

    match tokio::time::timeout(timeout, task).await {
        Err(_) => Err(format!("health check timed out after {timeout:?}")),
        Ok(Err(join)) if join.is_panic() => Err(format!(
            "health check panicked: {}",
            panic_message(join.into_panic().as_ref())
        )),
        Ok(Err(join)) => Err(format!("health check task failed: {join}")),
        Ok(Ok(result)) => result,
    }
}

pub struct HealthMonitor {
    registry: Arc<PluginRegistry>,
    events: EventBus,
    settings: RwLock<HealthSettings>,
    data: Mutex<HashMap<String, PluginHealthData>>,
    cancel: CancellationToken,
}

impl HealthMonitor {
    pub fn new(registry: Arc<PluginRegistry>, events: EventBus, settings: HealthSettings) -> Self {
        Self {
            registry,
            events,
            settings: RwLock::new(settings),
            data: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    fn data(&self) -> MutexGuard<'_, HashMap<String, PluginHealthData>> {
        self.data.lock().unwrap_or_else(|poisoned| {
            warn!("health data lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn settings(&self) -> HealthSettings {
        *self.settings.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Starts the periodic sweep. The first sweep runs one interval after start.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move { monitor.run().await })
    }

    async fn run(&self) {
        let mut period = self.settings().interval;
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        info!(interval_secs = period.as_secs(), "health monitor started");

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("health monitor stopped");
                    break;
                }
                _ = interval.tick() => {
                    self.check_all().await;

                    let current = self.settings().interval;
                    if current != period {
                        period = current;
                        interval = tokio::time::interval(period);
                        interval.tick().await;
                        debug!(interval_secs = period.as_secs(), "health interval changed");
                    }
                }
            }
        }
    }

    /// Cancels the loop at the next tick boundary.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn add_plugin(&self, id: &str) {
        self.data().entry(id.to_string()).or_default();
        debug!(plugin_id = %id, "health monitoring added");
    }

    /// Stops tracking `id`. Its counters are discarded.
    pub fn remove_plugin(&self, id: &str) {
        if self.data().remove(id).is_some() {
            debug!(plugin_id = %id, "health monitoring removed");
        }
    }

    pub fn health_data(&self, id: &str) -> Option<PluginHealthData> {
        self.data().get(id).cloned()
    }

    pub fn all_health_data(&self) -> BTreeMap<String, PluginHealthData> {
        self.data()
            .iter()
            .map(|(id, d)| (id.clone(), d.clone()))
            .collect()
    }

    /// One probe per registered plugin, concurrently.
    pub async fn check_all(&self) {
        let plugins = self.registry.list();
        if plugins.is_empty() {
            return;
        }
        let timeout = self.settings().timeout;
        let checks = plugins.into_iter().map(|entry| async move {
            let id = entry.id().to_string();
            let outcome = probe(entry, timeout).await;
            self.record(&id, outcome);
        });
        futures::future::join_all(checks).await;
    }

    /// Probes one plugin now, outside the schedule.
    pub async fn check_plugin(&self, id: &str) -> Result<PluginHealthData, DynaplugError> {
        let entry = self
            .registry
            .get(id)
            .ok_or_else(|| DynaplugError::NotFound(format!("plugin {id}")))?;
        let outcome = probe(entry, self.settings().timeout).await;
        Ok(self.record(id, outcome))
    }

    /// Updates counters, writes through to the registry, emits transitions.
    fn record(&self, id: &str, outcome: Result<(), String>) -> PluginHealthData {
        let settings = self.settings();
        let snapshot = {
            let mut data = self.data();
            let entry = data.entry(id.to_string()).or_default();
            apply_outcome(entry, &outcome, &settings, Utc::now());
            entry.clone()
        };

        // add_error forces unhealthy, so read the prior value first.
        let before = self.registry.status(id).map(|s| s.health);
        if let Err(message) = &outcome {
            warn!(
                plugin_id = %id,
                error = %message,
                consecutive_failures = snapshot.consecutive_failures,
                "plugin health check failed"
            );
            let record = ErrorRecord::new(ErrorCode::HealthCheck, message.clone(), None);
            if let Err(e) = self.registry.add_error(id, record) {
                debug!(plugin_id = %id, error = %e, "plugin vanished before health error was recorded");
            }
        }

        match self.registry.update_health(id, snapshot.status) {
            Ok(previous) if before.unwrap_or(previous) != snapshot.status => {
                let previous = before.unwrap_or(previous);
                info!(plugin_id = %id, from = %previous, to = %snapshot.status, "plugin health changed");
                self.events.publish(PluginEvent::HealthChanged {
                    plugin_id: id.to_string(),
                    from: previous,
                    to: snapshot.status,
                });
            }
            Ok(_) => {}
            Err(e) => debug!(plugin_id = %id, error = %e, "plugin vanished before health was recorded"),
        }
        snapshot
    }

    pub fn summary(&self) -> HealthSummary {
        let data = self.data();
        let count = |state: HealthState| data.values().filter(|d| d.status == state).count();
        let healthy = count(HealthState::Healthy);
        let unhealthy = count(HealthState::Unhealthy);

        let overall = if unhealthy > healthy {
            HealthState::Unhealthy
        } else if unhealthy > 0 {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        HealthSummary {
            total: data.len(),
            healthy,
            unhealthy,
            degraded: count(HealthState::Degraded),
            unknown: count(HealthState::Unknown),
            overall,
        }
    }

    /// Applies non-zero values. The interval takes effect after the next sweep.
    pub fn update_configuration(&self, update: HealthSettingsUpdate) -> HealthSettings {
        let mut settings = self
            .settings
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(secs) = update.interval_secs.filter(|s| *s > 0) {
            settings.interval = Duration::from_secs(secs);
        }
        if let Some(secs) = update.timeout_secs.filter(|s| *s > 0) {
            settings.timeout = Duration::from_secs(secs);
        }
        if let Some(n) = update.healthy_threshold.filter(|n| *n > 0) {
            settings.healthy_threshold = n;
        }
        if let Some(n) = update.unhealthy_threshold.filter(|n| *n > 0) {
            settings.unhealthy_threshold = n;
        }
        info!(?settings, "health monitor configuration updated");
        *settings
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("settings", &self.settings())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> HealthSettings {
        HealthSettings::default()
    }

    #[test]
    fn success_hysteresis() {
        let mut data = PluginHealthData::default();
        apply_outcome(&mut data, &Ok(()), &settings(), Utc::now());
        assert_eq!(data.status, HealthState::Degraded);
        apply_outcome(&mut data, &Ok(()), &settings(), Utc::now());
        assert_eq!(data.status, HealthState::Healthy);
        assert_eq!(data.total_checks, 2);
    }

    #[test]
    fn failure_hysteresis_and_reset() {
        let mut data = PluginHealthData::default();
        for _ in 0..2 {
            apply_outcome(&mut data, &Err("down".into()), &settings(), Utc::now());
            assert_eq!(data.status, HealthState::Degraded);
        }
        apply_outcome(&mut data, &Err("down".into()), &settings(), Utc::now());
        assert_eq!(data.status, HealthState::Unhealthy);
        assert_eq!(data.total_failures, 3);
        assert_eq!(data.last_error.as_deref(), Some("down"));

        apply_outcome(&mut data, &Ok(()), &settings(), Utc::now());
        assert_eq!(data.consecutive_failures, 0);
        assert_eq!(data.status, HealthState::Degraded);
        assert!(data.last_error.is_none());
    }

    #[test]
    fn zero_updates_are_ignored() {
        let monitor = HealthMonitor::new(
            Arc::new(PluginRegistry::new()),
            EventBus::default(),
            settings(),
        );
        let updated = monitor.update_configuration(HealthSettingsUpdate {
            interval_secs: Some(0),
            timeout_secs: Some(2),
            healthy_threshold: None,
            unhealthy_threshold: Some(0),
        });
        assert_eq!(updated.interval, Duration::from_secs(30));
        assert_eq!(updated.timeout, Duration::from_secs(2));
        assert_eq!(updated.unhealthy_threshold, 3);
    }

    #[test]
    fn summary_overall_rules() {
        let monitor = HealthMonitor::new(
            Arc::new(PluginRegistry::new()),
            EventBus::default(),
            settings(),
        );
        assert_eq!(monitor.summary().overall, HealthState::Healthy);

        {
            let mut data = monitor.data();
            for (id, status) in [
                ("a", HealthState::Healthy),
                ("b", HealthState::Healthy),
                ("c", HealthState::Unhealthy),
            ] {
                data.insert(
                    id.into(),
                    PluginHealthData {
                        status,
                        ..Default::default()
                    },
                );
            }
        }
        let summary = monitor.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.overall, HealthState::Degraded);

        monitor.data().insert(
            "d".into(),
            PluginHealthData {
                status: HealthState::Unhealthy,
                ..Default::default()
            },
        );
        monitor.data().insert(
            "e".into(),
            PluginHealthData {
                status: HealthState::Unhealthy,
                ..Default::default()
            },
        );
        assert_eq!(monitor.summary().overall, HealthState::Unhealthy);
    }

    #[test]
    fn remove_plugin_resets_counters() {
        let monitor = HealthMonitor::new(
            Arc::new(PluginRegistry::new()),
            EventBus::default(),
            settings(),
        );
        monitor.add_plugin("a");
        monitor.record("a", Err("x".into()));
        assert_eq!(monitor.health_data("a").unwrap().total_failures, 1);
        monitor.remove_plugin("a");
        assert!(monitor.health_data("a").is_none());
        monitor.add_plugin("a");
        assert_eq!(monitor.health_data("a").unwrap(), PluginHealthData::default());
    }
}
