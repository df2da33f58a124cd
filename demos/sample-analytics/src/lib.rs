// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sample analytics plugin.
//!
//! Build and load it through a running gateway:
//!
//! ```text
//! curl -X POST localhost:8080/api/plugins/load \
//!   -H 'content-type: application/json' \
//!   -d '{"source": "local:/path/to/demos/sample-analytics"}'
//! curl localhost:8080/plugins/sample-analytics/metrics
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use dynaplug_core::{
    declare_plugin, AlreadyInitialized, Cleanup, Describe, HandlerTable, HealthCheck, Initialize,
    PluginConfig, PluginHandler, PluginMetadata, PluginRequest, PluginResponse, PluginResult,
    ProvideHandlers,
};
use serde_json::json;

#[derive(Default)]
struct Counters {
    data_requests: AtomicU64,
    metric_requests: AtomicU64,
}

pub struct SampleAnalytics {
    initialized: AtomicBool,
    series: Mutex<String>,
    started: Mutex<Option<Instant>>,
    counters: Arc<Counters>,
}

impl SampleAnalytics {
    pub fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            series: Mutex::new("requests".to_string()),
            started: Mutex::new(None),
            counters: Arc::new(Counters::default()),
        }
    }

    fn series(&self) -> String {
        self.series
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl Default for SampleAnalytics {
    fn default() -> Self {
        Self::new()
    }
}

impl Initialize for SampleAnalytics {
    fn initialize(&self, config: &PluginConfig) -> PluginResult<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Err(Box::new(AlreadyInitialized));
        }
        if let Some(series) = config.get("series").and_then(|v| v.as_str()) {
            if let Ok(mut current) = self.series.lock() {
                *current = series.to_string();
            }
        }
        if let Ok(mut started) = self.started.lock() {
            *started = Some(Instant::now());
        }
        Ok(())
    }
}

impl Describe for SampleAnalytics {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            id: "sample-analytics".into(),
            name: "Sample Analytics".into(),
            version: "1.0.0".into(),
            description: "Counts requests and reports simple usage figures".into(),
            author: "Dynaplug Contributors".into(),
        }
    }
}

impl ProvideHandlers for SampleAnalytics {
    fn handlers(&self) -> HandlerTable {
        let mut table = HandlerTable::new();

        let counters = Arc::clone(&self.counters);
        let series = self.series();
        let get_data: PluginHandler = Arc::new(move |req: &PluginRequest| {
            let n = counters.data_requests.fetch_add(1, Ordering::Relaxed) + 1;
            let limit = req
                .query
                .get("limit")
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(5)
                .min(100);
            let points: Vec<_> = (0..limit)
                .map(|i| json!({ "t": i, "value": (n + i) % 17 }))
                .collect();
            Ok(PluginResponse::json(200, &json!({ "series": series, "points": points })))
        });
        table.insert("get_data".into(), get_data);

        let counters = Arc::clone(&self.counters);
        let started = self.started.lock().ok().and_then(|s| *s);
        let get_metrics: PluginHandler = Arc::new(move |_: &PluginRequest| {
            let metrics_served = counters.metric_requests.fetch_add(1, Ordering::Relaxed) + 1;
            Ok(PluginResponse::json(
                200,
                &json!({
                    "data_requests": counters.data_requests.load(Ordering::Relaxed),
                    "metric_requests": metrics_served,
                    "uptime_secs": started.map(|s| s.elapsed().as_secs()).unwrap_or(0),
                }),
            ))
        });
        table.insert("get_metrics".into(), get_metrics);

        table
    }
}

impl HealthCheck for SampleAnalytics {
    fn health(&self) -> PluginResult<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err("not initialized".into())
        }
    }
}

impl Cleanup for SampleAnalytics {
    fn cleanup(&self) -> PluginResult<()> {
        self.initialized.store(false, Ordering::SeqCst);
        Ok(())
    }
}

declare_plugin!(capable SampleAnalytics::new);
