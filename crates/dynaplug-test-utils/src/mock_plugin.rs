// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock plugins implementing the capability traits in-process.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dynaplug_core::{
    AlreadyInitialized, Cleanup, Describe, HandlerTable, HealthCheck, Initialize, OpaquePlugin,
    PluginConfig, PluginHandler, PluginMetadata, PluginRequest, PluginResponse, PluginResult,
    ProvideHandlers,
};

/// What the next health probe does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HealthMode {
    #[default]
    Healthy,
    Failing,
    Panicking,
    /// Blocks the probing thread for the given time, then succeeds.
    Hanging(Duration),
}

/// Shared handle for steering a mock after it has been boxed and loaded.
#[derive(Debug, Default)]
pub struct MockControl {
    health: Mutex<HealthMode>,
    pub init_calls: AtomicUsize,
    pub health_calls: AtomicUsize,
    pub cleanup_calls: AtomicUsize,
    pub handler_calls: AtomicUsize,
}

impl MockControl {
    pub fn set_health(&self, mode: HealthMode) {
        *self.health.lock().unwrap_or_else(|p| p.into_inner()) = mode;
    }

    pub fn health(&self) -> HealthMode {
        *self.health.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Names of the handlers every mock exports unless removed.
pub const MOCK_HANDLERS: &[&str] = &[
    "get_data",
    "get_metrics",
    "echo",
    "get_item",
    "limited",
    "boom",
];

fn build_handlers(id: &str, control: &Arc<MockControl>, skip: &[String]) -> HandlerTable {
    let mut table = HandlerTable::new();
    for name in MOCK_HANDLERS {
        if skip.iter().any(|s| s == name) {
            continue;
        }
        let plugin_id = id.to_string();
        let control = Arc::clone(control);
        let handler: PluginHandler = match *name {
            "echo" => Arc::new(move |req: &PluginRequest| {
                control.handler_calls.fetch_add(1, Ordering::SeqCst);
                let mut resp = PluginResponse::text(200, String::from_utf8_lossy(&req.body));
                resp.headers
                    .insert("content-type".into(), "application/json".into());
                Ok(resp)
            }),
            "get_item" => Arc::new(move |req: &PluginRequest| {
                control.handler_calls.fetch_add(1, Ordering::SeqCst);
                Ok(PluginResponse::json(
                    200,
                    &serde_json::json!({
                        "id": req.params.get("id"),
                        "query": req.query,
                    }),
                ))
            }),
            "boom" => Arc::new(move |_: &PluginRequest| -> PluginResult<PluginResponse> {
                control.handler_calls.fetch_add(1, Ordering::SeqCst);
                panic!("handler exploded");
            }),
            other => {
                let handler_name = other.to_string();
                Arc::new(move |req: &PluginRequest| {
                    control.handler_calls.fetch_add(1, Ordering::SeqCst);
                    Ok(PluginResponse::json(
                        200,
                        &serde_json::json!({
                            "plugin": plugin_id,
                            "handler": handler_name,
                            "path": req.path,
                        }),
                    ))
                })
            }
        };
        table.insert((*name).to_string(), handler);
    }
    table
}

fn probe(control: &MockControl) -> PluginResult<()> {
    control.health_calls.fetch_add(1, Ordering::SeqCst);
    match control.health() {
        HealthMode::Healthy => Ok(()),
        HealthMode::Failing => Err("mock plugin reports failure".into()),
        HealthMode::Panicking => panic!("mock health probe panicked"),
        HealthMode::Hanging(duration) => {
            std::thread::sleep(duration);
            Ok(())
        }
    }
}

/// A capable plugin with configurable behaviour.
pub struct MockPlugin {
    id: String,
    reported_id: Option<String>,
    already_initialized: bool,
    failing_init: bool,
    failing_cleanup: bool,
    skip_handlers: Vec<String>,
    control: Arc<MockControl>,
}

impl MockPlugin {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            reported_id: None,
            already_initialized: false,
            failing_init: false,
            failing_cleanup: false,
            skip_handlers: Vec::new(),
            control: Arc::new(MockControl::default()),
        }
    }

    /// Handle shared with the plugin; grab it before boxing.
    pub fn control(&self) -> Arc<MockControl> {
        Arc::clone(&self.control)
    }

    /// Initialize returns [`AlreadyInitialized`].
    pub fn already_initialized(mut self) -> Self {
        self.already_initialized = true;
        self
    }

    pub fn failing_init(mut self) -> Self {
        self.failing_init = true;
        self
    }

    pub fn failing_cleanup(mut self) -> Self {
        self.failing_cleanup = true;
        self
    }

    /// Reports a different id from [`Describe::metadata`].
    pub fn reporting_id(mut self, id: &str) -> Self {
        self.reported_id = Some(id.to_string());
        self
    }

    pub fn without_handler(mut self, name: &str) -> Self {
        self.skip_handlers.push(name.to_string());
        self
    }

    pub fn with_health(self, mode: HealthMode) -> Self {
        self.control.set_health(mode);
        self
    }
}

impl Initialize for MockPlugin {
    fn initialize(&self, _config: &PluginConfig) -> PluginResult<()> {
        self.control.init_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_init {
            return Err("missing api key".into());
        }
        if self.already_initialized {
            return Err(Box::new(AlreadyInitialized));
        }
        Ok(())
    }
}

impl Describe for MockPlugin {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            id: self.reported_id.clone().unwrap_or_else(|| self.id.clone()),
            name: format!("Mock {}", self.id),
            version: "1.0.0".into(),
            description: "mock plugin for tests".into(),
            author: "tests".into(),
        }
    }
}

impl ProvideHandlers for MockPlugin {
    fn handlers(&self) -> HandlerTable {
        build_handlers(&self.id, &self.control, &self.skip_handlers)
    }
}

impl HealthCheck for MockPlugin {
    fn health(&self) -> PluginResult<()> {
        probe(&self.control)
    }
}

impl Cleanup for MockPlugin {
    fn cleanup(&self) -> PluginResult<()> {
        self.control.cleanup_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_cleanup {
            return Err("cleanup failed".into());
        }
        Ok(())
    }
}

/// An opaque plugin whose capabilities can be switched off one by one.
pub struct OpaqueMock {
    id: String,
    describe: bool,
    health: bool,
    initialize: bool,
    cleanup: bool,
    control: Arc<MockControl>,
}

impl OpaqueMock {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            describe: true,
            health: true,
            initialize: true,
            cleanup: true,
            control: Arc::new(MockControl::default()),
        }
    }

    pub fn control(&self) -> Arc<MockControl> {
        Arc::clone(&self.control)
    }

    pub fn without_describe(mut self) -> Self {
        self.describe = false;
        self
    }

    pub fn without_health(mut self) -> Self {
        self.health = false;
        self
    }

    pub fn without_initialize(mut self) -> Self {
        self.initialize = false;
        self
    }

    pub fn without_cleanup(mut self) -> Self {
        self.cleanup = false;
        self
    }
}

impl Initialize for OpaqueMock {
    fn initialize(&self, _config: &PluginConfig) -> PluginResult<()> {
        self.control.init_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Describe for OpaqueMock {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            id: self.id.clone(),
            name: format!("Opaque {}", self.id),
            version: "1.0.0".into(),
            description: "opaque mock".into(),
            author: "tests".into(),
        }
    }
}

impl ProvideHandlers for OpaqueMock {
    fn handlers(&self) -> HandlerTable {
        build_handlers(&self.id, &self.control, &[])
    }
}

impl HealthCheck for OpaqueMock {
    fn health(&self) -> PluginResult<()> {
        probe(&self.control)
    }
}

impl Cleanup for OpaqueMock {
    fn cleanup(&self) -> PluginResult<()> {
        self.control.cleanup_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl OpaquePlugin for OpaqueMock {
    fn as_initialize(&self) -> Option<&dyn Initialize> {
        self.initialize.then_some(self as &dyn Initialize)
    }

    fn as_describe(&self) -> Option<&dyn Describe> {
        self.describe.then_some(self as &dyn Describe)
    }

    fn as_handlers(&self) -> Option<&dyn ProvideHandlers> {
        Some(self)
    }

    fn as_health_check(&self) -> Option<&dyn HealthCheck> {
        self.health.then_some(self as &dyn HealthCheck)
    }

    fn as_cleanup(&self) -> Option<&dyn Cleanup> {
        self.cleanup.then_some(self as &dyn Cleanup)
    }
}
