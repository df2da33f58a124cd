// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tracked set of plugin routes and their dispatch targets.
//!
//! Routes are keyed `"{METHOD} {prefix}/{plugin_id}{path}"`. Declared paths
//! may contain `{name}` or `:name` segments, which capture into request
//! params on resolution.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use dynaplug_core::{DynaplugError, HttpMethod, PluginHandler};

use crate::instance::PluginInstance;
use crate::manifest::EndpointConfig;

/// Builds the full path for a plugin endpoint.
pub fn plugin_path(prefix: &str, plugin_id: &str, path: &str) -> String {
    format!("{}/{plugin_id}{path}", prefix.trim_end_matches('/'))
}

/// Builds the tracked key for a plugin endpoint.
pub fn route_key(method: HttpMethod, prefix: &str, plugin_id: &str, path: &str) -> String {
    format!("{method} {}", plugin_path(prefix, plugin_id, path))
}

/// Everything needed to dispatch a request to one plugin endpoint.
pub struct RouteTarget {
    pub plugin_id: String,
    pub method: HttpMethod,
    /// Path as declared in the manifest.
    pub declared_path: String,
    /// Path including prefix and plugin namespace.
    pub full_path: String,
    pub endpoint: EndpointConfig,
    pub handler: PluginHandler,
    /// Keeps the providing library mapped while the handler can run.
    pub instance: Arc<PluginInstance>,
}

impl RouteTarget {
    pub fn key(&self) -> String {
        format!("{} {}", self.method, self.full_path)
    }
}

impl std::fmt::Debug for RouteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTarget")
            .field("plugin_id", &self.plugin_id)
            .field("key", &self.key())
            .field("handler", &self.endpoint.handler)
            .finish()
    }
}

/// A resolved route plus the values captured from its path parameters.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub target: Arc<RouteTarget>,
    pub params: BTreeMap<String, String>,
}

/// Where the loader registers routes.
pub trait RouteRegistrar: Send + Sync {
    /// Registers a target. Returns `false` if the key was already tracked.
    fn register(&self, target: RouteTarget) -> Result<bool, DynaplugError>;

    /// Drops a tracked key. Returns whether it was present.
    fn unregister(&self, key: &str) -> bool;
}

/// Process-wide route table shared by the loader and the gateway.
#[derive(Default)]
pub struct RouteTable {
    routes: RwLock<BTreeMap<String, Arc<RouteTarget>>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Arc<RouteTarget>>> {
        self.routes.read().unwrap_or_else(|poisoned| {
            tracing::warn!("route table lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Arc<RouteTarget>>> {
        self.routes.write().unwrap_or_else(|poisoned| {
            tracing::warn!("route table lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Inserts unless the key is already present.
    pub fn insert(&self, target: RouteTarget) -> bool {
        let key = target.key();
        let mut routes = self.write();
        if routes.contains_key(&key) {
            return false;
        }
        routes.insert(key, Arc::new(target));
        true
    }

    /// Drops a single key. Returns whether it was tracked.
    pub fn remove(&self, key: &str) -> bool {
        self.write().remove(key).is_some()
    }

    /// Drops every route belonging to `plugin_id`. Returns how many were removed.
    pub fn remove_plugin(&self, plugin_id: &str) -> usize {
        let mut routes = self.write();
        let before = routes.len();
        routes.retain(|_, target| target.plugin_id != plugin_id);
        before - routes.len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn keys_for(&self, plugin_id: &str) -> BTreeSet<String> {
        self.read()
            .iter()
            .filter(|(_, t)| t.plugin_id == plugin_id)
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Finds the target for a concrete request path.
    ///
    /// An exact key wins; otherwise the first parameterised route (in key
    /// order) whose segments match is used.
    pub fn resolve(&self, method: HttpMethod, path: &str) -> Option<RouteMatch> {
        let routes = self.read();
        if let Some(target) = routes.get(&format!("{method} {path}")) {
            return Some(RouteMatch {
                target: Arc::clone(target),
                params: BTreeMap::new(),
            });
        }

        routes
            .values()
            .filter(|t| t.method == method)
            .find_map(|t| {
                match_path(&t.full_path, path).map(|params| RouteMatch {
                    target: Arc::clone(t),
                    params,
                })
            })
    }

    /// Whether any route exists for the path under another method.
    pub fn path_exists(&self, path: &str) -> bool {
        self.read()
            .values()
            .any(|t| t.full_path == path || match_path(&t.full_path, path).is_some())
    }
}

impl RouteRegistrar for RouteTable {
    fn register(&self, target: RouteTarget) -> Result<bool, DynaplugError> {
        Ok(self.insert(target))
    }

    fn unregister(&self, key: &str) -> bool {
        self.remove(key)
    }
}

impl std::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTable").field("routes", &self.keys()).finish()
    }
}

fn param_name(segment: &str) -> Option<&str> {
    segment
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .or_else(|| segment.strip_prefix(':'))
        .filter(|name| !name.is_empty())
}

/// Matches `path` against a route pattern, returning captured params.
pub fn match_path(pattern: &str, path: &str) -> Option<BTreeMap<String, String>> {
    let pattern_segments: Vec<&str> = pattern.trim_end_matches('/').split('/').collect();
    let path_segments: Vec<&str> = path.trim_end_matches('/').split('/').collect();
    if pattern_segments.len() != path_segments.len() {
        return None;
    }

    let mut params = BTreeMap::new();
    for (expected, actual) in pattern_segments.iter().zip(&path_segments) {
        match param_name(expected) {
            Some(name) if !actual.is_empty() => {
                params.insert(name.to_string(), actual.to_string());
            }
            Some(_) => return None,
            None if expected == actual => {}
            None => return None,
        }
    }
    Some(params)
}
