// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Content-addressed cache of built plugin artifacts.
//!
//! Entries live in the cache directory as `<key>.<ext>` next to an
//! `index.json` mapping each key to the time it was stored. The index is
//! append-only; [`BuildCache::clear`] replaces it wholesale.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use dynaplug_core::DynaplugError;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::validator::NATIVE_EXTENSION;

const INDEX_FILE: &str = "index.json";

/// Cache key: sha256 over id, version, and the primary source contents.
///
/// A missing source file contributes nothing, so the key still separates
/// plugins by identity and version.
pub fn cache_key(id: &str, version: &str, primary_source: &Path) -> Result<String, DynaplugError> {
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    hasher.update(version.as_bytes());

    match std::fs::File::open(primary_source) {
        Ok(mut file) => {
            let mut buf = [0u8; 8192];
            loop {
                let n = file.read(&mut buf).map_err(|e| {
                    DynaplugError::io(format!("failed to read {}", primary_source.display()), e)
                })?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(DynaplugError::io(
                format!("failed to open {}", primary_source.display()),
                e,
            ));
        }
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Snapshot returned by [`BuildCache::info`].
#[derive(Debug, Clone, Serialize)]
pub struct BuildCacheInfo {
    pub cache_size: usize,
    pub cache_dir: String,
    /// Key to RFC 3339 build time.
    pub entries: BTreeMap<String, String>,
}

pub struct BuildCache {
    dir: PathBuf,
    index: Mutex<BTreeMap<String, DateTime<Utc>>>,
}

impl BuildCache {
    /// Opens (creating if needed) a cache rooted at `dir`.
    ///
    /// An unreadable index is logged and treated as empty.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, DynaplugError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            DynaplugError::io(format!("failed to create cache dir {}", dir.display()), e)
        })?;

        let index_path = dir.join(INDEX_FILE);
        let index = match std::fs::read_to_string(&index_path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(path = %index_path.display(), error = %e, "ignoring corrupt build cache index");
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };

        Ok(Self {
            dir,
            index: Mutex::new(index),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, DateTime<Utc>>> {
        self.index.lock().unwrap_or_else(|poisoned| {
            warn!("build cache lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn artifact_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{NATIVE_EXTENSION}"))
    }

    /// Path of a cached artifact for `key`, if the entry and its file exist.
    pub fn lookup(&self, key: &str) -> Option<PathBuf> {
        if !self.lock().contains_key(key) {
            return None;
        }
        let path = self.artifact_path(key);
        if path.is_file() {
            debug!(key = %key, "build cache hit");
            Some(path)
        } else {
            warn!(key = %key, "build cache entry has no artifact, ignoring");
            None
        }
    }

    /// Copies a freshly built artifact into the cache and records it.
    pub fn store(&self, key: &str, artifact: &Path) -> Result<PathBuf, DynaplugError> {
        let target = self.artifact_path(key);
        std::fs::copy(artifact, &target).map_err(|e| {
            DynaplugError::io(format!("failed to cache artifact {}", artifact.display()), e)
        })?;

        let mut index = self.lock();
        index.insert(key.to_string(), Utc::now());
        self.persist(&index)?;
        debug!(key = %key, "stored build cache entry");
        Ok(target)
    }

    fn persist(&self, index: &BTreeMap<String, DateTime<Utc>>) -> Result<(), DynaplugError> {
        let raw = serde_json::to_string_pretty(index)
            .map_err(|e| DynaplugError::runtime(format!("failed to encode cache index: {e}")))?;
        let path = self.dir.join(INDEX_FILE);
        std::fs::write(&path, raw)
            .map_err(|e| DynaplugError::io(format!("failed to write {}", path.display()), e))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn info(&self) -> BuildCacheInfo {
        let index = self.lock();
        BuildCacheInfo {
            cache_size: index.len(),
            cache_dir: self.dir.display().to_string(),
            entries: index
                .iter()
                .map(|(k, t)| (k.clone(), t.to_rfc3339_opts(SecondsFormat::Secs, true)))
                .collect(),
        }
    }

    /// Empties the index and removes and recreates the cache directory.
    pub fn clear(&self) -> Result<(), DynaplugError> {
        let mut index = self.lock();
        index.clear();
        if self.dir.exists() {
            std::fs::remove_dir_all(&self.dir).map_err(|e| {
                DynaplugError::io(format!("failed to clear {}", self.dir.display()), e)
            })?;
        }
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            DynaplugError::io(format!("failed to recreate {}", self.dir.display()), e)
        })?;
        info!(dir = %self.dir.display(), "build cache cleared");
        Ok(())
    }
}

impl std::fmt::Debug for BuildCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildCache")
            .field("dir", &self.dir)
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_depends_on_identity_and_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("lib.rs");
        std::fs::write(&src, "pub fn a() {}").unwrap();

        let base = cache_key("analytics", "1.0.0", &src).unwrap();
        assert_eq!(base.len(), 64);
        assert_eq!(base, cache_key("analytics", "1.0.0", &src).unwrap());
        assert_ne!(base, cache_key("analytics", "1.0.1", &src).unwrap());

        std::fs::write(&src, "pub fn b() {}").unwrap();
        assert_ne!(base, cache_key("analytics", "1.0.0", &src).unwrap());
    }

    #[test]
    fn missing_source_still_keys() {
        let dir = tempfile::tempdir().unwrap();
        let key = cache_key("analytics", "1.0.0", &dir.path().join("nope.rs")).unwrap();
        assert_eq!(key.len(), 64);
    }

    #[test]
    fn store_then_lookup_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("built.bin");
        std::fs::write(&artifact, b"\x7fELF").unwrap();

        let cache = BuildCache::open(dir.path().join("cache")).unwrap();
        assert!(cache.lookup("k1").is_none());
        let stored = cache.store("k1", &artifact).unwrap();
        assert_eq!(cache.lookup("k1"), Some(stored));

        let reopened = BuildCache::open(dir.path().join("cache")).unwrap();
        assert_eq!(reopened.len(), 1);
        assert!(reopened.lookup("k1").is_some());
    }

    #[test]
    fn info_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("built.bin");
        std::fs::write(&artifact, b"x").unwrap();
        let cache = BuildCache::open(dir.path().join("cache")).unwrap();
        cache.store("abc", &artifact).unwrap();

        let info = cache.info();
        assert_eq!(info.cache_size, 1);
        assert!(info.entries["abc"].ends_with('Z'));

        cache.clear().unwrap();
        assert!(cache.is_empty());
        assert!(cache.dir().is_dir());
        assert!(cache.lookup("abc").is_none());
        assert_eq!(std::fs::read_dir(cache.dir()).unwrap().count(), 0);
    }

    #[test]
    fn corrupt_index_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(INDEX_FILE), "not json").unwrap();
        let cache = BuildCache::open(dir.path()).unwrap();
        assert!(cache.is_empty());
    }
}
