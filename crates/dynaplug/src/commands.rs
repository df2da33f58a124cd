// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One-shot CLI commands: manifest validation and build-cache administration.

use std::io::IsTerminal;
use std::path::Path;

use dynaplug_config::DynaplugConfig;
use dynaplug_core::DynaplugError;
use dynaplug_plugin::{load_manifest, BuildCache, BuildCacheInfo, ManifestValidator, PluginManifest};

/// Loads and validates a manifest without building or loading anything.
pub fn check_manifest(path: &Path) -> Result<PluginManifest, DynaplugError> {
    let manifest = load_manifest(path)?;
    ManifestValidator::new().validate_manifest(&manifest)?;
    Ok(manifest)
}

/// Runs `dynaplug validate <manifest>`.
pub fn run_validate(path: &Path, plain: bool) -> Result<(), DynaplugError> {
    let use_color = !plain && std::io::stdout().is_terminal();

    match check_manifest(path) {
        Ok(manifest) => {
            let status = if use_color {
                use colored::Colorize;
                "✓".green().to_string()
            } else {
                "[OK]".to_string()
            };
            println!(
                "  {status} {} {} ({})",
                manifest.id,
                manifest.version,
                path.display()
            );
            for endpoint in &manifest.endpoints {
                println!(
                    "      {:<7} {:<30} -> {}",
                    endpoint.method.to_uppercase(),
                    endpoint.path,
                    endpoint.handler
                );
            }
            Ok(())
        }
        Err(e) => {
            let status = if use_color {
                use colored::Colorize;
                "✗".red().to_string()
            } else {
                "[FAIL]".to_string()
            };
            println!("  {status} {}", path.display());
            Err(e)
        }
    }
}

/// Opens the configured build cache without constructing a manager.
fn open_cache(config: &DynaplugConfig) -> Result<BuildCache, DynaplugError> {
    BuildCache::open(&config.plugins.cache_dir)
}

/// Runs `dynaplug cache info`, printing the snapshot as JSON.
pub fn run_cache_info(config: &DynaplugConfig) -> Result<(), DynaplugError> {
    let info: BuildCacheInfo = open_cache(config)?.info();
    let rendered = serde_json::to_string_pretty(&info)
        .map_err(|e| DynaplugError::runtime(format!("failed to encode cache info: {e}")))?;
    println!("{rendered}");
    Ok(())
}

/// Runs `dynaplug cache clear`.
pub fn run_cache_clear(config: &DynaplugConfig) -> Result<(), DynaplugError> {
    let cache = open_cache(config)?;
    let removed = cache.len();
    cache.clear()?;
    println!("removed {removed} cached artifact(s) from {}", cache.dir().display());
    Ok(())
}
