// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turns acquired plugin source into an installed, loadable artifact.
//!
//! Steps, in order: read and validate the manifest, prepare an isolated
//! cargo workspace ([`rewrite`]), consult the [`cache`], compile with
//! `cargo build --release --lib`, then install `<name>.<ext>` and
//! `<name>.toml` into the plugin directory. Failures are never retried.

pub mod cache;
pub mod rewrite;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dynaplug_config::model::BuildConfig;
use dynaplug_core::DynaplugError;
use tracing::{debug, info, warn};

use crate::acquire::{combined_output, SourceWorkspace};
use crate::manifest::{load_manifest, PluginManifest};
use crate::validator::{ManifestValidator, NATIVE_EXTENSION};

pub use cache::{cache_key, BuildCache, BuildCacheInfo};
pub use rewrite::{HostLayout, PreparedWorkspace};

/// Where a build left its installed files.
#[derive(Debug, Clone)]
pub struct BuiltPlugin {
    pub name: String,
    pub manifest: PluginManifest,
    pub artifact: PathBuf,
    pub manifest_path: PathBuf,
    /// True when compilation was skipped thanks to a cache hit.
    pub from_cache: bool,
}

/// Installed file name: manifest id, or the repository name without `.git`.
pub fn artifact_name(
    manifest: &PluginManifest,
    repository: Option<&str>,
) -> Result<String, DynaplugError> {
    let id = manifest.id.trim();
    if !id.is_empty() {
        return Ok(id.to_string());
    }
    repository
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            DynaplugError::Validation("cannot derive artifact name: manifest has no id".into())
        })
}

#[derive(Debug)]
pub struct BuildOrchestrator {
    config: BuildConfig,
    host_root: PathBuf,
    plugin_dir: PathBuf,
    cache: Arc<BuildCache>,
    validator: ManifestValidator,
}

impl BuildOrchestrator {
    /// `host_root` defaults to the process working directory.
    pub fn new(
        config: BuildConfig,
        plugin_dir: impl Into<PathBuf>,
        cache: Arc<BuildCache>,
    ) -> Result<Self, DynaplugError> {
        let host_root = match &config.host_root {
            Some(root) => PathBuf::from(root),
            None => std::env::current_dir()
                .map_err(|e| DynaplugError::io("failed to resolve current directory", e))?,
        };
        Ok(Self {
            config,
            host_root,
            plugin_dir: plugin_dir.into(),
            cache,
            validator: ManifestValidator::new(),
        })
    }

    pub fn cache(&self) -> &Arc<BuildCache> {
        &self.cache
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    pub fn host_root(&self) -> &Path {
        &self.host_root
    }

    /// Reads the manifest from an acquired workspace and validates it.
    pub fn read_manifest(&self, workspace: &SourceWorkspace) -> Result<PluginManifest, DynaplugError> {
        let manifest = load_manifest(&workspace.root().join(&self.config.manifest_file))?;
        self.validator.validate_manifest(&manifest)?;
        Ok(manifest)
    }

    /// Builds and installs the plugin held in `workspace`.
    pub async fn build(&self, workspace: &SourceWorkspace) -> Result<BuiltPlugin, DynaplugError> {
        let manifest = self.read_manifest(workspace)?;
        let name = artifact_name(&manifest, workspace.repository.as_deref())?;
        let root = workspace.root().to_path_buf();

        let prepared = {
            let root = root.clone();
            let host_root = self.host_root.clone();
            let crates_dir = self.config.host_crates_dir.clone();
            let interface = self.config.interface_crate.clone();
            let primary = self.config.primary_source.clone();
            let id = manifest.id.clone();
            let version = manifest.version.clone();
            tokio::task::spawn_blocking(move || {
                let layout = HostLayout::discover(&host_root, &crates_dir, &interface)?;
                rewrite::prepare_workspace(&root, &layout, &id, &version, &primary)
            })
            .await
            .map_err(|e| DynaplugError::runtime(format!("workspace preparation task failed: {e}")))??
        };

        let key = cache_key(
            &manifest.id,
            &manifest.version,
            &root.join(&self.config.primary_source),
        )?;

        let (built, from_cache) = match self.cache.lookup(&key) {
            Some(cached) => {
                info!(plugin_id = %manifest.id, key = %key, "using cached build");
                (cached, true)
            }
            None => {
                self.run_cargo(&root, &manifest.id).await?;
                let output = root.join("target/release").join(&prepared.artifact_file);
                if !output.is_file() {
                    return Err(DynaplugError::Build {
                        message: format!(
                            "cargo succeeded but {} was not produced",
                            prepared.artifact_file
                        ),
                        output: String::new(),
                    });
                }
                if let Err(e) = self.cache.store(&key, &output) {
                    warn!(plugin_id = %manifest.id, error = %e, "failed to cache build");
                }
                (output, false)
            }
        };

        let (artifact, manifest_path) = self.install(
            &built,
            &root.join(&self.config.manifest_file),
            &name,
        )?;
        info!(
            plugin_id = %manifest.id,
            artifact = %artifact.display(),
            from_cache,
            "plugin built"
        );

        Ok(BuiltPlugin {
            name,
            manifest,
            artifact,
            manifest_path,
            from_cache,
        })
    }

    async fn run_cargo(&self, root: &Path, plugin_id: &str) -> Result<(), DynaplugError> {
        let mut cmd = tokio::process::Command::new(&self.config.cargo_program);
        cmd.args(["build", "--release", "--lib", "--manifest-path"])
            .arg(root.join("Cargo.toml"))
            .arg("--target-dir")
            .arg(root.join("target"))
            .args(&self.config.extra_args)
            .current_dir(root)
            .kill_on_drop(true);

        info!(plugin_id = %plugin_id, program = %self.config.cargo_program, "compiling plugin");
        let output = cmd.output().await.map_err(|e| {
            DynaplugError::io(format!("failed to run {}", self.config.cargo_program), e)
        })?;

        let combined = combined_output(&output.stdout, &output.stderr);
        if !output.status.success() {
            return Err(DynaplugError::Build {
                message: format!(
                    "{} exited with status {}",
                    self.config.cargo_program,
                    output.status.code().unwrap_or(-1)
                ),
                output: combined,
            });
        }
        debug!(plugin_id = %plugin_id, output_len = combined.len(), "cargo finished");
        Ok(())
    }

    /// Copies the artifact and manifest into the plugin directory.
    fn install(
        &self,
        artifact: &Path,
        manifest: &Path,
        name: &str,
    ) -> Result<(PathBuf, PathBuf), DynaplugError> {
        std::fs::create_dir_all(&self.plugin_dir).map_err(|e| {
            DynaplugError::io(format!("failed to create {}", self.plugin_dir.display()), e)
        })?;

        let artifact_dst = self.plugin_dir.join(format!("{name}.{NATIVE_EXTENSION}"));
        replace_file(artifact, &artifact_dst)?;

        let manifest_dst = self.plugin_dir.join(format!("{name}.toml"));
        replace_file(manifest, &manifest_dst)?;

        Ok((artifact_dst, manifest_dst))
    }
}

/// Copies `src` to a temporary file next to `dst`, then renames it over
/// `dst`. A library still mapped from the old file keeps its inode.
fn replace_file(src: &Path, dst: &Path) -> Result<(), DynaplugError> {
    let dir = dst.parent().unwrap_or_else(|| Path::new("."));
    let failed = |e: std::io::Error| DynaplugError::io(format!("failed to install {}", dst.display()), e);

    let mut staged = tempfile::NamedTempFile::new_in(dir).map_err(failed)?;
    let mut reader = std::fs::File::open(src).map_err(failed)?;
    std::io::copy(&mut reader, staged.as_file_mut()).map_err(failed)?;
    staged.as_file().sync_all().map_err(failed)?;
    staged.persist(dst).map_err(|e| failed(e.error))?;
    Ok(())
}
