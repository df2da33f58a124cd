// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fetching plugin source into an ephemeral workspace.
//!
//! Three kinds of source are understood: a git repository URL (cloned), a
//! `local:<dir>` source tree (copied), and a prebuilt artifact with its
//! manifest next to it (probed in place). Workspaces are [`TempDir`]s and
//! disappear when dropped, whatever the outcome of the build.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dynaplug_config::model::{AcquireConfig, BuildConfig};
use dynaplug_core::DynaplugError;
use tempfile::TempDir;
use tracing::{debug, info};

use crate::fsutil;
use crate::registry::PluginSource;
use crate::validator::NATIVE_EXTENSION;

/// Prefix marking a local source directory.
pub const LOCAL_DIR_PREFIX: &str = "local:";

/// A parsed plugin source string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Remote {
        url: String,
        reference: Option<String>,
    },
    Artifact {
        artifact: PathBuf,
        manifest: PathBuf,
    },
    Directory {
        path: PathBuf,
    },
}

impl SourceSpec {
    /// Classifies a source string.
    ///
    /// Repository URLs are recognised by host (`github.com`, `gitlab.com`),
    /// scheme (`https://`, `git@`), or a `.git` suffix. Paths ending in the
    /// native module extension are artifacts whose manifest is the same stem
    /// with `.toml`.
    pub fn parse(source: &str, reference: Option<&str>) -> Result<Self, DynaplugError> {
        let source = source.trim();
        let reference = reference
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);

        if let Some(dir) = source.strip_prefix(LOCAL_DIR_PREFIX) {
            if dir.trim().is_empty() {
                return Err(DynaplugError::Validation(
                    "local source requires a directory".into(),
                ));
            }
            return Ok(Self::Directory {
                path: PathBuf::from(dir.trim()),
            });
        }

        if source.starts_with('-') {
            return Err(DynaplugError::Validation(format!(
                "plugin source `{source}` must not start with `-`"
            )));
        }
        if reference.as_deref().is_some_and(|r| r.starts_with('-')) {
            return Err(DynaplugError::Validation(
                "git reference must not start with `-`".into(),
            ));
        }

        if source.contains("github.com")
            || source.contains("gitlab.com")
            || source.ends_with(".git")
            || source.starts_with("https://")
            || source.starts_with("git@")
        {
            return Ok(Self::Remote {
                url: source.to_string(),
                reference,
            });
        }

        let path = Path::new(source);
        if path.extension().and_then(|e| e.to_str()) == Some(NATIVE_EXTENSION) {
            return Ok(Self::Artifact {
                artifact: path.to_path_buf(),
                manifest: path.with_extension("toml"),
            });
        }

        Err(DynaplugError::Validation(format!(
            "unsupported plugin source `{source}`"
        )))
    }

    pub fn to_source(&self) -> PluginSource {
        match self {
            Self::Remote { url, reference } => PluginSource::Remote {
                url: url.clone(),
                reference: reference.clone(),
            },
            Self::Artifact { artifact, manifest } => PluginSource::Artifact {
                artifact: artifact.clone(),
                manifest: manifest.clone(),
            },
            Self::Directory { path } => PluginSource::Directory { path: path.clone() },
        }
    }
}

/// Repository name from a URL: the last path segment without `.git`.
pub fn repository_name(url: &str) -> Option<String> {
    let trimmed = url.trim().trim_end_matches('/');
    let last = trimmed.rsplit(['/', ':']).next()?;
    let name = last.strip_suffix(".git").unwrap_or(last);
    (!name.is_empty()).then(|| name.to_string())
}

/// An acquired source tree. Deleted on drop.
#[derive(Debug)]
pub struct SourceWorkspace {
    dir: TempDir,
    root: PathBuf,
    /// Repository name, when the source was a URL.
    pub repository: Option<String>,
}

impl SourceWorkspace {
    /// Root of the plugin source (its own `Cargo.toml` lives here).
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The temporary directory holding the workspace.
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

/// Fetches plugin source according to the configured limits.
#[derive(Debug, Clone)]
pub struct SourceAcquirer {
    config: AcquireConfig,
    allowed_repos: Vec<String>,
    manifest_file: String,
    primary_source: String,
}

impl SourceAcquirer {
    pub fn new(config: AcquireConfig, allowed_repos: Vec<String>, build: &BuildConfig) -> Self {
        Self {
            config,
            allowed_repos,
            manifest_file: build.manifest_file.clone(),
            primary_source: build.primary_source.clone(),
        }
    }

    /// Rejects URLs outside the allow-list. An empty list allows any.
    pub fn check_allowed(&self, url: &str) -> Result<(), DynaplugError> {
        if self.allowed_repos.is_empty()
            || self.allowed_repos.iter().any(|prefix| url.starts_with(prefix))
        {
            Ok(())
        } else {
            Err(DynaplugError::Security(format!(
                "repository {url} is not in the allowed list"
            )))
        }
    }

    /// Clones a repository into a fresh workspace.
    pub async fn clone_remote(
        &self,
        url: &str,
        reference: Option<&str>,
    ) -> Result<SourceWorkspace, DynaplugError> {
        self.check_allowed(url)?;

        let dir = new_workspace_dir()?;
        let root = dir.path().join("plugin");

        let mut cmd = tokio::process::Command::new(&self.config.git_program);
        cmd.arg("clone");
        if self.config.shallow_clone {
            cmd.args(["--depth", "1"]);
        }
        if let Some(reference) = reference {
            cmd.args(["--branch", reference]);
        }
        cmd.arg("--").arg(url).arg(&root).kill_on_drop(true);

        info!(url = %url, reference = ?reference, "cloning plugin repository");
        let timeout = Duration::from_secs(self.config.clone_timeout_secs);
        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| DynaplugError::Timeout { duration: timeout })?
            .map_err(|e| DynaplugError::io(format!("failed to run {}", self.config.git_program), e))?;

        if !output.status.success() {
            return Err(DynaplugError::Build {
                message: format!(
                    "git clone of {url} exited with status {}",
                    output.status.code().unwrap_or(-1)
                ),
                output: combined_output(&output.stdout, &output.stderr),
            });
        }

        let workspace = SourceWorkspace {
            dir,
            root,
            repository: repository_name(url),
        };
        self.check_tree(&workspace)?;
        Ok(workspace)
    }

    /// Copies a local source directory into a fresh workspace.
    pub async fn copy_directory(&self, path: &Path) -> Result<SourceWorkspace, DynaplugError> {
        if !path.is_dir() {
            return Err(DynaplugError::NotFound(format!(
                "plugin source directory {}",
                path.display()
            )));
        }

        let dir = new_workspace_dir()?;
        let root = dir.path().join("plugin");

        let src = path.to_path_buf();
        let dst = root.clone();
        let copied = tokio::task::spawn_blocking(move || fsutil::copy_tree(&src, &dst))
            .await
            .map_err(|e| DynaplugError::runtime(format!("source copy task failed: {e}")))??;
        debug!(path = %path.display(), bytes = copied, "copied plugin source");

        let workspace = SourceWorkspace {
            dir,
            root,
            repository: None,
        };
        self.check_tree(&workspace)?;
        Ok(workspace)
    }

    /// Size ceiling and required files.
    fn check_tree(&self, workspace: &SourceWorkspace) -> Result<(), DynaplugError> {
        let size = fsutil::tree_size(workspace.root())?;
        if size > self.config.max_source_bytes {
            return Err(DynaplugError::Security(format!(
                "plugin source is {size} bytes, exceeding the {} byte limit",
                self.config.max_source_bytes
            )));
        }

        for required in [&self.manifest_file, &self.primary_source] {
            if !workspace.root().join(required).is_file() {
                return Err(DynaplugError::NotFound(format!(
                    "required file {required} in plugin source"
                )));
            }
        }
        Ok(())
    }
}

fn new_workspace_dir() -> Result<TempDir, DynaplugError> {
    tempfile::Builder::new()
        .prefix("dynaplug-src-")
        .tempdir()
        .map_err(|e| DynaplugError::io("failed to create build workspace", e))
}

/// Confirms both files of a local artifact pair exist and are readable.
pub fn verify_local_pair(artifact: &Path, manifest: &Path) -> Result<(), DynaplugError> {
    for path in [artifact, manifest] {
        let mut file = std::fs::File::open(path)
            .map_err(|e| DynaplugError::io(format!("cannot open {}", path.display()), e))?;
        let mut probe = [0u8; 1];
        let _probed = file
            .read(&mut probe)
            .map_err(|e| DynaplugError::io(format!("cannot read {}", path.display()), e))?;
    }
    Ok(())
}

/// Stdout followed by stderr, lossily decoded.
pub(crate) fn combined_output(stdout: &[u8], stderr: &[u8]) -> String {
    let mut out = String::from_utf8_lossy(stdout).into_owned();
    let err = String::from_utf8_lossy(stderr);
    if !out.is_empty() && !err.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&err);
    out
}
