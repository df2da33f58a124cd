// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Namespace isolation for plugin builds.
//!
//! A plugin is compiled as its own cargo workspace. Every host library
//! crate except the interface crate is copied into `plughost/<dir>` under a
//! private package name (`plughost-<crate>`), and every Rust identifier that
//! named the host crate is rewritten to the alias (`plughost_<crate>`). The
//! interface crate is the one exception: it is referenced at the host's own
//! path so capability traits resolve to the very types the host uses.

use std::path::{Path, PathBuf};

use dynaplug_core::DynaplugError;
use regex::Regex;
use toml::{Table, Value};
use tracing::debug;

use crate::fsutil;

/// Prefix given to aliased host crates, both as package and identifier.
pub const ALIAS_PREFIX: &str = "plughost";

/// Package name every plugin is renamed to, followed by its id.
pub const PLUGIN_PACKAGE_PREFIX: &str = "dynaplug-plugin-";

const DEPENDENCY_TABLES: &[&str] = &["dependencies", "dev-dependencies", "build-dependencies"];

fn crate_ident(name: &str) -> String {
    name.replace('-', "_")
}

/// Private package name of an aliased host crate.
pub fn alias_package(name: &str) -> String {
    format!("{ALIAS_PREFIX}-{name}")
}

/// Private identifier of an aliased host crate.
pub fn alias_ident(name: &str) -> String {
    format!("{ALIAS_PREFIX}_{}", crate_ident(name))
}

fn read_table(path: &Path) -> Result<Table, DynaplugError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| DynaplugError::io(format!("failed to read {}", path.display()), e))?;
    raw.parse::<Table>().map_err(|e| {
        DynaplugError::Validation(format!("invalid cargo manifest {}: {e}", path.display()))
    })
}

fn write_table(path: &Path, table: &Table) -> Result<(), DynaplugError> {
    let raw = toml::to_string(table).map_err(|e| {
        DynaplugError::runtime(format!("failed to encode {}: {e}", path.display()))
    })?;
    std::fs::write(path, raw)
        .map_err(|e| DynaplugError::io(format!("failed to write {}", path.display()), e))
}

fn sub_table<'a>(table: &'a Table, path: &[&str]) -> Option<&'a Table> {
    let mut current = table;
    for key in path {
        current = current.get(*key)?.as_table()?;
    }
    Some(current)
}

/// A library crate in the host's crates directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCrate {
    pub name: String,
    pub dir: PathBuf,
}

impl HostCrate {
    fn dir_name(&self) -> String {
        self.dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.clone())
    }
}

/// What a plugin build needs to know about the host workspace.
#[derive(Debug, Clone)]
pub struct HostLayout {
    pub root: PathBuf,
    pub interface_crate: String,
    interface_dir: PathBuf,
    workspace_package: Table,
    workspace_dependencies: Table,
    profiles: Table,
    /// Host library crates that get aliased copies.
    pub crates: Vec<HostCrate>,
}

impl HostLayout {
    /// Reads the host workspace manifest and enumerates its library crates.
    pub fn discover(
        host_root: &Path,
        crates_dir: &str,
        interface_crate: &str,
    ) -> Result<Self, DynaplugError> {
        let manifest = read_table(&host_root.join("Cargo.toml"))?;
        let workspace_package = sub_table(&manifest, &["workspace", "package"])
            .cloned()
            .unwrap_or_default();
        let workspace_dependencies = sub_table(&manifest, &["workspace", "dependencies"])
            .cloned()
            .unwrap_or_default();
        let profiles = sub_table(&manifest, &["profile"]).cloned().unwrap_or_default();

        let crates_root = host_root.join(crates_dir);
        let entries = std::fs::read_dir(&crates_root).map_err(|e| {
            DynaplugError::io(format!("failed to list {}", crates_root.display()), e)
        })?;

        let mut interface_dir = None;
        let mut crates = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                DynaplugError::io(format!("failed to list {}", crates_root.display()), e)
            })?;
            let dir = entry.path();
            let cargo_toml = dir.join("Cargo.toml");
            if !cargo_toml.is_file() {
                continue;
            }
            let name = read_table(&cargo_toml)?
                .get("package")
                .and_then(|p| p.get("name"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| entry.file_name().to_string_lossy().into_owned());

            if name == interface_crate {
                interface_dir = Some(dir);
            } else if dir.join("src/lib.rs").is_file() {
                crates.push(HostCrate { name, dir });
            }
        }
        crates.sort_by(|a, b| a.name.cmp(&b.name));

        let interface_dir = interface_dir.ok_or_else(|| {
            DynaplugError::Config(format!(
                "interface crate `{interface_crate}` not found under {}",
                crates_root.display()
            ))
        })?;
        let interface_dir = std::fs::canonicalize(&interface_dir).unwrap_or(interface_dir);

        Ok(Self {
            root: host_root.to_path_buf(),
            interface_crate: interface_crate.to_string(),
            interface_dir,
            workspace_package,
            workspace_dependencies,
            profiles,
            crates,
        })
    }

    pub fn interface_dir(&self) -> &Path {
        &self.interface_dir
    }

    fn host_crate(&self, name: &str) -> Option<&HostCrate> {
        self.crates.iter().find(|c| c.name == name)
    }

    fn edition(&self) -> Option<&Value> {
        self.workspace_package.get("edition")
    }
}

/// Outcome of preparing a plugin workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedWorkspace {
    pub package_name: String,
    /// File name cargo produces for the cdylib, e.g. `libdynaplug_plugin_x.so`.
    pub artifact_file: String,
    /// Number of `.rs` files whose identifiers were rewritten.
    pub rewritten_files: usize,
}

/// Rewrites host crate identifiers to their private aliases.
#[derive(Debug)]
pub struct IdentRewriter {
    patterns: Vec<(Regex, String)>,
}

impl IdentRewriter {
    pub fn new(crates: &[HostCrate]) -> Result<Self, DynaplugError> {
        let patterns = crates
            .iter()
            .map(|c| {
                let pattern = format!(r"\b{}\b", regex::escape(&crate_ident(&c.name)));
                Regex::new(&pattern)
                    .map(|re| (re, alias_ident(&c.name)))
                    .map_err(|e| DynaplugError::runtime(format!("bad rewrite pattern: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Applies every alias to `source`. Returns `None` when nothing changed.
    pub fn rewrite(&self, source: &str) -> Option<String> {
        let mut out = source.to_string();
        let mut changed = false;
        for (re, alias) in &self.patterns {
            if re.is_match(&out) {
                out = re.replace_all(&out, alias.as_str()).into_owned();
                changed = true;
            }
        }
        changed.then_some(out)
    }

    /// Rewrites every `.rs` file under `root` in place.
    pub fn rewrite_tree(&self, root: &Path) -> Result<usize, DynaplugError> {
        let mut rewritten = 0;
        for file in fsutil::files_with_extension(root, "rs")? {
            let source = std::fs::read_to_string(&file)
                .map_err(|e| DynaplugError::io(format!("failed to read {}", file.display()), e))?;
            if let Some(updated) = self.rewrite(&source) {
                std::fs::write(&file, updated).map_err(|e| {
                    DynaplugError::io(format!("failed to write {}", file.display()), e)
                })?;
                rewritten += 1;
            }
        }
        Ok(rewritten)
    }
}

/// Points a dependency at the host interface crate or an aliased copy.
///
/// Returns `None` for dependencies that are neither.
fn redirect_dependency(
    key: &str,
    value: &Value,
    layout: &HostLayout,
    alias_root: &Path,
) -> Option<(String, Value)> {
    let package = value
        .get("package")
        .and_then(Value::as_str)
        .unwrap_or(key)
        .to_string();

    let mut spec = Table::new();
    if let Some(existing) = value.as_table() {
        for field in ["features", "optional", "default-features"] {
            if let Some(v) = existing.get(field) {
                spec.insert(field.to_string(), v.clone());
            }
        }
    }

    if package == layout.interface_crate {
        if key != package {
            spec.insert("package".into(), Value::String(package));
        }
        spec.insert(
            "path".into(),
            Value::String(layout.interface_dir.display().to_string()),
        );
        return Some((key.to_string(), Value::Table(spec)));
    }

    let host = layout.host_crate(&package)?;
    let path = alias_root.join(host.dir_name());
    spec.insert("path".into(), Value::String(path.display().to_string()));
    let new_key = if key == package {
        alias_package(&package)
    } else {
        spec.insert("package".into(), Value::String(alias_package(&package)));
        key.to_string()
    };
    Some((new_key, Value::Table(spec)))
}

/// Shared crates resolve through the host's `[workspace.dependencies]`.
fn inherit_workspace_dependency(key: &str, value: &Value, layout: &HostLayout) -> Option<Value> {
    if !layout.workspace_dependencies.contains_key(key) {
        return None;
    }
    let is_local = value
        .as_table()
        .is_some_and(|t| t.contains_key("path") || t.contains_key("git"));
    if is_local {
        return None;
    }

    let mut spec = Table::new();
    spec.insert("workspace".into(), Value::Boolean(true));
    if let Some(table) = value.as_table() {
        for field in ["features", "optional"] {
            if let Some(v) = table.get(field) {
                spec.insert(field.to_string(), v.clone());
            }
        }
    }
    Some(Value::Table(spec))
}

fn rewrite_dependency_tables(
    manifest: &mut Table,
    layout: &HostLayout,
    alias_root: &Path,
    inherit: bool,
) {
    for name in DEPENDENCY_TABLES {
        let Some(Value::Table(deps)) = manifest.get(*name) else {
            continue;
        };
        let mut updated = Table::new();
        for (key, value) in deps {
            if let Some((new_key, new_value)) = redirect_dependency(key, value, layout, alias_root)
            {
                updated.insert(new_key, new_value);
            } else if let Some(inherited) = inherit
                .then(|| inherit_workspace_dependency(key, value, layout))
                .flatten()
            {
                updated.insert(key.clone(), inherited);
            } else {
                updated.insert(key.clone(), value.clone());
            }
        }
        manifest.insert((*name).to_string(), Value::Table(updated));
    }
}

/// Cargo requires plain semver, so a leading `v` is dropped.
fn package_version(version: &str) -> String {
    version.strip_prefix('v').unwrap_or(version).to_string()
}

/// Turns an acquired source tree into a self-contained cargo workspace.
///
/// Runs every rewrite step in order: lock removal, aliased host copies,
/// the plugin's own manifest, then identifier rewriting.
pub fn prepare_workspace(
    root: &Path,
    layout: &HostLayout,
    plugin_id: &str,
    plugin_version: &str,
    primary_source: &str,
) -> Result<PreparedWorkspace, DynaplugError> {
    let lock = root.join("Cargo.lock");
    if lock.exists() {
        std::fs::remove_file(&lock)
            .map_err(|e| DynaplugError::io(format!("failed to remove {}", lock.display()), e))?;
        debug!("discarded shipped Cargo.lock");
    }

    let alias_root = root.join(ALIAS_PREFIX);
    for host in &layout.crates {
        let dst = alias_root.join(host.dir_name());
        fsutil::copy_tree(&host.dir, &dst)?;

        let cargo_toml = dst.join("Cargo.toml");
        let mut manifest = read_table(&cargo_toml)?;
        if let Some(Value::Table(package)) = manifest.get_mut("package") {
            package.insert("name".into(), Value::String(alias_package(&host.name)));
        }
        rewrite_dependency_tables(&mut manifest, layout, &alias_root, false);
        write_table(&cargo_toml, &manifest)?;
    }

    let package_name = format!("{PLUGIN_PACKAGE_PREFIX}{plugin_id}");
    let plugin_manifest_path = root.join("Cargo.toml");
    let mut manifest = if plugin_manifest_path.is_file() {
        read_table(&plugin_manifest_path)?
    } else {
        Table::new()
    };

    let edition = manifest
        .get("package")
        .and_then(|p| p.get("edition"))
        .or_else(|| layout.edition())
        .cloned()
        .unwrap_or_else(|| Value::String("2021".into()));

    let mut package = Table::new();
    package.insert("name".into(), Value::String(package_name.clone()));
    package.insert("version".into(), Value::String(package_version(plugin_version)));
    package.insert("edition".into(), edition);
    package.insert("publish".into(), Value::Boolean(false));
    manifest.insert("package".into(), Value::Table(package));

    let mut lib = Table::new();
    lib.insert("path".into(), Value::String(primary_source.to_string()));
    lib.insert(
        "crate-type".into(),
        Value::Array(vec![Value::String("cdylib".into())]),
    );
    manifest.insert("lib".into(), Value::Table(lib));
    manifest.remove("bin");

    rewrite_dependency_tables(&mut manifest, layout, &alias_root, true);
    let deps = manifest
        .entry("dependencies")
        .or_insert(Value::Table(Table::new()));
    if let Value::Table(deps) = deps {
        if !deps.contains_key(&layout.interface_crate) {
            let mut spec = Table::new();
            spec.insert(
                "path".into(),
                Value::String(layout.interface_dir.display().to_string()),
            );
            deps.insert(layout.interface_crate.clone(), Value::Table(spec));
        }
    }

    let mut workspace = Table::new();
    workspace.insert("resolver".into(), Value::String("2".into()));
    if !layout.workspace_package.is_empty() {
        workspace.insert(
            "package".into(),
            Value::Table(layout.workspace_package.clone()),
        );
    }
    if !layout.workspace_dependencies.is_empty() {
        workspace.insert(
            "dependencies".into(),
            Value::Table(layout.workspace_dependencies.clone()),
        );
    }
    manifest.insert("workspace".into(), Value::Table(workspace));
    if !layout.profiles.is_empty() {
        manifest.insert("profile".into(), Value::Table(layout.profiles.clone()));
    }
    write_table(&plugin_manifest_path, &manifest)?;

    let rewritten_files = IdentRewriter::new(&layout.crates)?.rewrite_tree(root)?;
    debug!(
        package = %package_name,
        aliases = layout.crates.len(),
        rewritten_files,
        "prepared plugin workspace"
    );

    Ok(PreparedWorkspace {
        artifact_file: format!(
            "{}{}.{}",
            std::env::consts::DLL_PREFIX,
            crate_ident(&package_name),
            std::env::consts::DLL_EXTENSION
        ),
        package_name,
        rewritten_files,
    })
}
