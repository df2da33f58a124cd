// SPDX-FileCopyrightText: 2026 Dynaplug Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Directory copy and size helpers shared by acquisition and build.

use std::path::Path;

use dynaplug_core::DynaplugError;
use walkdir::{DirEntry, WalkDir};

/// Directory names never copied out of a source tree.
pub const EXCLUDED_DIRS: &[&str] = &["target", ".git"];

fn is_excluded(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| EXCLUDED_DIRS.contains(&name))
}

fn walk_error(root: &Path, e: walkdir::Error) -> DynaplugError {
    let path = e
        .path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| root.display().to_string());
    DynaplugError::io(
        format!("failed to walk {path}"),
        e.into_io_error()
            .unwrap_or_else(|| std::io::Error::other("filesystem loop")),
    )
}

/// Recursively copies `src` into `dst`, skipping [`EXCLUDED_DIRS`].
/// Symlinks are not followed.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<u64, DynaplugError> {
    std::fs::create_dir_all(dst)
        .map_err(|e| DynaplugError::io(format!("failed to create {}", dst.display()), e))?;

    let mut copied = 0u64;
    let walker = WalkDir::new(src)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_excluded(e));
    for entry in walker {
        let entry = entry.map_err(|e| walk_error(src, e))?;
        let relative = match entry.path().strip_prefix(src) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel,
            _ => continue,
        };
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| {
                DynaplugError::io(format!("failed to create {}", target.display()), e)
            })?;
        } else if entry.file_type().is_file() {
            copied += std::fs::copy(entry.path(), &target).map_err(|e| {
                DynaplugError::io(
                    format!(
                        "failed to copy {} to {}",
                        entry.path().display(),
                        target.display()
                    ),
                    e,
                )
            })?;
        }
    }
    Ok(copied)
}

/// Total size of regular files under `root`, skipping [`EXCLUDED_DIRS`].
pub fn tree_size(root: &Path) -> Result<u64, DynaplugError> {
    let mut total = 0u64;
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_excluded(e));
    for entry in walker {
        let entry = entry.map_err(|e| walk_error(root, e))?;
        if entry.file_type().is_file() {
            let metadata = entry.metadata().map_err(|e| walk_error(root, e))?;
            total += metadata.len();
        }
    }
    Ok(total)
}

/// Every file under `root` with the given extension, skipping [`EXCLUDED_DIRS`].
pub fn files_with_extension(
    root: &Path,
    extension: &str,
) -> Result<Vec<std::path::PathBuf>, DynaplugError> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_excluded(e));
    for entry in walker {
        let entry = entry.map_err(|e| walk_error(root, e))?;
        if entry.file_type().is_file()
            && entry.path().extension().and_then(|e| e.to_str()) == Some(extension)
        {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}
