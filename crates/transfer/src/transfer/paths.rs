use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use crate::{AppError, AppResult};

/// First free variant of a file path: `name (N).ext` for N = 1, 2, ...
pub fn resolve_conflict_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path
        .file_stem()
        .map(|value| value.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let extension = path
        .extension()
        .map(|value| value.to_string_lossy().to_string());
    let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();

    (1u64..)
        .map(|index| match extension.as_deref() {
            Some(ext) => parent.join(format!("{stem} ({index}).{ext}")),
            None => parent.join(format!("{stem} ({index})")),
        })
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}

/// First free variant of a directory path: `name (N)` for N = 1, 2, ...
pub fn resolve_conflict_dir(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    (1u64..)
        .map(|index| {
            let mut name = OsString::from(path.as_os_str());
            name.push(format!(" ({index})"));
            PathBuf::from(name)
        })
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}

/// Splits a received name into safe relative components.
///
/// Backslashes count as separators; empty and `.` segments are dropped. Any
/// `..`, drive prefix or rooted name is rejected.
pub fn wire_components(name: &str) -> AppResult<Vec<String>> {
    let normalized = name.replace('\\', "/");
    let mut components = Vec::new();
    for segment in normalized.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(invalid_wire_path(name)),
            _ if segment.contains(':') => return Err(invalid_wire_path(name)),
            _ => components.push(segment.to_string()),
        }
    }
    if components.is_empty() {
        return Err(invalid_wire_path(name));
    }
    Ok(components)
}

/// Joins the components of a received name under `root`.
pub fn join_wire_path(root: &Path, name: &str) -> AppResult<PathBuf> {
    let mut path = root.to_path_buf();
    for component in wire_components(name)? {
        path.push(component);
    }
    Ok(path)
}

/// Forward-slash path of `path` relative to `root`, as sent on the wire.
pub fn relative_wire_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts = relative
        .components()
        .map(|component| match component {
            Component::Normal(value) => Some(value.to_string_lossy().to_string()),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

fn invalid_wire_path(name: &str) -> AppError {
    AppError::new("protocol_path_invalid", "received path escapes the destination")
        .with_context("name", name.to_string())
}

#[cfg(test)]
#[path = "../../tests/transfer/paths_tests.rs"]
mod tests;
