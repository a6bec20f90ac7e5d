use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::paths::relative_wire_path;
use super::wire::MetadataDocument;
use crate::models::TransferEntry;
use crate::{AppError, AppResult};

/// One file to stream: where it lives and the name it travels under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFile {
    pub source: PathBuf,
    pub wire_path: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    pub metadata: MetadataDocument,
    pub files: Vec<PlannedFile>,
    pub total_bytes: u64,
}

impl TransferPlan {
    pub fn files_total(&self) -> u64 {
        self.files.len() as u64
    }

    pub fn is_folder(&self) -> bool {
        self.metadata.base_folder_name.is_some()
    }
}

/// Builds the metadata document and streaming order for a selection.
///
/// A selection is either exactly one directory or any number of regular
/// files.
pub fn plan_selection(paths: &[PathBuf]) -> AppResult<TransferPlan> {
    if paths.is_empty() {
        return Err(AppError::new(
            "filesystem_selection_invalid",
            "nothing selected to send",
        ));
    }

    if let [single] = paths
        && single.is_dir()
    {
        return plan_folder(single);
    }

    if let Some(directory) = paths.iter().find(|path| path.is_dir()) {
        return Err(AppError::new(
            "filesystem_selection_invalid",
            "a folder must be sent on its own",
        )
        .with_context("path", directory.display().to_string()));
    }
    plan_files(paths)
}

fn plan_folder(root: &Path) -> AppResult<TransferPlan> {
    let base_folder_name = root
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            AppError::new("filesystem_selection_invalid", "folder has no name")
                .with_context("path", root.display().to_string())
        })?;

    let mut entries = Vec::new();
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .follow_links(false);
    for entry in walker {
        let entry = entry.map_err(|error| {
            AppError::new("filesystem_walk_failed", "failed to walk selected folder")
                .with_context("path", root.display().to_string())
                .with_cause(error.to_string())
        })?;
        let Some(wire_path) = relative_wire_path(root, entry.path()) else {
            continue;
        };

        let file_type = entry.file_type();
        if file_type.is_dir() {
            entries.push(TransferEntry::directory(wire_path));
        } else if file_type.is_file() {
            let size = file_size(entry.path())?;
            entries.push(TransferEntry::file(wire_path.clone(), size));
            files.push(PlannedFile {
                source: entry.path().to_path_buf(),
                wire_path,
                size,
            });
        } else {
            tracing::warn!(
                event = "transfer_selection_entry_skipped",
                path = %entry.path().display()
            );
        }
    }

    let total_bytes = files.iter().map(|file| file.size).sum();
    Ok(TransferPlan {
        metadata: MetadataDocument {
            entries,
            base_folder_name: Some(base_folder_name),
        },
        files,
        total_bytes,
    })
}

fn plan_files(paths: &[PathBuf]) -> AppResult<TransferPlan> {
    let mut entries = Vec::with_capacity(paths.len());
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        if !path.is_file() {
            return Err(AppError::new(
                "filesystem_selection_invalid",
                "selected path is not a readable file",
            )
            .with_context("path", path.display().to_string()));
        }
        let wire_path = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| {
                AppError::new("filesystem_selection_invalid", "file has no name")
                    .with_context("path", path.display().to_string())
            })?;
        let size = file_size(path)?;
        entries.push(TransferEntry::file(wire_path.clone(), size));
        files.push(PlannedFile {
            source: path.clone(),
            wire_path,
            size,
        });
    }

    let total_bytes = files.iter().map(|file| file.size).sum();
    Ok(TransferPlan {
        metadata: MetadataDocument {
            entries,
            base_folder_name: None,
        },
        files,
        total_bytes,
    })
}

fn file_size(path: &Path) -> AppResult<u64> {
    fs::metadata(path)
        .map(|metadata| metadata.len())
        .map_err(|error| {
            AppError::new("filesystem_read_failed", "failed to stat selected file")
                .with_source(error)
                .with_context("path", path.display().to_string())
        })
}

#[cfg(test)]
#[path = "../../tests/transfer/selection_tests.rs"]
mod tests;
