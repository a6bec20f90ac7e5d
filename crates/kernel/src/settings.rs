use crate::runtime::{lock_mutex, read_lock, write_lock};
use crate::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

const SETTINGS_DIR_NAME: &str = ".datadash";
const SETTINGS_FILE_NAME: &str = "settings.json";
const FALLBACK_DEVICE_NAME: &str = "datadash";

/// Read-mostly configuration shared by the transfer workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransferSettings {
    pub device_name: String,
    pub save_directory: PathBuf,
    pub encryption_enabled: bool,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            save_directory: home_dir()
                .map(|home| home.join("Downloads"))
                .unwrap_or_else(env::temp_dir),
            encryption_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSettingsPatch {
    pub device_name: Option<String>,
    pub save_directory: Option<PathBuf>,
    pub encryption_enabled: Option<bool>,
}

/// Guarded settings with a single writer path.
///
/// Readers always get a snapshot; a running transfer never observes a
/// half-applied update.
#[derive(Debug)]
pub struct SettingsStore {
    current: RwLock<TransferSettings>,
    file_path: Option<PathBuf>,
    write_guard: Mutex<()>,
}

impl SettingsStore {
    pub fn new(settings: TransferSettings) -> Self {
        Self {
            current: RwLock::new(settings),
            file_path: None,
            write_guard: Mutex::new(()),
        }
    }

    /// Loads settings from `path`, falling back to defaults when the file is
    /// missing or unreadable as JSON. Updates are written back to `path`.
    pub fn load(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        let settings = read_settings_file(&path)?;
        Ok(Self {
            current: RwLock::new(settings),
            file_path: Some(path),
            write_guard: Mutex::new(()),
        })
    }

    pub fn default_path() -> AppResult<PathBuf> {
        let home = home_dir().ok_or_else(|| {
            AppError::new(
                "filesystem_home_dir_unavailable",
                "unable to locate the user home directory",
            )
        })?;
        Ok(home.join(SETTINGS_DIR_NAME).join(SETTINGS_FILE_NAME))
    }

    pub fn get(&self) -> TransferSettings {
        read_lock(&self.current, "transfer_settings").clone()
    }

    pub fn update(&self, patch: TransferSettingsPatch) -> AppResult<TransferSettings> {
        let _writer = lock_mutex(&self.write_guard, "transfer_settings_writer");
        let mut next = self.get();

        if let Some(device_name) = patch.device_name {
            let device_name = device_name.trim();
            if device_name.is_empty() {
                return Err(AppError::new(
                    "filesystem_settings_invalid",
                    "device name must not be empty",
                ));
            }
            next.device_name = device_name.to_string();
        }
        if let Some(save_directory) = patch.save_directory {
            if save_directory.as_os_str().is_empty() {
                return Err(AppError::new(
                    "filesystem_settings_invalid",
                    "save directory must not be empty",
                ));
            }
            next.save_directory = save_directory;
        }
        if let Some(encryption_enabled) = patch.encryption_enabled {
            next.encryption_enabled = encryption_enabled;
        }

        if let Some(path) = self.file_path.as_deref() {
            write_settings_file(path, &next)?;
        }
        *write_lock(&self.current, "transfer_settings") = next.clone();
        tracing::info!(
            event = "settings_updated",
            device_name = %next.device_name,
            save_directory = %next.save_directory.display(),
            encryption_enabled = next.encryption_enabled
        );
        Ok(next)
    }
}

fn default_device_name() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .into_iter()
        .filter_map(|key| env::var(key).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| FALLBACK_DEVICE_NAME.to_string())
}

fn home_dir() -> Option<PathBuf> {
    let key = if cfg!(target_os = "windows") {
        "USERPROFILE"
    } else {
        "HOME"
    };
    env::var_os(key)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn read_settings_file(path: &Path) -> AppResult<TransferSettings> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return Ok(TransferSettings::default());
        }
        Err(error) => {
            return Err(
                AppError::new("filesystem_settings_read_failed", "failed to read settings")
                    .with_source(error)
                    .with_context("path", path.display().to_string()),
            );
        }
    };

    match serde_json::from_str::<TransferSettings>(&content) {
        Ok(settings) => Ok(settings),
        Err(error) => {
            tracing::warn!(
                event = "settings_parse_failed",
                detail = %error,
                path = %path.display()
            );
            Ok(TransferSettings::default())
        }
    }
}

fn write_settings_file(path: &Path, settings: &TransferSettings) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|error| {
            AppError::new(
                "filesystem_settings_dir_create_failed",
                "failed to create settings directory",
            )
            .with_source(error)
            .with_context("path", parent.display().to_string())
        })?;
    }

    let serialized = serde_json::to_string_pretty(settings).map_err(|error| {
        AppError::new("settings_serialize_failed", "failed to serialize settings").with_source(error)
    })?;

    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, serialized).map_err(|error| {
        AppError::new("filesystem_settings_write_failed", "failed to write settings")
            .with_source(error)
            .with_context("path", temp_path.display().to_string())
    })?;
    fs::rename(&temp_path, path).map_err(|error| {
        let _ = fs::remove_file(&temp_path);
        AppError::new("filesystem_settings_write_failed", "failed to replace settings")
            .with_source(error)
            .with_context("path", path.display().to_string())
    })
}

#[cfg(test)]
#[path = "../tests/settings/settings_tests.rs"]
mod tests;
