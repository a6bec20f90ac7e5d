use crate::{AppError, ResultExt};
use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, SystemTime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder as RollingBuilder, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const DEFAULT_KEEP_DAYS: u32 = 7;
const LOG_FILE_PREFIX: &str = "datadash";
const LOG_FILE_SUFFIX: &str = "log";
const LOG_LEVEL_ENV: &str = "DATADASH_LOG_LEVEL";

#[derive(Debug, Clone)]
pub struct LoggingGuard {
    log_dir: PathBuf,
    level: String,
}

impl LoggingGuard {
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn level(&self) -> &str {
        &self.level
    }
}

fn worker_guard_slot() -> &'static Mutex<Option<WorkerGuard>> {
    static SLOT: OnceLock<Mutex<Option<WorkerGuard>>> = OnceLock::new();
    SLOT.get_or_init(|| Mutex::new(None))
}

pub fn resolve_log_level() -> String {
    let env_level = std::env::var(LOG_LEVEL_ENV)
        .ok()
        .map(|value| value.trim().to_ascii_lowercase());
    if let Some(level) = env_level
        && matches!(
            level.as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        )
    {
        return level;
    }

    if cfg!(debug_assertions) {
        "debug".to_string()
    } else {
        "info".to_string()
    }
}

/// Installs the process-wide subscriber: daily JSON files under
/// `<data_dir>/logs` plus a compact console layer in debug builds.
///
/// Calling it again after a subscriber is installed only rotates the
/// retained file guard.
pub fn init_logging(data_dir: &Path) -> Result<LoggingGuard, AppError> {
    let log_dir = data_dir.join("logs");
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("create log directory: {}", log_dir.display()))
        .with_code("log_dir_create_failed", "failed to create log directory")
        .with_ctx("logDir", log_dir.display().to_string())?;
    cleanup_expired_logs(&log_dir, u64::from(DEFAULT_KEEP_DAYS))?;

    let level = resolve_log_level();
    if tracing::dispatcher::has_been_set() {
        return Ok(LoggingGuard { log_dir, level });
    }

    let file_appender = RollingBuilder::new()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix(LOG_FILE_SUFFIX)
        .build(&log_dir)
        .with_context(|| format!("create log appender: {}", log_dir.display()))
        .with_code("log_appender_create_failed", "failed to create log writer")
        .with_ctx("logDir", log_dir.display().to_string())?;
    let (file_writer, worker_guard) = tracing_appender::non_blocking(file_appender);

    if let Ok(mut slot) = worker_guard_slot().lock() {
        *slot = Some(worker_guard);
    }

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_ansi(false)
        .with_writer(file_writer)
        .with_current_span(false)
        .with_span_list(false);
    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::new(level.clone()))
        .with(file_layer);
    #[cfg(debug_assertions)]
    let subscriber = subscriber.with(
        tracing_subscriber::fmt::layer()
            .compact()
            .with_ansi(true)
            .with_target(true)
            .with_writer(std::io::stderr),
    );

    subscriber
        .try_init()
        .with_context(|| format!("install log subscriber: level={level}"))
        .with_code("log_subscriber_init_failed", "failed to install log subscriber")
        .with_ctx("logLevel", level.clone())?;

    tracing::info!(event = "logging_initialized", level = %level, log_dir = %log_dir.display());
    Ok(LoggingGuard { log_dir, level })
}

/// Flushes buffered file output. Call before process exit.
pub fn shutdown_logging() {
    if let Ok(mut slot) = worker_guard_slot().lock() {
        slot.take();
    }
}

pub fn cleanup_expired_logs(log_dir: &Path, keep_days: u64) -> Result<(), AppError> {
    let keep_duration = Duration::from_secs(keep_days.saturating_mul(24 * 60 * 60));
    let _ = cleanup_expired_logs_with_duration(log_dir, keep_duration, SystemTime::now())?;
    Ok(())
}

pub(crate) fn cleanup_expired_logs_with_duration(
    log_dir: &Path,
    keep_duration: Duration,
    now: SystemTime,
) -> Result<usize, AppError> {
    if !log_dir.exists() {
        return Ok(0);
    }

    let entries = fs::read_dir(log_dir)
        .with_context(|| format!("read log directory: {}", log_dir.display()))
        .with_code("log_cleanup_read_dir_failed", "failed to read log directory")
        .with_ctx("logDir", log_dir.display().to_string())?;

    let mut removed = 0usize;
    for entry in entries {
        let entry = entry
            .with_context(|| format!("read log entry: {}", log_dir.display()))
            .with_code("log_cleanup_read_entry_failed", "failed to read log entry")
            .with_ctx("logDir", log_dir.display().to_string())?;
        let path = entry.path();
        if !path.is_file() || !is_log_file(&path) {
            continue;
        }

        let modified_at = entry
            .metadata()
            .and_then(|metadata| metadata.modified())
            .with_context(|| format!("read log modified time: {}", path.display()))
            .with_code("log_cleanup_metadata_failed", "failed to read log metadata")
            .with_ctx("logPath", path.display().to_string())?;

        let expired = now
            .duration_since(modified_at)
            .is_ok_and(|age| age > keep_duration);
        if expired {
            fs::remove_file(&path)
                .with_context(|| format!("remove expired log: {}", path.display()))
                .with_code("log_cleanup_remove_failed", "failed to remove expired log")
                .with_ctx("logPath", path.display().to_string())?;
            removed += 1;
        }
    }

    Ok(removed)
}

fn is_log_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX) && name.ends_with(LOG_FILE_SUFFIX))
}

#[cfg(test)]
#[path = "../tests/logging/logging_tests.rs"]
mod tests;
