//! Shared logging utilities for the SUNAT ingestion binaries.
//!
//! Two layers are installed: a daily-rolling file writer (no ANSI) and stderr.
//! `RUST_LOG` always wins over the configured level.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LEVEL: &str = "info";
const MAX_LOG_FILES: usize = 5;
const LOGGED_CRATES: &[&str] = &["sunat", "sunat_ingest"];

/// Logging configuration shared by the binaries.
pub struct LogConfig<'a> {
    /// Base name of the log file (`<app_name>.log.<date>`).
    pub app_name: &'a str,
    /// Level applied to our crates when `RUST_LOG` is unset (e.g. "info").
    pub level: Option<&'a str>,
    /// Directory for log files. Defaults to `<home>/logs`.
    pub log_dir: Option<&'a Path>,
    /// Raise console output to debug.
    pub verbose: bool,
}

/// Initialize tracing with a rolling file writer and stderr output.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// whole process.
pub fn init_logging(config: LogConfig<'_>) -> Result<WorkerGuard> {
    let log_dir = match config.log_dir {
        Some(dir) => dir.to_path_buf(),
        None => logs_dir(),
    };
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create logs directory: {}", log_dir.display()))?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(format!("{}.log", sanitize_name(config.app_name)))
        .max_log_files(MAX_LOG_FILES)
        .build(&log_dir)
        .with_context(|| format!("Failed to open log file in {}", log_dir.display()))?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let level = config.level.unwrap_or(DEFAULT_LEVEL);
    let configured = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directive(level)))
    };
    let file_filter = configured();
    let console_filter = if config.verbose {
        EnvFilter::new(filter_directive("debug"))
    } else {
        configured()
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

/// Build an `EnvFilter` directive enabling `level` for every crate we own.
pub fn filter_directive(level: &str) -> String {
    LOGGED_CRATES
        .iter()
        .map(|krate| format!("{}={}", krate, level))
        .collect::<Vec<_>>()
        .join(",")
}

/// Get the application home directory: `$SUNAT_HOME` or `~/.sunat_etl`.
pub fn sunat_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("SUNAT_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .map(|home| home.join(".sunat_etl"))
        .unwrap_or_else(|| PathBuf::from(".sunat_etl"))
}

/// Get the logs directory: `<home>/logs`
pub fn logs_dir() -> PathBuf {
    sunat_home().join("logs")
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect()
}
