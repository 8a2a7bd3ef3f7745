use std::fmt::Display;
use std::fs::{DirBuilder, File, OpenOptions};
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;
use std::sync::Mutex;

use thiserror::Error;
use tracing::level_filters::LevelFilter;

/// Path of the optional log file, appended to when set
pub const LOG_FILE_VARIABLE: &str = "SOPHON_LOG";

/// Minimal severity to emit: `debug`, `info`, `warn`/`warning`, `error`, `fatal`
pub const LOG_LEVEL_VARIABLE: &str = "SOPHON_LOG_LEVEL";

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Failed to open log file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to install the global subscriber: {0}")]
    SetGlobalDefault(#[from] tracing::subscriber::SetGlobalDefaultError)
}

/// Map a `SOPHON_LOG_LEVEL` value to a level filter.
///
/// `fatal` has no direct tracing equivalent and maps to the error level.
pub fn parse_level(value: &str) -> Option<LevelFilter> {
    match value.to_ascii_lowercase().as_str() {
        "debug" => Some(LevelFilter::DEBUG),
        "info" => Some(LevelFilter::INFO),
        "warn" | "warning" => Some(LevelFilter::WARN),
        "error" | "fatal" => Some(LevelFilter::ERROR),
        _ => None
    }
}

fn open_log_file(path: impl AsRef<Path>) -> std::io::Result<File> {
    if let Some(parent) = path.as_ref().parent() {
        if !parent.exists() {
            DirBuilder::new()
                .recursive(true)
                .mode(0o755)
                .create(parent)?;
        }
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
}

/// Install the global subscriber honouring `SOPHON_LOG` and `SOPHON_LOG_LEVEL`.
pub fn init() -> Result<(), LoggingError> {
    let level = std::env::var(LOG_LEVEL_VARIABLE)
        .ok()
        .as_deref()
        .and_then(parse_level)
        .unwrap_or(LevelFilter::INFO);

    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false);

    match std::env::var(LOG_FILE_VARIABLE) {
        Ok(path) if !path.is_empty() => {
            let file = open_log_file(path)?;

            let subscriber = builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .finish();

            tracing::subscriber::set_global_default(subscriber)?;
        }

        _ => {
            let subscriber = builder.finish();

            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    Ok(())
}

/// Report an unrecoverable pipeline condition and terminate with status 1.
///
/// Detached pipeline stages have no caller to propagate into, so move-time
/// disk failures and broken invariants end the process here.
pub fn fatal(message: impl Display) -> ! {
    tracing::error!("[FATAL] {message}");

    std::process::exit(1);
}
