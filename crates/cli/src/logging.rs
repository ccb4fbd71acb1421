//! Tracing setup: stdout always, plus a per-session log file for runs.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to prepare log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to create log file at {path}: {source}")]
    CreateLogFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to install global tracing subscriber: {0}")]
    SetGlobal(#[from] tracing::subscriber::SetGlobalDefaultError),
}

pub fn log_file_name(session: &str) -> String {
    format!("processing_{session}.log")
}

/// Creates `logs_dir` and an empty log file for the session, returning its path.
pub fn prepare_log_file(logs_dir: &Path, session: &str) -> Result<PathBuf, LoggingError> {
    fs::create_dir_all(logs_dir).map_err(|source| LoggingError::CreateDir {
        path: logs_dir.to_path_buf(),
        source,
    })?;
    let path = logs_dir.join(log_file_name(session));
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|source| LoggingError::CreateLogFile {
            path: path.clone(),
            source,
        })?;
    Ok(path)
}

/// Where console log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleTarget {
    Stdout,
    Stderr,
}

impl ConsoleTarget {
    /// JSON output owns stdout, so logs move to stderr.
    pub fn for_output(json: bool) -> Self {
        if json {
            ConsoleTarget::Stderr
        } else {
            ConsoleTarget::Stdout
        }
    }

    fn make_writer(self) -> BoxMakeWriter {
        match self {
            ConsoleTarget::Stdout => BoxMakeWriter::new(std::io::stdout),
            ConsoleTarget::Stderr => BoxMakeWriter::new(std::io::stderr),
        }
    }
}

fn build_env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Logs to the console and `logs_dir/processing_{session}.log`.
///
/// The returned guard flushes the file writer when dropped, so the caller keeps
/// it for the whole run.
pub fn init_run(
    logs_dir: &Path,
    session: &str,
    level: &str,
    console: ConsoleTarget,
) -> Result<WorkerGuard, LoggingError> {
    let log_path = prepare_log_file(logs_dir, session)?;
    let file_appender = rolling::never(logs_dir, log_file_name(session));
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let console_layer = fmt::layer().with_writer(console.make_writer());
    let file_layer = fmt::layer().with_ansi(false).with_writer(file_writer);
    let subscriber = Registry::default()
        .with(build_env_filter(level))
        .with(console_layer)
        .with(file_layer);
    tracing::subscriber::set_global_default(subscriber)?;

    tracing::info!("logging to {}", log_path.display());
    Ok(guard)
}

/// Stderr only, so the inspection commands keep stdout for their listing.
pub fn init_console(level: &str) -> Result<(), LoggingError> {
    let subscriber = Registry::default()
        .with(build_env_filter(level))
        .with(fmt::layer().with_writer(ConsoleTarget::Stderr.make_writer()));
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
