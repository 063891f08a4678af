//! Logging initialization
//!
//! Logs never go to stdout: with the stdio transport that is the protocol
//! channel. Output goes to stderr, optionally mirrored to rotated files.
//!
//! | Output Target | Guard Required |
//! |---------------|----------------|
//! | stderr        | No             |
//! | stderr + file | **Yes**        |
//!
//! The guard flushes buffered file logs when dropped; hold it until exit.

use std::io;
use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set
    pub level: String,
    /// Emit JSON lines instead of human-readable text
    pub structured: bool,
    /// Directory for daily-rotated log files
    pub directory: Option<PathBuf>,
    /// Log file name prefix
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            structured: false,
            directory: None,
            file_prefix: "bootmcp.log".to_string(),
        }
    }
}

/// Guard that ensures file logs are flushed on drop
#[derive(Debug)]
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
    _stderr_guard: WorkerGuard,
}

impl LoggingConfig {
    /// Install the global subscriber.
    ///
    /// Returns `Some(LoggingGuard)` when file logging is enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the log directory cannot be created or a global
    /// subscriber is already set.
    pub fn init(&self) -> io::Result<Option<LoggingGuard>> {
        let filter = self.filter();
        match &self.directory {
            None => {
                let subscriber = tracing_subscriber::registry().with(filter);
                let installed = if self.structured {
                    subscriber
                        .with(fmt::layer().json().with_writer(io::stderr))
                        .try_init()
                } else {
                    subscriber
                        .with(fmt::layer().with_writer(io::stderr))
                        .try_init()
                };
                installed.map_err(|e| io::Error::other(e.to_string()))?;
                Ok(None)
            }
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                let file_appender = tracing_appender::rolling::daily(dir, &self.file_prefix);
                let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
                let (stderr_writer, stderr_guard) = tracing_appender::non_blocking(io::stderr());
                let combined = file_writer.and(stderr_writer);

                let subscriber = tracing_subscriber::registry().with(filter);
                let installed = if self.structured {
                    subscriber
                        .with(fmt::layer().json().with_writer(combined))
                        .try_init()
                } else {
                    subscriber
                        .with(fmt::layer().with_ansi(false).with_writer(combined))
                        .try_init()
                };
                installed.map_err(|e| io::Error::other(e.to_string()))?;

                Ok(Some(LoggingGuard {
                    _file_guard: file_guard,
                    _stderr_guard: stderr_guard,
                }))
            }
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }
}
