//! Logging setup for feedvault.
//!
//! Uses the `tracing` ecosystem. The service writes human-readable lines to
//! stderr and optionally appends to a log file, since the download worker
//! and cache builder run for days and their output is the primary audit
//! trail of what was fetched and flagged.

use std::fs::OpenOptions;
use std::path::Path;

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display.
    pub level: Level,
    /// Include target (module path) in log output.
    pub target: bool,
    /// Append logs to this file in addition to stderr.
    pub file: Option<std::path::PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            target: false,
            file: None,
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// Respects `RUST_LOG` when set; falls back to the configured level.
/// Returns an error if the log file cannot be opened for appending.
pub fn init_logging(config: &LogConfig) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(config.target);

    match &config.file {
        Some(path) => {
            let file = std::sync::Arc::new(open_log_file(path)?);
            let file_layer = fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .with_target(config.target);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
        }
    }
    Ok(())
}

fn open_log_file(path: &Path) -> std::io::Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_parent_dirs_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/nested/fv.log");
        let file = open_log_file(&path);
        assert!(file.is_ok());
        assert!(path.exists());
    }
}
