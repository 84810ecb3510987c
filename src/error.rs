//! Custom error types for feedvault.
//!
//! Most not-found cases in this codebase are represented as `Option`/`bool`
//! results rather than errors; the variants here cover the failures that
//! should stop (or at least be reported by) the current operation.

use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for feedvault operations.
#[derive(Error, Debug)]
pub enum VaultError {
    /// A JSON sidecar could not be parsed into the expected shape.
    #[error("Failed to parse '{file}': {reason}")]
    ParseError { file: String, reason: String },

    /// A sidecar is missing a field the source type requires.
    #[error("Missing field '{field}' in {context}")]
    MissingField { field: String, context: String },

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    /// File read/write error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Path-specific IO error with context.
    #[error("Failed to {operation} '{path}': {source}")]
    PathError {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file parsing error.
    #[error("Invalid configuration in '{path}': {reason}")]
    ConfigError { path: PathBuf, reason: String },

    /// Supervised subprocess could not be spawned or monitored.
    #[error("Command failed: {reason}")]
    CommandError { reason: String },

    /// Wrapped anyhow error for seams that aggregate several failure kinds.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for feedvault operations.
pub type Result<T> = std::result::Result<T, VaultError>;

impl VaultError {
    /// Create a parse error.
    pub fn parse_error(file: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ParseError {
            file: file.into(),
            reason: reason.into(),
        }
    }

    /// Create a missing-field error.
    pub fn missing_field(field: impl Into<String>, context: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
            context: context.into(),
        }
    }

    /// Create a command error.
    pub fn command(reason: impl Into<String>) -> Self {
        Self::CommandError {
            reason: reason.into(),
        }
    }
}
