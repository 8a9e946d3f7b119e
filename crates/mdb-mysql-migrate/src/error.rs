//! Error types for the migration library.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for migration operations.
///
/// Failures are contained at the smallest enclosing unit. Row-level problems
/// stay inside the loader's retry loop, and `Export`/`SchemaInference`/`Load`
/// fail one table. `Locked` fails one database. Only `Config`, `Discovery`
/// and `DriverUnavailable` abort a run outright. Close-time
/// faults are warnings, not errors; they are logged and swallowed by the
/// connection guard.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source root directory could not be scanned
    #[error("Discovery failed under {}: {message}", root.display())]
    Discovery { root: PathBuf, message: String },

    /// No compatible legacy access layer on this host
    #[error("Legacy driver unavailable: {0}")]
    DriverUnavailable(String),

    /// Source file is held open elsewhere
    #[error("Source database locked: {} ({detail})", path.display())]
    Locked { path: PathBuf, detail: String },

    /// Driver-level failure while talking to a source file
    #[error("Source driver error: {0}")]
    Driver(String),

    /// Table unreadable after every export strategy
    #[error("Export failed for table {table}: {message}")]
    Export { table: String, message: String },

    /// No usable sample to infer a schema from
    #[error("Schema inference failed for table {table}: {message}")]
    SchemaInference { table: String, message: String },

    /// Load failed for a specific table after row-level retry
    #[error("Load failed for table {table}: {message}")]
    Load { table: String, message: String },

    /// Target database connection or query error
    #[error("Target database error: {0}")]
    Target(#[from] mysql_async::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Discovery error for a root directory
    pub fn discovery(root: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        MigrateError::Discovery {
            root: root.into(),
            message: message.into(),
        }
    }

    /// Create a Locked error for a source file
    pub fn locked(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        MigrateError::Locked {
            path: path.into(),
            detail: detail.into(),
        }
    }

    /// Create an Export error
    pub fn export(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Export {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a SchemaInference error
    pub fn inference(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::SchemaInference {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Load error
    pub fn load(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Load {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Whether this error fails the whole run rather than one unit.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MigrateError::Config(_)
                | MigrateError::Discovery { .. }
                | MigrateError::DriverUnavailable(_)
        )
    }

    /// Process exit code for errors that escape to the CLI.
    ///
    /// Run-level partial/total outcomes are computed from the final summary;
    /// this mapping only covers errors raised before (or instead of) a
    /// summary: fatal pre-run failures exit 2, cancellation exits 1.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Cancelled => 1,
            _ => 2,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        // Add error chain for wrapped errors
        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
