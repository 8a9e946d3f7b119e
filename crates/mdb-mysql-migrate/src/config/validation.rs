//! Configuration validation.

use super::Config;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.root_dir.as_os_str().is_empty() {
        return Err(MigrateError::Config("source.root_dir is required".into()));
    }
    if config.source.open_attempts == 0 {
        return Err(MigrateError::Config(
            "source.open_attempts must be at least 1".into(),
        ));
    }

    // Target validation
    if config.target.host.is_empty() {
        return Err(MigrateError::Config("target.host is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(MigrateError::Config("target.user is required".into()));
    }
    if config.target.port == 0 {
        return Err(MigrateError::Config("target.port must be non-zero".into()));
    }

    // Run validation
    if config.run.batch_size == 0 {
        return Err(MigrateError::Config(
            "run.batch_size must be at least 1".into(),
        ));
    }
    if config.run.chunk_size == 0 {
        return Err(MigrateError::Config(
            "run.chunk_size must be at least 1".into(),
        ));
    }
    if config.run.sample_rows == 0 {
        return Err(MigrateError::Config(
            "run.sample_rows must be at least 1".into(),
        ));
    }
    if config.run.range_width == 0 {
        return Err(MigrateError::Config(
            "run.range_width must be at least 1".into(),
        ));
    }
    if config.run.safety_ceiling < config.run.chunk_size as u64 {
        return Err(MigrateError::Config(format!(
            "run.safety_ceiling ({}) must be at least run.chunk_size ({})",
            config.run.safety_ceiling, config.run.chunk_size
        )));
    }
    if config.run.progress_interval_secs == 0 {
        return Err(MigrateError::Config(
            "run.progress_interval_secs must be at least 1".into(),
        ));
    }
    if config.run.log_dir.as_os_str().is_empty() {
        return Err(MigrateError::Config("run.log_dir is required".into()));
    }

    Ok(())
}
