//! Configuration type definitions.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source-side configuration (file scan and open policy).
    pub source: SourceConfig,

    /// Target database configuration (MySQL).
    pub target: TargetConfig,

    /// Run behavior configuration.
    #[serde(default)]
    pub run: RunConfig,
}

/// Source-side configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Root directory scanned recursively for `.mdb`/`.accdb` files.
    pub root_dir: PathBuf,

    /// Age in seconds below which a sibling lock artifact means the file is
    /// in live use and the open is refused outright.
    #[serde(default = "default_lock_age_secs")]
    pub lock_age_secs: u64,

    /// Exclusive-open attempts before a locked database is skipped.
    #[serde(default = "default_open_attempts")]
    pub open_attempts: u32,
}

impl SourceConfig {
    /// Lock-indicator age threshold as a `Duration`.
    pub fn lock_age(&self) -> Duration {
        Duration::from_secs(self.lock_age_secs)
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            // empty path fails validation; a root must come from the CLI or file
            root_dir: PathBuf::new(),
            lock_age_secs: default_lock_age_secs(),
            open_attempts: default_open_attempts(),
        }
    }
}

/// Target database (MySQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database host.
    #[serde(default = "default_host")]
    pub host: String,

    /// Database port (default: 3306).
    #[serde(default = "default_mysql_port")]
    pub port: u16,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_mysql_port(),
            user: default_user(),
            password: String::new(),
        }
    }
}

// Manual Debug so the password never reaches logs.
impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Run behavior configuration.
///
/// Every knob has a fixed default matched to what Jet-era drivers tolerate;
/// overriding them is rarely needed outside tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Rows per INSERT batch (one commit per batch).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Rows per export chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Rows sampled for type inference.
    #[serde(default = "default_sample_rows")]
    pub sample_rows: usize,

    /// Wall-clock budget for one source row count, in seconds.
    #[serde(default = "default_count_timeout_secs")]
    pub count_timeout_secs: u64,

    /// Largest estimate the bulk export path will attempt.
    #[serde(default = "default_bulk_row_limit")]
    pub bulk_row_limit: u64,

    /// Row ceiling for the capped-projection export strategy.
    #[serde(default = "default_capped_ceiling")]
    pub capped_ceiling: u64,

    /// Range width for the key-batched export strategy.
    #[serde(default = "default_range_width")]
    pub range_width: u64,

    /// Hard safety ceiling: exports are truncated beyond this many rows.
    #[serde(default = "default_safety_ceiling")]
    pub safety_ceiling: u64,

    /// Seconds between periodic progress displays.
    #[serde(default = "default_progress_interval_secs")]
    pub progress_interval_secs: u64,

    /// Directory for reports and the event log.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl RunConfig {
    /// Count budget as a `Duration`.
    pub fn count_timeout(&self) -> Duration {
        Duration::from_secs(self.count_timeout_secs)
    }

    /// Progress display interval as a `Duration`.
    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            chunk_size: default_chunk_size(),
            sample_rows: default_sample_rows(),
            count_timeout_secs: default_count_timeout_secs(),
            bulk_row_limit: default_bulk_row_limit(),
            capped_ceiling: default_capped_ceiling(),
            range_width: default_range_width(),
            safety_ceiling: default_safety_ceiling(),
            progress_interval_secs: default_progress_interval_secs(),
            log_dir: default_log_dir(),
        }
    }
}

// Default value functions for serde

fn default_host() -> String {
    "localhost".to_string()
}

fn default_mysql_port() -> u16 {
    3306
}

fn default_user() -> String {
    "root".to_string()
}

fn default_lock_age_secs() -> u64 {
    600
}

fn default_open_attempts() -> u32 {
    3
}

fn default_batch_size() -> usize {
    1_000
}

fn default_chunk_size() -> usize {
    1_000
}

fn default_sample_rows() -> usize {
    1_000
}

fn default_count_timeout_secs() -> u64 {
    5
}

fn default_bulk_row_limit() -> u64 {
    50_000
}

fn default_capped_ceiling() -> u64 {
    100_000
}

fn default_range_width() -> u64 {
    10_000
}

fn default_safety_ceiling() -> u64 {
    500_000
}

fn default_progress_interval_secs() -> u64 {
    15
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}
