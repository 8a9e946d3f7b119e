//! Guarded open/close around a source session.
//!
//! Desktop database files are routinely held open by whoever forgot to close
//! the application that owns them, and the driver reports that as an open
//! failure whose text mentions the lock. The guard layers three defenses on
//! top of a bare [`SourceDriver::open`]:
//!
//! 1. a sibling lock-file check before the first attempt, so a file that is
//!    visibly in use fails fast without touching the driver,
//! 2. retries with growing backoff when the failure text looks lock-related,
//!    including one driver restart before the final attempt,
//! 3. a close that never propagates faults, so cleanup cannot mask the error
//!    that actually mattered.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use crate::config::SourceConfig;
use crate::error::{MigrateError, Result};

use super::{SourceDriver, SourceSession};

/// Lock-file extensions written next to an open database file.
const LOCK_EXTENSIONS: &[&str] = &["ldb", "laccdb"];

/// Failure-text fragments that mark an open error as lock-related.
const LOCK_MARKERS: &[&str] = &["already", "open", "lock"];

/// Lifecycle of a guarded session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Closed,
    Opening,
    Open,
    Closing,
    Failed,
}

impl std::fmt::Display for GuardState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GuardState::Closed => "closed",
            GuardState::Opening => "opening",
            GuardState::Open => "open",
            GuardState::Closing => "closing",
            GuardState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Retry policy for guarded opens. Delays are injectable so tests run
/// without sleeping.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub max_attempts: u32,
    /// A sibling lock file modified more recently than this blocks the open
    /// outright.
    pub lock_age: Duration,
    pub retry_base: Duration,
    pub retry_step: Duration,
    pub restart_base: Duration,
    pub restart_step: Duration,
}

impl GuardConfig {
    pub fn from_source(config: &SourceConfig) -> Self {
        Self {
            max_attempts: config.open_attempts,
            lock_age: config.lock_age(),
            ..Self::default()
        }
    }

    fn retry_delay(&self, failed_attempt: u32) -> Duration {
        self.retry_base + self.retry_step * failed_attempt
    }

    fn restart_delay(&self, failed_attempt: u32) -> Duration {
        self.restart_base + self.restart_step * failed_attempt
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            lock_age: Duration::from_secs(600),
            retry_base: Duration::from_secs(2),
            retry_step: Duration::from_secs(1),
            restart_base: Duration::from_secs(5),
            restart_step: Duration::from_secs(3),
        }
    }
}

/// Opens sessions with lock handling and closes them without letting
/// cleanup faults escape.
pub struct ConnectionGuard {
    driver: Arc<dyn SourceDriver>,
    config: GuardConfig,
    state: GuardState,
    session: Option<Box<dyn SourceSession>>,
}

impl ConnectionGuard {
    pub fn new(driver: Arc<dyn SourceDriver>, config: GuardConfig) -> Self {
        Self {
            driver,
            config,
            state: GuardState::Closed,
            session: None,
        }
    }

    pub fn state(&self) -> GuardState {
        self.state
    }

    /// The open session, if there is one.
    pub fn session(&mut self) -> Result<&mut dyn SourceSession> {
        self.current()
    }

    /// Open `path`, retrying lock-related failures per the configured
    /// policy. A fresh sibling lock file fails immediately without touching
    /// the driver.
    pub async fn open(&mut self, path: &Path) -> Result<&mut dyn SourceSession> {
        self.safe_close().await;

        if let Some(lock) = lock_indicator(path, self.config.lock_age) {
            self.state = GuardState::Failed;
            return Err(MigrateError::locked(
                path,
                format!("fresh lock file {}", lock.display()),
            ));
        }

        self.state = GuardState::Opening;
        let mut last: Option<MigrateError> = None;

        for attempt in 0..self.config.max_attempts {
            if attempt > 0 {
                let failed = attempt - 1;
                if attempt + 1 == self.config.max_attempts {
                    warn!(
                        path = %path.display(),
                        attempt,
                        "restarting driver before final open attempt"
                    );
                    if let Err(e) = self.driver.restart().await {
                        warn!(error = %e, "driver restart failed; attempting open anyway");
                    }
                    tokio::time::sleep(self.config.restart_delay(failed)).await;
                } else {
                    tokio::time::sleep(self.config.retry_delay(failed)).await;
                }
            }

            match self.driver.open(path).await {
                Ok(session) => {
                    self.session = Some(session);
                    self.state = GuardState::Open;
                    debug!(path = %path.display(), attempt, "source opened");
                    return self.current();
                }
                Err(e @ MigrateError::DriverUnavailable(_)) => {
                    self.state = GuardState::Failed;
                    return Err(e);
                }
                Err(e) if is_lock_error(&e) => {
                    warn!(
                        path = %path.display(),
                        attempt,
                        error = %e,
                        "open failed with lock indication; will retry"
                    );
                    last = Some(e);
                }
                Err(e) => {
                    self.state = GuardState::Failed;
                    return Err(e);
                }
            }
        }

        self.state = GuardState::Failed;
        let detail = match last {
            Some(e) => e.to_string(),
            None => "open retries exhausted".to_string(),
        };
        Err(MigrateError::locked(path, detail))
    }

    /// Close the current session, if any. Faults are demoted to warnings;
    /// the guard always ends up `Closed`.
    pub async fn safe_close(&mut self) {
        if let Some(mut session) = self.session.take() {
            self.state = GuardState::Closing;
            if let Err(e) = session.close().await {
                warn!(
                    path = %session.path().display(),
                    error = %e,
                    "error while closing source; continuing"
                );
            }
        }
        self.state = GuardState::Closed;
    }

    fn current(&mut self) -> Result<&mut dyn SourceSession> {
        match self.session.as_deref_mut() {
            Some(session) => Ok(session),
            None => Err(MigrateError::Driver("no open session".to_string())),
        }
    }
}

/// Return the sibling lock file if one exists and was modified within
/// `max_age`.
pub fn lock_indicator(path: &Path, max_age: Duration) -> Option<PathBuf> {
    for ext in LOCK_EXTENSIONS {
        let candidate = path.with_extension(ext);
        let Ok(metadata) = std::fs::metadata(&candidate) else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default();
        if age < max_age {
            return Some(candidate);
        }
    }
    None
}

fn is_lock_error(error: &MigrateError) -> bool {
    let text = error.to_string().to_lowercase();
    LOCK_MARKERS.iter().any(|marker| text.contains(marker))
}
