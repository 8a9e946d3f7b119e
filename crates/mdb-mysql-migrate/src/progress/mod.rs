//! Run-wide progress tracking, the periodic display task and the event log.
//!
//! One tracker instance is shared across the run. All counters live behind a
//! single mutex; critical sections only touch in-memory state, never I/O,
//! except the event log append, which is a short buffered write. The event
//! log is append-only and timestamped so an operator can reconstruct a run
//! that died without its report.

pub mod report;

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Result;

/// File appended to under the log directory, one line per event.
pub const EVENT_LOG_NAME: &str = "migration_events.log";

/// How long the display task gets to finish after cancellation.
const DISPLAY_STOP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableState {
    Pending,
    Migrating,
    Completed,
    Failed,
    Skipped,
}

impl TableState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TableState::Completed | TableState::Failed | TableState::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TableState::Pending => "pending",
            TableState::Migrating => "migrating",
            TableState::Completed => "completed",
            TableState::Failed => "failed",
            TableState::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseState {
    Pending,
    Running,
    Completed,
    Failed,
    /// Skipped because the file was held by another process.
    Locked,
}

impl DatabaseState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DatabaseState::Completed | DatabaseState::Failed | DatabaseState::Locked
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseState::Pending => "pending",
            DatabaseState::Running => "running",
            DatabaseState::Completed => "completed",
            DatabaseState::Failed => "failed",
            DatabaseState::Locked => "locked",
        }
    }
}

/// Progress of one table through the run.
#[derive(Debug, Clone, Serialize)]
pub struct TableProgress {
    /// Target database the table belongs to.
    pub database: String,
    pub source_table: String,
    pub target_table: String,
    pub estimate_rows: u64,
    pub estimate_basis: String,
    pub action: String,
    /// Winning extraction strategy, once known.
    pub strategy: Option<String>,
    pub state: TableState,
    pub rows_loaded: u64,
    pub rows_skipped: u64,
    pub truncated: bool,
    pub error: Option<String>,
}

/// Progress of one source file.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseProgress {
    pub file: String,
    pub target_db: String,
    pub state: DatabaseState,
    pub enumeration_strategy: Option<String>,
    pub tables_found: u64,
    pub error: Option<String>,
}

/// Point-in-time copy of the run state.
#[derive(Debug, Clone, Serialize)]
pub struct RunSnapshot {
    pub run_id: String,
    pub config_hash: String,
    pub started_at: DateTime<Utc>,
    pub databases: Vec<DatabaseProgress>,
    pub tables: Vec<TableProgress>,
}

impl RunSnapshot {
    pub fn tables_in(&self, state: TableState) -> u64 {
        self.tables.iter().filter(|t| t.state == state).count() as u64
    }

    pub fn databases_in(&self, state: DatabaseState) -> u64 {
        self.databases.iter().filter(|d| d.state == state).count() as u64
    }

    pub fn rows_loaded(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_loaded).sum()
    }

    pub fn rows_skipped(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_skipped).sum()
    }
}

/// Shared tracker for everything the run wants remembered.
///
/// Terminal states stick: once a table or database is completed, failed,
/// skipped or locked, later updates to it are ignored. That makes the
/// reporting path safe against double-completion races between the worker
/// and cleanup.
pub struct ProgressTracker {
    state: Mutex<RunSnapshot>,
    events: Mutex<std::fs::File>,
}

impl ProgressTracker {
    pub fn new(run_id: &str, config_hash: &str, log_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(log_dir)?;
        let events = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join(EVENT_LOG_NAME))?;
        Ok(Self {
            state: Mutex::new(RunSnapshot {
                run_id: run_id.to_string(),
                config_hash: config_hash.to_string(),
                started_at: Utc::now(),
                databases: Vec::new(),
                tables: Vec::new(),
            }),
            events: Mutex::new(events),
        })
    }

    /// Append a timestamped line to the event log. Event logging never fails
    /// the run; a write error is dropped after the first warning.
    pub fn event(&self, message: &str) {
        let line = format!(
            "[{}] {}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            message
        );
        let mut file = recover(self.events.lock());
        if let Err(e) = file.write_all(line.as_bytes()) {
            warn!(error = %e, "event log append failed");
        }
    }

    pub fn add_database(&self, file: &str, target_db: &str) {
        self.event(&format!("database {} discovered ({})", target_db, file));
        recover(self.state.lock()).databases.push(DatabaseProgress {
            file: file.to_string(),
            target_db: target_db.to_string(),
            state: DatabaseState::Pending,
            enumeration_strategy: None,
            tables_found: 0,
            error: None,
        });
    }

    pub fn database_running(&self, target_db: &str) {
        self.with_database(target_db, |db| db.state = DatabaseState::Running);
    }

    pub fn database_enumerated(&self, target_db: &str, strategy: &str, tables_found: u64) {
        self.event(&format!(
            "database {}: {} tables via {}",
            target_db, tables_found, strategy
        ));
        self.with_database(target_db, |db| {
            db.enumeration_strategy = Some(strategy.to_string());
            db.tables_found = tables_found;
        });
    }

    pub fn database_finished(&self, target_db: &str, state: DatabaseState, error: Option<&str>) {
        self.event(&format!("database {} {}", target_db, state.as_str()));
        self.with_database(target_db, |db| {
            db.state = state;
            db.error = error.map(str::to_string);
        });
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_table(
        &self,
        database: &str,
        source_table: &str,
        target_table: &str,
        estimate_rows: u64,
        estimate_basis: &str,
        action: &str,
    ) {
        recover(self.state.lock()).tables.push(TableProgress {
            database: database.to_string(),
            source_table: source_table.to_string(),
            target_table: target_table.to_string(),
            estimate_rows,
            estimate_basis: estimate_basis.to_string(),
            action: action.to_string(),
            strategy: None,
            state: TableState::Pending,
            rows_loaded: 0,
            rows_skipped: 0,
            truncated: false,
            error: None,
        });
    }

    pub fn table_migrating(&self, database: &str, source_table: &str) {
        self.with_table(database, source_table, |t| t.state = TableState::Migrating);
    }

    pub fn table_completed(
        &self,
        database: &str,
        source_table: &str,
        strategy: &str,
        rows_loaded: u64,
        rows_skipped: u64,
        truncated: bool,
    ) {
        self.event(&format!(
            "table {}.{} completed: {} rows via {}",
            database, source_table, rows_loaded, strategy
        ));
        self.with_table(database, source_table, |t| {
            t.state = TableState::Completed;
            t.strategy = Some(strategy.to_string());
            t.rows_loaded = rows_loaded;
            t.rows_skipped = rows_skipped;
            t.truncated = truncated;
        });
    }

    pub fn table_skipped(&self, database: &str, source_table: &str) {
        self.event(&format!("table {}.{} skipped (in sync)", database, source_table));
        self.with_table(database, source_table, |t| t.state = TableState::Skipped);
    }

    pub fn table_failed(&self, database: &str, source_table: &str, error: &str) {
        self.event(&format!(
            "table {}.{} failed: {}",
            database, source_table, error
        ));
        self.with_table(database, source_table, |t| {
            t.state = TableState::Failed;
            t.error = Some(error.to_string());
        });
    }

    pub fn snapshot(&self) -> RunSnapshot {
        recover(self.state.lock()).clone()
    }

    /// Log one progress line at the configured cadence.
    pub fn display(&self) {
        let snapshot = self.snapshot();
        info!(
            databases_done = snapshot.databases.iter().filter(|d| d.state.is_terminal()).count(),
            databases_total = snapshot.databases.len(),
            tables_completed = snapshot.tables_in(TableState::Completed),
            tables_failed = snapshot.tables_in(TableState::Failed),
            tables_skipped = snapshot.tables_in(TableState::Skipped),
            rows_loaded = snapshot.rows_loaded(),
            "migration progress"
        );
    }

    fn with_database(&self, target_db: &str, update: impl FnOnce(&mut DatabaseProgress)) {
        let mut state = recover(self.state.lock());
        if let Some(db) = state
            .databases
            .iter_mut()
            .find(|d| d.target_db == target_db)
        {
            if !db.state.is_terminal() {
                update(db);
            }
        }
    }

    fn with_table(
        &self,
        database: &str,
        source_table: &str,
        update: impl FnOnce(&mut TableProgress),
    ) {
        let mut state = recover(self.state.lock());
        if let Some(table) = state
            .tables
            .iter_mut()
            .find(|t| t.database == database && t.source_table == source_table)
        {
            if !table.state.is_terminal() {
                update(table);
            }
        }
    }
}

/// A poisoned lock still holds usable counters; take them.
fn recover<'a, T>(lock: std::result::Result<MutexGuard<'a, T>, std::sync::PoisonError<MutexGuard<'a, T>>>) -> MutexGuard<'a, T> {
    lock.unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Spawn the periodic progress display.
pub fn spawn_display(
    tracker: std::sync::Arc<ProgressTracker>,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // the first tick fires immediately; swallow it
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => tracker.display(),
            }
        }
    })
}

/// Cancel the display task and wait briefly for it to drain.
pub async fn stop_display(cancel: &CancellationToken, handle: JoinHandle<()>) {
    cancel.cancel();
    if tokio::time::timeout(DISPLAY_STOP_TIMEOUT, handle).await.is_err() {
        warn!("progress display task did not stop in time; detaching");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(dir: &Path) -> ProgressTracker {
        ProgressTracker::new("run-1", "hash-1", dir).unwrap()
    }

    #[test]
    fn test_lifecycle_counts() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(dir.path());

        tracker.add_database("a.mdb", "a");
        tracker.database_running("a");
        tracker.add_table("a", "Orders", "orders", 100, "counted", "create");
        tracker.add_table("a", "Lookup", "lookup", 5, "counted", "skip");
        tracker.table_migrating("a", "Orders");
        tracker.table_completed("a", "Orders", "bulk", 100, 2, false);
        tracker.table_skipped("a", "Lookup");
        tracker.database_finished("a", DatabaseState::Completed, None);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.tables_in(TableState::Completed), 1);
        assert_eq!(snapshot.tables_in(TableState::Skipped), 1);
        assert_eq!(snapshot.tables_in(TableState::Failed), 0);
        assert_eq!(snapshot.rows_loaded(), 100);
        assert_eq!(snapshot.rows_skipped(), 2);
        assert_eq!(snapshot.databases_in(DatabaseState::Completed), 1);
    }

    #[test]
    fn test_terminal_states_stick() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(dir.path());

        tracker.add_database("a.mdb", "a");
        tracker.add_table("a", "Orders", "orders", 100, "counted", "create");
        tracker.table_completed("a", "Orders", "bulk", 100, 0, false);
        // a late failure report must not overwrite the completion
        tracker.table_failed("a", "Orders", "late and wrong");

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.tables[0].state, TableState::Completed);
        assert_eq!(snapshot.tables[0].error, None);

        tracker.database_finished("a", DatabaseState::Locked, Some("held"));
        tracker.database_finished("a", DatabaseState::Completed, None);
        assert_eq!(
            tracker.snapshot().databases[0].state,
            DatabaseState::Locked
        );
    }

    #[test]
    fn test_event_log_appends_timestamped_lines() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(dir.path());

        tracker.event("run started");
        tracker.event("something happened");

        let contents = std::fs::read_to_string(dir.path().join(EVENT_LOG_NAME)).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("[20"));
        assert!(lines[0].ends_with("run started"));
        assert!(lines[1].contains("] something happened"));
    }

    #[test]
    fn test_unknown_table_updates_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(dir.path());
        // no panic, no phantom entries
        tracker.table_completed("a", "Ghost", "bulk", 1, 0, false);
        assert!(tracker.snapshot().tables.is_empty());
    }

    #[tokio::test]
    async fn test_display_task_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = std::sync::Arc::new(tracker(dir.path()));
        let cancel = CancellationToken::new();

        let handle = spawn_display(tracker, Duration::from_secs(3600), cancel.clone());
        stop_display(&cancel, handle).await;
        assert!(cancel.is_cancelled());
    }
}
