//! Migration orchestrator - the run loop tying every stage together.
//!
//! One run walks the discovered source files in order and, per file:
//! opens a guarded session, enumerates tables, estimates sizes, plans
//! actions against the target, then migrates each planned table through
//! sample, inference, extraction and load. Failures are contained at the
//! smallest scope that can absorb them. A bad row degrades its batch and
//! a bad table is recorded and skipped; a locked file costs its database
//! but not the run. Only configuration, discovery or a vanished driver
//! abort everything.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::catalog::{discover, enumerate_tables, SourceDatabase};
use crate::config::Config;
use crate::core::sanitize_identifier;
use crate::error::{MigrateError, Result};
use crate::estimate::estimate_rows;
use crate::extract::extract_table;
use crate::infer::infer_table_spec;
use crate::loader::{ensure_schema, load_rows};
use crate::planner::{order_plans, plan_action, MigrationAction, TablePlan};
use crate::progress::report::{write_json, write_summary, RunReport};
use crate::progress::{self, DatabaseState, ProgressTracker};
use crate::source::guard::GuardConfig;
use crate::source::{ConnectionGuard, MdbToolsDriver, SourceDriver, SourceSession};
use crate::target::{MysqlPool, TargetWriter};

/// Coordinates a whole migration run.
pub struct Orchestrator {
    config: Config,
    driver: Arc<dyn SourceDriver>,
    target: Option<Arc<dyn TargetWriter>>,
}

/// Final tally of a run, for the CLI and for callers embedding the crate.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub duration_secs: u64,
    pub databases_total: u64,
    pub databases_completed: u64,
    pub databases_locked: u64,
    pub databases_failed: u64,
    pub tables_total: u64,
    pub tables_completed: u64,
    pub tables_skipped: u64,
    pub tables_failed: u64,
    pub rows_loaded: u64,
    pub rows_skipped: u64,
    pub report_path: Option<PathBuf>,
    pub summary_path: Option<PathBuf>,
}

impl RunSummary {
    fn from_report(
        report: &RunReport,
        report_path: Option<PathBuf>,
        summary_path: Option<PathBuf>,
    ) -> Self {
        let t = &report.totals;
        Self {
            run_id: report.run_id.clone(),
            duration_secs: report.duration_secs,
            databases_total: t.databases,
            databases_completed: t.databases_completed,
            databases_locked: t.databases_locked,
            databases_failed: t.databases_failed,
            tables_total: t.tables,
            tables_completed: t.tables_completed,
            tables_skipped: t.tables_skipped,
            tables_failed: t.tables_failed,
            rows_loaded: t.rows_loaded,
            rows_skipped: t.rows_skipped,
            report_path,
            summary_path,
        }
    }

    /// Process exit code for a run that produced a summary.
    ///
    /// 0: everything attempted succeeded, including the empty run.
    /// 1: partial - some tables or files made it, some did not.
    /// 2: nothing succeeded.
    pub fn exit_code(&self) -> u8 {
        let any_failure =
            self.tables_failed > 0 || self.databases_failed > 0 || self.databases_locked > 0;
        let any_success = self.tables_completed > 0
            || self.tables_skipped > 0
            || self.databases_completed > 0;
        if !any_failure {
            0
        } else if any_success {
            1
        } else {
            2
        }
    }
}

/// How one table migration ended up, for the tracker.
struct TableOutcome {
    strategy: &'static str,
    loaded: u64,
    skipped: u64,
    truncated: bool,
}

impl Orchestrator {
    /// Production wiring: mdbtools driver, MySQL connected lazily once
    /// discovery has found something to migrate.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            driver: Arc::new(MdbToolsDriver::new()),
            target: None,
        }
    }

    /// Test wiring with injected source and target backends.
    pub fn with_backends(
        config: Config,
        driver: Arc<dyn SourceDriver>,
        target: Arc<dyn TargetWriter>,
    ) -> Self {
        Self {
            config,
            driver,
            target: Some(target),
        }
    }

    /// Run the migration to completion (or cancellation).
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunSummary> {
        self.config.validate()?;

        let run_id = Uuid::new_v4().to_string();
        let tracker = Arc::new(ProgressTracker::new(
            &run_id,
            &self.config.hash(),
            &self.config.run.log_dir,
        )?);
        tracker.event(&format!("run {} started", run_id));
        info!(
            run_id = %run_id,
            root = %self.config.source.root_dir.display(),
            "starting migration run"
        );

        // Discovery comes before the driver probe: an empty source tree is
        // a successful no-op even on a host without mdbtools.
        let databases = discover(&self.config.source.root_dir)?;
        if databases.is_empty() {
            info!("no source databases found; nothing to do");
            tracker.event("no source databases found");
            return self.finish(&tracker, "none (no source files)".to_string(), None);
        }

        let driver_info = self.driver.probe().await?;
        let driver_label = format!("{} {}", driver_info.name, driver_info.version);
        info!(driver = %driver_label, files = databases.len(), "source driver ready");

        let target = self.connect_target().await?;
        target.ping().await?;

        let display_cancel = cancel.child_token();
        let display = progress::spawn_display(
            tracker.clone(),
            self.config.run.progress_interval(),
            display_cancel.clone(),
        );

        for db in &databases {
            tracker.add_database(&db.file_name(), &db.target_db);
        }

        let mut fatal = None;
        for db in &databases {
            if cancel.is_cancelled() {
                tracker.event("cancellation requested; stopping run");
                break;
            }
            tracker.database_running(&db.target_db);
            match self
                .migrate_database(db, target.as_ref(), &tracker, &cancel)
                .await
            {
                Ok(()) => {}
                Err(e) => {
                    let locked = matches!(e, MigrateError::Locked { .. });
                    if locked {
                        warn!(file = %db.path.display(), "source file locked; skipping");
                    } else {
                        error!(file = %db.path.display(), error = %e, "database migration failed");
                    }
                    let state = if locked {
                        DatabaseState::Locked
                    } else {
                        DatabaseState::Failed
                    };
                    tracker.database_finished(&db.target_db, state, Some(&e.to_string()));
                    if e.is_fatal() {
                        fatal = Some(e);
                        break;
                    }
                }
            }
        }

        progress::stop_display(&display_cancel, display).await;
        if let Err(e) = target.close().await {
            warn!(error = %e, "target shutdown failed");
        }
        self.finish(&tracker, driver_label, fatal)
    }

    async fn connect_target(&self) -> Result<Arc<dyn TargetWriter>> {
        if let Some(target) = &self.target {
            return Ok(target.clone());
        }
        Ok(Arc::new(MysqlPool::connect(&self.config.target).await?))
    }

    /// Write the report pair and fold the tracker state into a summary.
    /// Report write failures are warned about, never escalated; they must
    /// not change the outcome of a finished run.
    fn finish(
        &self,
        tracker: &ProgressTracker,
        driver: String,
        fatal: Option<MigrateError>,
    ) -> Result<RunSummary> {
        tracker.event("run finished");
        let report = RunReport::from_snapshot(tracker.snapshot(), driver);
        let report_path = match write_json(&report, &self.config.run.log_dir) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, "could not write JSON report");
                None
            }
        };
        let summary_path = match write_summary(&report, &self.config.run.log_dir) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, "could not write text summary");
                None
            }
        };
        let summary = RunSummary::from_report(&report, report_path, summary_path);
        info!(
            databases = summary.databases_total,
            tables_completed = summary.tables_completed,
            tables_failed = summary.tables_failed,
            tables_skipped = summary.tables_skipped,
            rows_loaded = summary.rows_loaded,
            duration_secs = summary.duration_secs,
            "run complete"
        );
        match fatal {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    async fn migrate_database(
        &self,
        db: &SourceDatabase,
        target: &dyn TargetWriter,
        tracker: &ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<()> {
        info!(
            file = %db.path.display(),
            target_db = %db.target_db,
            "processing source database"
        );
        tracker.event(&format!("opening {}", db.file_name()));

        let mut guard = ConnectionGuard::new(
            self.driver.clone(),
            GuardConfig::from_source(&self.config.source),
        );
        guard.open(&db.path).await?;
        let result = self.run_tables(&mut guard, db, target, tracker, cancel).await;
        guard.safe_close().await;

        if result? {
            tracker.database_finished(&db.target_db, DatabaseState::Completed, None);
        } else {
            tracker.database_finished(
                &db.target_db,
                DatabaseState::Failed,
                Some("cancelled before completion"),
            );
        }
        Ok(())
    }

    /// Plan and migrate every table of one open database. Returns `false`
    /// when cancellation stopped the work partway.
    async fn run_tables(
        &self,
        guard: &mut ConnectionGuard,
        db: &SourceDatabase,
        target: &dyn TargetWriter,
        tracker: &ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let session = guard.session()?;

        target.ensure_database(&db.target_db).await?;

        let enumeration = enumerate_tables(&*session).await?;
        tracker.database_enumerated(
            &db.target_db,
            enumeration.strategy_name(),
            enumeration.tables.len() as u64,
        );
        if enumeration.tables.is_empty() {
            warn!(file = %db.file_name(), "no tables found by any enumeration strategy");
            return Ok(true);
        }

        let timeout = self.config.run.count_timeout();
        let mut plans = Vec::with_capacity(enumeration.tables.len());
        let mut taken = HashSet::new();
        for source_table in &enumeration.tables {
            if cancel.is_cancelled() {
                return Ok(false);
            }
            let estimate = estimate_rows(&*session, source_table, timeout).await;
            if estimate.is_large() {
                info!(
                    table = %source_table,
                    rows = estimate.rows,
                    basis = estimate.basis.as_str(),
                    "large table"
                );
            }

            let target_table = sanitize_identifier(source_table);
            // Two source tables can map onto one sanitized name. The later
            // one fails; merging them silently would interleave their rows.
            if !taken.insert(target_table.clone()) {
                let message = format!(
                    "sanitized name {} collides with an earlier table",
                    target_table
                );
                warn!(table = %source_table, "{}", message);
                tracker.add_table(
                    &db.target_db,
                    source_table,
                    &target_table,
                    estimate.rows,
                    estimate.basis.as_str(),
                    MigrationAction::Create.as_str(),
                );
                tracker.table_failed(&db.target_db, source_table, &message);
                continue;
            }

            let target_rows = if target.table_exists(&db.target_db, &target_table).await? {
                Some(target.count_rows(&db.target_db, &target_table).await?)
            } else {
                None
            };
            let action = plan_action(&estimate, target_rows);
            if let Some(count) = target_rows {
                if count > estimate.rows {
                    // Update truncates before reloading, so rows only present
                    // on the target side do not survive.
                    warn!(
                        table = %source_table,
                        target_rows = count,
                        estimate = estimate.rows,
                        "target holds more rows than the source estimate; reload will discard the extras"
                    );
                }
            }
            tracker.add_table(
                &db.target_db,
                source_table,
                &target_table,
                estimate.rows,
                estimate.basis.as_str(),
                action.as_str(),
            );
            plans.push(TablePlan {
                source_table: source_table.clone(),
                target_table,
                estimate,
                target_rows,
                action,
            });
        }

        // Smallest first: quick wins land early and a failure on the big
        // tables late in the run costs the least completed work.
        order_plans(&mut plans);

        for plan in &plans {
            if cancel.is_cancelled() {
                return Ok(false);
            }
            if plan.action == MigrationAction::Skip {
                debug!(table = %plan.source_table, "row counts match; skipping");
                tracker.table_skipped(&db.target_db, &plan.source_table);
                continue;
            }

            tracker.table_migrating(&db.target_db, &plan.source_table);
            match self
                .migrate_table(&*session, target, &db.target_db, plan)
                .await
            {
                Ok(outcome) => {
                    info!(
                        table = %plan.source_table,
                        rows = outcome.loaded,
                        strategy = outcome.strategy,
                        "table migrated"
                    );
                    tracker.table_completed(
                        &db.target_db,
                        &plan.source_table,
                        outcome.strategy,
                        outcome.loaded,
                        outcome.skipped,
                        outcome.truncated,
                    );
                }
                Err(e) if e.is_fatal() => {
                    tracker.table_failed(&db.target_db, &plan.source_table, &e.to_string());
                    return Err(e);
                }
                Err(e) => {
                    error!(table = %plan.source_table, error = %e, "table migration failed");
                    tracker.table_failed(&db.target_db, &plan.source_table, &e.to_string());
                }
            }
        }
        Ok(true)
    }

    async fn migrate_table(
        &self,
        session: &dyn SourceSession,
        target: &dyn TargetWriter,
        database: &str,
        plan: &TablePlan,
    ) -> Result<TableOutcome> {
        let run = &self.config.run;

        let sample = session.sample(&plan.source_table, run.sample_rows).await?;
        let spec = infer_table_spec(&plan.source_table, &plan.target_table, &sample)?;
        debug!(
            table = %plan.source_table,
            columns = spec.columns.len(),
            "schema inferred"
        );

        // Extract before touching the target. A table whose every strategy
        // fails keeps its old target data instead of losing it to a drop.
        let extraction = extract_table(
            session,
            &plan.source_table,
            &sample.columns,
            &plan.estimate,
            run,
        )
        .await?;

        ensure_schema(target, database, &spec, plan.action).await?;
        let stats = load_rows(target, database, &spec, &extraction.rows, run.batch_size).await?;

        match target.count_rows(database, &spec.name).await {
            Ok(count) if count != stats.rows_loaded => {
                warn!(
                    table = %plan.source_table,
                    loaded = stats.rows_loaded,
                    target_rows = count,
                    "post-load count differs from rows loaded"
                );
            }
            Ok(_) => {}
            Err(e) => debug!(table = %plan.source_table, error = %e, "post-load count failed"),
        }

        Ok(TableOutcome {
            strategy: extraction.strategy.as_str(),
            loaded: stats.rows_loaded,
            skipped: stats.rows_skipped,
            truncated: extraction.truncated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::config::{RunConfig, SourceConfig, TargetConfig};
    use crate::core::{ExportChunk, Row, Sample, TableSpec};
    use crate::source::{ChunkStream, DriverInfo, ExportOptions};

    // === scripted source ===

    #[derive(Clone)]
    struct ScriptTable {
        name: String,
        columns: Vec<String>,
        rows: Vec<Row>,
    }

    #[derive(Clone, Default)]
    struct ScriptDb {
        tables: Vec<ScriptTable>,
    }

    struct ScriptDriver {
        dbs: HashMap<PathBuf, ScriptDb>,
        locked: Vec<PathBuf>,
    }

    #[async_trait]
    impl SourceDriver for ScriptDriver {
        async fn probe(&self) -> crate::error::Result<DriverInfo> {
            Ok(DriverInfo {
                name: "scripted".to_string(),
                version: "0".to_string(),
            })
        }

        async fn open(&self, path: &Path) -> crate::error::Result<Box<dyn SourceSession>> {
            if self.locked.iter().any(|p| p == path) {
                return Err(MigrateError::Driver(
                    "file is already open in another process".to_string(),
                ));
            }
            let db = self
                .dbs
                .get(path)
                .cloned()
                .ok_or_else(|| MigrateError::Driver("unknown file".to_string()))?;
            Ok(Box::new(ScriptSession {
                path: path.to_path_buf(),
                db,
            }))
        }

        async fn restart(&self) -> crate::error::Result<()> {
            Ok(())
        }
    }

    struct ScriptSession {
        path: PathBuf,
        db: ScriptDb,
    }

    impl ScriptSession {
        fn table(&self, name: &str) -> crate::error::Result<&ScriptTable> {
            self.db
                .tables
                .iter()
                .find(|t| t.name == name)
                .ok_or_else(|| MigrateError::Driver(format!("no such table {}", name)))
        }
    }

    fn stream_rows(rows: Vec<Row>, opts: ExportOptions) -> ChunkStream {
        let mut chunks: Vec<ExportChunk> = rows
            .chunks(opts.chunk_size.max(1))
            .map(|c| ExportChunk::new(c.to_vec()))
            .collect();
        match chunks.pop() {
            Some(last) => chunks.push(last.mark_final()),
            None => chunks.push(ExportChunk::empty_final()),
        }
        let (tx, rx) = tokio::sync::mpsc::channel(chunks.len().max(1));
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(Ok(chunk)).await.is_err() {
                    break;
                }
            }
        });
        rx
    }

    #[async_trait]
    impl SourceSession for ScriptSession {
        fn path(&self) -> &Path {
            &self.path
        }

        async fn catalog_tables(&self) -> crate::error::Result<Vec<String>> {
            Ok(self.db.tables.iter().map(|t| t.name.clone()).collect())
        }

        async fn system_object_names(&self) -> crate::error::Result<Vec<String>> {
            Err(MigrateError::Driver("not scripted".to_string()))
        }

        async fn schema_table_names(&self) -> crate::error::Result<Vec<String>> {
            Err(MigrateError::Driver("not scripted".to_string()))
        }

        async fn count_rows(&self, table: &str) -> crate::error::Result<u64> {
            Ok(self.table(table)?.rows.len() as u64)
        }

        async fn sample(&self, table: &str, rows: usize) -> crate::error::Result<Sample> {
            let table = self.table(table)?;
            Ok(Sample {
                columns: table.columns.clone(),
                rows: table.rows.iter().take(rows).cloned().collect(),
            })
        }

        async fn export(
            &self,
            table: &str,
            opts: ExportOptions,
        ) -> crate::error::Result<ChunkStream> {
            Ok(stream_rows(self.table(table)?.rows.clone(), opts))
        }

        async fn query_stream(
            &self,
            _sql: &str,
            _opts: ExportOptions,
        ) -> crate::error::Result<ChunkStream> {
            Err(MigrateError::Driver("not scripted".to_string()))
        }

        async fn close(&mut self) -> crate::error::Result<()> {
            Ok(())
        }
    }

    // === recording target ===

    #[derive(Default)]
    struct TargetState {
        databases: Vec<String>,
        tables: HashMap<String, (Vec<String>, Vec<Row>)>,
        inserts: Vec<String>,
    }

    #[derive(Default)]
    struct FakeTarget {
        state: Mutex<TargetState>,
    }

    impl FakeTarget {
        fn seed_table(&self, database: &str, table: &str, columns: &[&str], rows: usize) {
            let mut state = self.state.lock().unwrap();
            let filler: Row = columns.iter().map(|_| Some("x".to_string())).collect();
            state.tables.insert(
                format!("{}.{}", database, table),
                (
                    columns.iter().map(|c| c.to_string()).collect(),
                    vec![filler; rows],
                ),
            );
        }

        fn rows_in(&self, database: &str, table: &str) -> usize {
            let state = self.state.lock().unwrap();
            state
                .tables
                .get(&format!("{}.{}", database, table))
                .map(|(_, rows)| rows.len())
                .unwrap_or(0)
        }

        fn inserts(&self) -> Vec<String> {
            self.state.lock().unwrap().inserts.clone()
        }
    }

    #[async_trait]
    impl TargetWriter for FakeTarget {
        async fn ping(&self) -> crate::error::Result<()> {
            Ok(())
        }

        async fn ensure_database(&self, database: &str) -> crate::error::Result<()> {
            let mut state = self.state.lock().unwrap();
            if !state.databases.iter().any(|d| d == database) {
                state.databases.push(database.to_string());
            }
            Ok(())
        }

        async fn table_exists(&self, database: &str, table: &str) -> crate::error::Result<bool> {
            let state = self.state.lock().unwrap();
            Ok(state.tables.contains_key(&format!("{}.{}", database, table)))
        }

        async fn table_columns(
            &self,
            database: &str,
            table: &str,
        ) -> crate::error::Result<Vec<String>> {
            let state = self.state.lock().unwrap();
            state
                .tables
                .get(&format!("{}.{}", database, table))
                .map(|(columns, _)| columns.clone())
                .ok_or_else(|| MigrateError::Driver("no such table".to_string()))
        }

        async fn count_rows(&self, database: &str, table: &str) -> crate::error::Result<u64> {
            let state = self.state.lock().unwrap();
            state
                .tables
                .get(&format!("{}.{}", database, table))
                .map(|(_, rows)| rows.len() as u64)
                .ok_or_else(|| MigrateError::Driver("no such table".to_string()))
        }

        async fn create_table(
            &self,
            database: &str,
            spec: &TableSpec,
        ) -> crate::error::Result<()> {
            let mut state = self.state.lock().unwrap();
            state.tables.insert(
                format!("{}.{}", database, spec.name),
                (
                    spec.columns.iter().map(|c| c.name.clone()).collect(),
                    Vec::new(),
                ),
            );
            Ok(())
        }

        async fn drop_table(&self, database: &str, table: &str) -> crate::error::Result<()> {
            let mut state = self.state.lock().unwrap();
            state.tables.remove(&format!("{}.{}", database, table));
            Ok(())
        }

        async fn truncate_table(&self, database: &str, table: &str) -> crate::error::Result<()> {
            let mut state = self.state.lock().unwrap();
            if let Some((_, rows)) = state.tables.get_mut(&format!("{}.{}", database, table)) {
                rows.clear();
            }
            Ok(())
        }

        async fn insert_batch(
            &self,
            database: &str,
            spec: &TableSpec,
            rows: &[Row],
        ) -> crate::error::Result<u64> {
            let mut state = self.state.lock().unwrap();
            state
                .inserts
                .push(format!("{}.{} ({})", database, spec.name, rows.len()));
            if let Some((_, stored)) = state.tables.get_mut(&format!("{}.{}", database, spec.name))
            {
                stored.extend_from_slice(rows);
            }
            Ok(rows.len() as u64)
        }

        async fn close(&self) -> crate::error::Result<()> {
            Ok(())
        }
    }

    // === helpers ===

    fn row(values: &[&str]) -> Row {
        values.iter().map(|v| Some(v.to_string())).collect()
    }

    fn config(root: &Path) -> Config {
        Config {
            source: SourceConfig {
                root_dir: root.to_path_buf(),
                lock_age_secs: 600,
                open_attempts: 1,
            },
            target: TargetConfig {
                host: "localhost".to_string(),
                port: 3306,
                user: "root".to_string(),
                password: String::new(),
            },
            run: RunConfig {
                log_dir: root.join("logs"),
                ..RunConfig::default()
            },
        }
    }

    fn touch(path: &Path) {
        std::fs::write(path, b"").unwrap();
    }

    fn orders_db() -> ScriptDb {
        ScriptDb {
            tables: vec![
                ScriptTable {
                    name: "Orders".to_string(),
                    columns: vec!["order_id".to_string(), "customer".to_string()],
                    rows: vec![
                        row(&["1", "Alice"]),
                        row(&["2", "Bob"]),
                        row(&["3", "Carol"]),
                    ],
                },
                ScriptTable {
                    name: "Products".to_string(),
                    columns: vec!["sku".to_string(), "price".to_string()],
                    rows: vec![row(&["A-1", "9.99"]), row(&["B-2", "19.50"])],
                },
            ],
        }
    }

    // === end-to-end runs ===

    #[tokio::test]
    async fn test_run_migrates_all_tables() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("north.mdb"));

        let driver = ScriptDriver {
            dbs: HashMap::from([(dir.path().join("north.mdb"), orders_db())]),
            locked: Vec::new(),
        };
        let target = Arc::new(FakeTarget::default());
        let orchestrator = Orchestrator::with_backends(
            config(dir.path()),
            Arc::new(driver),
            target.clone(),
        );

        let summary = orchestrator.run(CancellationToken::new()).await.unwrap();

        assert_eq!(summary.databases_total, 1);
        assert_eq!(summary.databases_completed, 1);
        assert_eq!(summary.tables_total, 2);
        assert_eq!(summary.tables_completed, 2);
        assert_eq!(summary.rows_loaded, 5);
        assert_eq!(summary.exit_code(), 0);

        assert_eq!(target.rows_in("north", "orders"), 3);
        assert_eq!(target.rows_in("north", "products"), 2);

        // smaller table first, regardless of catalog order
        assert_eq!(
            target.inserts(),
            vec!["north.products (2)", "north.orders (3)"]
        );

        // both report files landed in the log directory
        let report = summary.report_path.unwrap();
        assert!(report.exists());
        assert!(summary.summary_path.unwrap().exists());
        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(report).unwrap()).unwrap();
        assert_eq!(parsed["totals"]["tables_completed"], 2);
    }

    #[tokio::test]
    async fn test_locked_file_is_skipped_and_run_is_partial() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("held.mdb"));
        touch(&dir.path().join("north.mdb"));

        let driver = ScriptDriver {
            dbs: HashMap::from([(dir.path().join("north.mdb"), orders_db())]),
            locked: vec![dir.path().join("held.mdb")],
        };
        let target = Arc::new(FakeTarget::default());
        let orchestrator = Orchestrator::with_backends(
            config(dir.path()),
            Arc::new(driver),
            target.clone(),
        );

        let summary = orchestrator.run(CancellationToken::new()).await.unwrap();

        assert_eq!(summary.databases_locked, 1);
        assert_eq!(summary.databases_completed, 1);
        assert_eq!(summary.tables_completed, 2);
        assert_eq!(summary.exit_code(), 1);
        assert_eq!(target.rows_in("north", "orders"), 3);
    }

    #[tokio::test]
    async fn test_empty_root_is_a_successful_noop() {
        let dir = tempfile::tempdir().unwrap();

        let driver = ScriptDriver {
            dbs: HashMap::new(),
            locked: Vec::new(),
        };
        let target = Arc::new(FakeTarget::default());
        let orchestrator =
            Orchestrator::with_backends(config(dir.path()), Arc::new(driver), target);

        let summary = orchestrator.run(CancellationToken::new()).await.unwrap();

        assert_eq!(summary.databases_total, 0);
        assert_eq!(summary.tables_total, 0);
        assert_eq!(summary.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_in_sync_table_is_skipped_without_writes() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("north.mdb"));

        let db = ScriptDb {
            tables: vec![ScriptTable {
                name: "Orders".to_string(),
                columns: vec!["order_id".to_string(), "customer".to_string()],
                rows: vec![row(&["1", "Alice"]), row(&["2", "Bob"])],
            }],
        };
        let driver = ScriptDriver {
            dbs: HashMap::from([(dir.path().join("north.mdb"), db)]),
            locked: Vec::new(),
        };
        let target = Arc::new(FakeTarget::default());
        // same row count as the source, so the planner skips it
        target.seed_table("north", "orders", &["order_id", "customer"], 2);

        let orchestrator = Orchestrator::with_backends(
            config(dir.path()),
            Arc::new(driver),
            target.clone(),
        );
        let summary = orchestrator.run(CancellationToken::new()).await.unwrap();

        assert_eq!(summary.tables_skipped, 1);
        assert_eq!(summary.tables_completed, 0);
        assert_eq!(summary.exit_code(), 0);
        assert!(target.inserts().is_empty());
        assert_eq!(target.rows_in("north", "orders"), 2);
    }

    #[tokio::test]
    async fn test_cancelled_run_marks_database_unfinished() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("north.mdb"));

        let driver = ScriptDriver {
            dbs: HashMap::from([(dir.path().join("north.mdb"), orders_db())]),
            locked: Vec::new(),
        };
        let target = Arc::new(FakeTarget::default());
        let orchestrator = Orchestrator::with_backends(
            config(dir.path()),
            Arc::new(driver),
            target.clone(),
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        let summary = orchestrator.run(cancel).await.unwrap();

        // cancelled before any database was processed
        assert_eq!(summary.tables_completed, 0);
        assert_eq!(summary.rows_loaded, 0);
        assert!(target.inserts().is_empty());
    }

    // === exit code mapping ===

    fn summary_with(completed: u64, skipped: u64, failed: u64, locked: u64) -> RunSummary {
        RunSummary {
            run_id: "r".to_string(),
            duration_secs: 0,
            databases_total: 1,
            databases_completed: if locked == 0 { 1 } else { 0 },
            databases_locked: locked,
            databases_failed: 0,
            tables_total: completed + skipped + failed,
            tables_completed: completed,
            tables_skipped: skipped,
            tables_failed: failed,
            rows_loaded: 0,
            rows_skipped: 0,
            report_path: None,
            summary_path: None,
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(summary_with(3, 0, 0, 0).exit_code(), 0);
        assert_eq!(summary_with(0, 2, 0, 0).exit_code(), 0);
        assert_eq!(summary_with(2, 0, 1, 0).exit_code(), 1);
        assert_eq!(summary_with(1, 0, 0, 1).exit_code(), 1);
        assert_eq!(summary_with(0, 0, 3, 0).exit_code(), 2);
        // every file locked, nothing migrated
        assert_eq!(summary_with(0, 0, 0, 1).exit_code(), 2);
    }
}
