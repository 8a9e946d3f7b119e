//! End-of-run reporting.
//!
//! Two artifacts land in the log directory when a run finishes: a JSON
//! report with everything the tracker knows, and a short text summary an
//! operator can read without tooling. Both are written atomically via a
//! temp file so a crash mid-write never leaves a half report behind.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::progress::{DatabaseProgress, DatabaseState, RunSnapshot, TableProgress, TableState};

#[derive(Debug, Clone, Serialize)]
pub struct RunTotals {
    pub databases: u64,
    pub databases_completed: u64,
    pub databases_failed: u64,
    pub databases_locked: u64,
    pub tables: u64,
    pub tables_completed: u64,
    pub tables_failed: u64,
    pub tables_skipped: u64,
    pub rows_loaded: u64,
    pub rows_skipped: u64,
}

/// The full record of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub config_hash: String,
    pub driver: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: u64,
    pub totals: RunTotals,
    pub databases: Vec<DatabaseProgress>,
    pub tables: Vec<TableProgress>,
}

impl RunReport {
    pub fn from_snapshot(snapshot: RunSnapshot, driver: String) -> Self {
        let finished_at = Utc::now();
        let duration_secs = (finished_at - snapshot.started_at)
            .num_seconds()
            .max(0) as u64;
        let totals = RunTotals {
            databases: snapshot.databases.len() as u64,
            databases_completed: snapshot.databases_in(DatabaseState::Completed),
            databases_failed: snapshot.databases_in(DatabaseState::Failed),
            databases_locked: snapshot.databases_in(DatabaseState::Locked),
            tables: snapshot.tables.len() as u64,
            tables_completed: snapshot.tables_in(TableState::Completed),
            tables_failed: snapshot.tables_in(TableState::Failed),
            tables_skipped: snapshot.tables_in(TableState::Skipped),
            rows_loaded: snapshot.rows_loaded(),
            rows_skipped: snapshot.rows_skipped(),
        };
        Self {
            run_id: snapshot.run_id,
            config_hash: snapshot.config_hash,
            driver,
            started_at: snapshot.started_at,
            finished_at,
            duration_secs,
            totals,
            databases: snapshot.databases,
            tables: snapshot.tables,
        }
    }

    fn stamp(&self) -> String {
        self.started_at.format("%Y%m%d_%H%M%S").to_string()
    }
}

/// Write the JSON report, returning its path.
pub fn write_json(report: &RunReport, log_dir: &Path) -> Result<PathBuf> {
    let path = log_dir.join(format!("migration_report_{}.json", report.stamp()));
    let body = serde_json::to_vec_pretty(report)?;
    write_atomic(&path, &body)?;
    info!(path = %path.display(), "wrote migration report");
    Ok(path)
}

/// Write the text summary, returning its path.
pub fn write_summary(report: &RunReport, log_dir: &Path) -> Result<PathBuf> {
    let path = log_dir.join(format!("migration_summary_{}.txt", report.stamp()));
    write_atomic(&path, summary_text(report).as_bytes())?;
    info!(path = %path.display(), "wrote migration summary");
    Ok(path)
}

fn write_atomic(path: &Path, body: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Render the human-readable summary.
pub fn summary_text(report: &RunReport) -> String {
    let t = &report.totals;
    let mut out = String::new();
    out.push_str(&format!("Migration run {}\n", report.run_id));
    out.push_str(&format!(
        "  started:  {}\n",
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out.push_str(&format!(
        "  finished: {} ({})\n",
        report.finished_at.format("%Y-%m-%d %H:%M:%S UTC"),
        humanize_secs(report.duration_secs)
    ));
    out.push_str(&format!("  driver:   {}\n", report.driver));
    out.push_str(&format!("  config:   {}\n\n", report.config_hash));
    out.push_str(&format!(
        "Databases: {} total, {} completed, {} failed, {} locked\n",
        t.databases, t.databases_completed, t.databases_failed, t.databases_locked
    ));
    out.push_str(&format!(
        "Tables:    {} total, {} completed, {} failed, {} skipped\n",
        t.tables, t.tables_completed, t.tables_failed, t.tables_skipped
    ));
    out.push_str(&format!(
        "Rows:      {} loaded, {} skipped\n",
        t.rows_loaded, t.rows_skipped
    ));

    let locked: Vec<&DatabaseProgress> = report
        .databases
        .iter()
        .filter(|d| d.state == DatabaseState::Locked)
        .collect();
    if !locked.is_empty() {
        out.push_str("\nLocked source files (skipped this run):\n");
        for db in locked {
            out.push_str(&format!("  {}\n", db.file));
        }
    }

    if !report.tables.is_empty() {
        out.push_str("\nTables by estimated size:\n");
        let mut ranked: Vec<&TableProgress> = report.tables.iter().collect();
        ranked.sort_by(|a, b| {
            b.estimate_rows
                .cmp(&a.estimate_rows)
                .then_with(|| a.source_table.cmp(&b.source_table))
        });
        for table in ranked {
            let note = match table.state {
                TableState::Completed if table.truncated => {
                    format!("{} rows loaded, TRUNCATED", table.rows_loaded)
                }
                TableState::Completed => format!("{} rows loaded", table.rows_loaded),
                TableState::Failed => table
                    .error
                    .clone()
                    .unwrap_or_else(|| "failed".to_string()),
                _ => table.state.as_str().to_string(),
            };
            out.push_str(&format!(
                "  {:>10}  {}.{:<24} {:<10} {}\n",
                table.estimate_rows,
                table.database,
                table.target_table,
                table.state.as_str(),
                note
            ));
        }
    }
    out
}

fn humanize_secs(secs: u64) -> String {
    if secs >= 3600 {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}
