//! Row extraction with a fallback strategy chain.
//!
//! Four ways to get rows out of a source table, tried in order of speed and
//! fidelity:
//!
//! 1. **Bulk**: a full table export. Fastest, but refused for tables whose
//!    estimate exceeds the bulk limit, since a bulk export of a huge table
//!    pins memory for the whole materialized result.
//! 2. **Capped**: the same export under a hard row ceiling. Always
//!    applicable; trades completeness for survival.
//! 3. **Cursor**: `SELECT *` through the legacy SQL path, retried across
//!    table-reference quoting variants.
//! 4. **Id range**: batched `WHERE id >= a AND id < b` scans over the first
//!    id-like column. The tool of last resort for tables whose full scan
//!    dies partway, since each batch re-reads from a fresh cursor.
//!
//! A strategy either materializes the full row set or fails without side
//! effects, so falling to the next strategy never double-loads. Every
//! attempt, winning or not, is recorded for the run report. All strategies
//! run under the safety ceiling; hitting any ceiling marks the result
//! truncated rather than failing it.

use tracing::{debug, warn};

use crate::config::RunConfig;
use crate::core::identifier::source_reference_variants;
use crate::core::Row;
use crate::error::{MigrateError, Result};
use crate::estimate::SizeEstimate;
use crate::source::{ChunkStream, ExportOptions, SourceSession};

/// Lowercase fragments that mark a column as usable for range scans.
const RANGE_COLUMN_MARKERS: &[&str] = &["id", "key", "num"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractStrategy {
    Bulk,
    Capped,
    Cursor,
    IdRange,
}

impl ExtractStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractStrategy::Bulk => "bulk",
            ExtractStrategy::Capped => "capped",
            ExtractStrategy::Cursor => "cursor",
            ExtractStrategy::IdRange => "id_range",
        }
    }
}

impl std::fmt::Display for ExtractStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one strategy attempt.
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    /// Preconditions ruled the strategy out; it never ran.
    Refused(String),
    Failed(String),
    Succeeded { rows: u64, truncated: bool },
}

/// One entry in the per-table attempt log.
#[derive(Debug, Clone)]
pub struct ExtractAttempt {
    pub strategy: ExtractStrategy,
    pub outcome: AttemptOutcome,
}

impl ExtractAttempt {
    pub fn describe(&self) -> String {
        match &self.outcome {
            AttemptOutcome::Refused(reason) => {
                format!("{}: refused ({})", self.strategy, reason)
            }
            AttemptOutcome::Failed(message) => {
                format!("{}: failed ({})", self.strategy, message)
            }
            AttemptOutcome::Succeeded { rows, truncated } => {
                if *truncated {
                    format!("{}: succeeded ({} rows, truncated)", self.strategy, rows)
                } else {
                    format!("{}: succeeded ({} rows)", self.strategy, rows)
                }
            }
        }
    }
}

/// Materialized rows plus how they were obtained.
#[derive(Debug)]
pub struct Extraction {
    pub rows: Vec<Row>,
    pub strategy: ExtractStrategy,
    /// A ceiling cut the result short of the full table.
    pub truncated: bool,
    pub attempts: Vec<ExtractAttempt>,
}

/// Run the strategy chain for one table.
///
/// `columns` is the sampled column list; it fixes the expected row width
/// and supplies candidates for range scanning. Returns an export error
/// carrying the full attempt log when every strategy fails.
pub async fn extract_table(
    session: &dyn SourceSession,
    table: &str,
    columns: &[String],
    estimate: &SizeEstimate,
    run: &RunConfig,
) -> Result<Extraction> {
    let mut attempts: Vec<ExtractAttempt> = Vec::new();
    let expected = columns.len();

    // 1: bulk export
    if estimate.rows > run.bulk_row_limit {
        attempts.push(ExtractAttempt {
            strategy: ExtractStrategy::Bulk,
            outcome: AttemptOutcome::Refused(format!(
                "estimated {} rows exceed bulk limit {}",
                estimate.rows, run.bulk_row_limit
            )),
        });
    } else {
        match run_export(session, table, expected, run.chunk_size, run.safety_ceiling).await {
            Ok((rows, truncated)) => {
                return Ok(finish(table, ExtractStrategy::Bulk, rows, truncated, attempts));
            }
            Err(e) => attempts.push(failed(ExtractStrategy::Bulk, &e)),
        }
    }

    // 2: capped export
    let cap = run.capped_ceiling.min(run.safety_ceiling);
    match run_export(session, table, expected, run.chunk_size, cap).await {
        Ok((rows, truncated)) => {
            return Ok(finish(
                table,
                ExtractStrategy::Capped,
                rows,
                truncated,
                attempts,
            ));
        }
        Err(e) => attempts.push(failed(ExtractStrategy::Capped, &e)),
    }

    // 3: SQL cursor across quoting variants
    match run_cursor(session, table, expected, run).await {
        Ok((rows, truncated)) => {
            return Ok(finish(
                table,
                ExtractStrategy::Cursor,
                rows,
                truncated,
                attempts,
            ));
        }
        Err(e) => attempts.push(failed(ExtractStrategy::Cursor, &e)),
    }

    // 4: id range scan
    match find_range_column(columns) {
        None => attempts.push(ExtractAttempt {
            strategy: ExtractStrategy::IdRange,
            outcome: AttemptOutcome::Refused("no id-like column in sample".to_string()),
        }),
        Some(column) => {
            match run_id_range(session, table, column, expected, estimate, run).await {
                Ok((rows, truncated)) => {
                    return Ok(finish(
                        table,
                        ExtractStrategy::IdRange,
                        rows,
                        truncated,
                        attempts,
                    ));
                }
                Err(e) => attempts.push(failed(ExtractStrategy::IdRange, &e)),
            }
        }
    }

    let summary: Vec<String> = attempts.iter().map(ExtractAttempt::describe).collect();
    Err(MigrateError::export(
        table,
        format!("all extraction strategies failed: {}", summary.join("; ")),
    ))
}

/// First column that looks like a row id.
pub fn find_range_column(columns: &[String]) -> Option<&String> {
    columns.iter().find(|column| {
        let lowered = column.to_lowercase();
        RANGE_COLUMN_MARKERS
            .iter()
            .any(|marker| lowered.contains(marker))
    })
}

fn failed(strategy: ExtractStrategy, error: &MigrateError) -> ExtractAttempt {
    ExtractAttempt {
        strategy,
        outcome: AttemptOutcome::Failed(error.to_string()),
    }
}

fn finish(
    table: &str,
    strategy: ExtractStrategy,
    rows: Vec<Row>,
    truncated: bool,
    mut attempts: Vec<ExtractAttempt>,
) -> Extraction {
    if truncated {
        warn!(
            table,
            strategy = %strategy,
            rows = rows.len(),
            "extraction hit a row ceiling; table is truncated in the target"
        );
    }
    attempts.push(ExtractAttempt {
        strategy,
        outcome: AttemptOutcome::Succeeded {
            rows: rows.len() as u64,
            truncated,
        },
    });
    Extraction {
        rows,
        strategy,
        truncated,
        attempts,
    }
}

async fn run_export(
    session: &dyn SourceSession,
    table: &str,
    expected: usize,
    chunk_size: usize,
    ceiling: u64,
) -> Result<(Vec<Row>, bool)> {
    let stream = session
        .export(
            table,
            ExportOptions {
                chunk_size,
                row_ceiling: Some(ceiling),
            },
        )
        .await?;
    collect_stream(stream, table, expected, ceiling).await
}

async fn run_cursor(
    session: &dyn SourceSession,
    table: &str,
    expected: usize,
    run: &RunConfig,
) -> Result<(Vec<Row>, bool)> {
    let mut last: Option<MigrateError> = None;
    for reference in source_reference_variants(table) {
        let sql = format!("SELECT * FROM {}", reference);
        match cursor_variant(session, table, &sql, expected, run).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                debug!(table, reference = %reference, error = %e, "cursor variant failed");
                last = Some(e);
            }
        }
    }
    Err(last.unwrap_or_else(|| MigrateError::export(table, "no quoting variant accepted")))
}

async fn cursor_variant(
    session: &dyn SourceSession,
    table: &str,
    sql: &str,
    expected: usize,
    run: &RunConfig,
) -> Result<(Vec<Row>, bool)> {
    let stream = session
        .query_stream(
            sql,
            ExportOptions {
                chunk_size: run.chunk_size,
                row_ceiling: Some(run.safety_ceiling),
            },
        )
        .await?;
    collect_stream(stream, table, expected, run.safety_ceiling).await
}

async fn run_id_range(
    session: &dyn SourceSession,
    table: &str,
    column: &str,
    expected: usize,
    estimate: &SizeEstimate,
    run: &RunConfig,
) -> Result<(Vec<Row>, bool)> {
    let mut last: Option<MigrateError> = None;
    let table_refs = source_reference_variants(table);
    let column_refs = source_reference_variants(column);

    for (table_ref, column_ref) in table_refs.iter().zip(column_refs.iter()) {
        match range_scan(session, table, table_ref, column_ref, expected, estimate, run).await {
            Ok(Some(result)) => return Ok(result),
            Ok(None) => {
                debug!(table, reference = %table_ref, "id range scan found no rows");
            }
            Err(e) => {
                debug!(table, reference = %table_ref, error = %e, "id range variant failed");
                last = Some(e);
            }
        }
    }
    Err(last.unwrap_or_else(|| MigrateError::export(table, "id range scan found no rows")))
}

/// Scan `column` in fixed-width id windows until the table stops answering.
///
/// Stops after two consecutive empty windows once rows have been seen, or
/// when the window start passes twice the estimate plus slack. Ids are
/// assumed non-negative and ascending from zero, which holds for the
/// autonumber keys these files use.
async fn range_scan(
    session: &dyn SourceSession,
    table: &str,
    table_ref: &str,
    column_ref: &str,
    expected: usize,
    estimate: &SizeEstimate,
    run: &RunConfig,
) -> Result<Option<(Vec<Row>, bool)>> {
    let width = run.range_width.max(1);
    let limit = estimate
        .rows
        .saturating_mul(2)
        .saturating_add(width.saturating_mul(3));

    let mut rows: Vec<Row> = Vec::new();
    let mut start = 0u64;
    let mut empty_streak = 0u32;
    let mut truncated = false;

    while start < limit {
        let remaining = run.safety_ceiling.saturating_sub(rows.len() as u64);
        if remaining == 0 {
            truncated = true;
            break;
        }

        let sql = format!(
            "SELECT * FROM {} WHERE {} >= {} AND {} < {}",
            table_ref,
            column_ref,
            start,
            column_ref,
            start + width
        );
        let stream = session
            .query_stream(
                &sql,
                ExportOptions {
                    chunk_size: run.chunk_size,
                    row_ceiling: Some(remaining),
                },
            )
            .await?;
        let (batch, batch_truncated) = collect_stream(stream, table, expected, remaining).await?;

        if batch.is_empty() {
            if !rows.is_empty() {
                empty_streak += 1;
                if empty_streak >= 2 {
                    break;
                }
            }
        } else {
            empty_streak = 0;
            rows.extend(batch);
            if batch_truncated {
                truncated = true;
                break;
            }
        }
        start += width;
    }

    if rows.is_empty() {
        return Ok(None);
    }
    Ok(Some((rows, truncated)))
}

/// Drain a chunk stream into memory, enforcing row width against the
/// sampled column count.
async fn collect_stream(
    mut stream: ChunkStream,
    table: &str,
    expected: usize,
    ceiling: u64,
) -> Result<(Vec<Row>, bool)> {
    let mut rows: Vec<Row> = Vec::new();
    let mut chunks = 0u64;
    while let Some(item) = stream.recv().await {
        let chunk = item?;
        let is_last = chunk.is_last;
        let received = chunk.len();
        for row in chunk.rows {
            if expected > 0 && row.len() != expected {
                return Err(MigrateError::export(
                    table,
                    format!(
                        "row width {} does not match {} sampled columns",
                        row.len(),
                        expected
                    ),
                ));
            }
            rows.push(row);
        }
        if received > 0 {
            chunks += 1;
            debug!(
                table = %table,
                chunk = chunks,
                rows = received,
                total = rows.len(),
                "export chunk received"
            );
        }
        if is_last {
            break;
        }
    }
    let truncated = rows.len() as u64 >= ceiling;
    Ok((rows, truncated))
}
