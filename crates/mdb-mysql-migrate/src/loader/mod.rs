//! Target-side schema reconciliation and row loading.
//!
//! Loading is append-only and committed batch by batch: a failed batch is
//! retried row by row so one poisoned row costs itself, not its thousand
//! neighbors, and rows already committed stay committed. There is no
//! rollback path; the worst outcome of a crash is a partially loaded table
//! the next run's plan will see as out of sync and reload.

use tracing::{debug, info, warn};

use crate::core::{Row, TableSpec};
use crate::error::Result;
use crate::planner::MigrationAction;
use crate::target::TargetWriter;

/// Counters from loading one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub rows_loaded: u64,
    pub rows_skipped: u64,
    pub batches: u64,
    /// Batches that failed wholesale and went through row-by-row retry.
    pub retried_batches: u64,
}

/// Put the target table into a loadable state for the planned action.
///
/// Create always starts from scratch: drop whatever half-migrated remnant
/// may exist, then create. Update keeps the table when its columns still
/// match the spec and merely truncates it; on column drift it falls back to
/// drop and recreate, since ALTER against an inferred schema is guesswork.
pub async fn ensure_schema(
    target: &dyn TargetWriter,
    database: &str,
    spec: &TableSpec,
    action: MigrationAction,
) -> Result<()> {
    match action {
        MigrationAction::Create => {
            target.drop_table(database, &spec.name).await?;
            target.create_table(database, spec).await?;
        }
        MigrationAction::Update => {
            if !target.table_exists(database, &spec.name).await? {
                target.create_table(database, spec).await?;
                return Ok(());
            }
            let existing = target.table_columns(database, &spec.name).await?;
            if columns_match(&existing, spec) {
                target.truncate_table(database, &spec.name).await?;
            } else {
                info!(
                    table = %spec.name,
                    "target columns drifted from inferred schema; recreating"
                );
                target.drop_table(database, &spec.name).await?;
                target.create_table(database, spec).await?;
            }
        }
        MigrationAction::Skip => {}
    }
    Ok(())
}

fn columns_match(existing: &[String], spec: &TableSpec) -> bool {
    existing.len() == spec.columns.len()
        && existing
            .iter()
            .zip(spec.columns.iter())
            .all(|(have, want)| have == &want.name)
}

/// Load rows in batches, one commit each.
///
/// A failing batch is retried row by row; rows that still fail are counted
/// as skipped and logged, and the load carries on.
pub async fn load_rows(
    target: &dyn TargetWriter,
    database: &str,
    spec: &TableSpec,
    rows: &[Row],
    batch_size: usize,
) -> Result<LoadStats> {
    let mut stats = LoadStats::default();
    let batch_size = batch_size.max(1);

    for batch in rows.chunks(batch_size) {
        stats.batches += 1;
        match target.insert_batch(database, spec, batch).await {
            Ok(written) => {
                stats.rows_loaded += written;
            }
            Err(batch_error) => {
                warn!(
                    table = %spec.name,
                    batch_rows = batch.len(),
                    error = %batch_error,
                    "batch insert failed; retrying row by row"
                );
                stats.retried_batches += 1;
                for (offset, row) in batch.iter().enumerate() {
                    match target
                        .insert_batch(database, spec, std::slice::from_ref(row))
                        .await
                    {
                        Ok(written) => stats.rows_loaded += written,
                        Err(row_error) => {
                            stats.rows_skipped += 1;
                            debug!(
                                table = %spec.name,
                                row_offset = offset,
                                error = %row_error,
                                "row rejected; skipping"
                            );
                        }
                    }
                }
            }
        }
    }

    if stats.rows_skipped > 0 {
        warn!(
            table = %spec.name,
            loaded = stats.rows_loaded,
            skipped = stats.rows_skipped,
            "load finished with skipped rows"
        );
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ColumnSpec, ColumnType};
    use crate::error::MigrateError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Marker cell that makes the fake target reject an insert.
    const POISON: &str = "BAD";

    fn spec() -> TableSpec {
        TableSpec {
            source_name: "Orders".to_string(),
            name: "orders".to_string(),
            columns: vec![
                ColumnSpec {
                    source_name: "ID".to_string(),
                    name: "id".to_string(),
                    column_type: ColumnType::Int,
                },
                ColumnSpec {
                    source_name: "Note".to_string(),
                    name: "note".to_string(),
                    column_type: ColumnType::Text,
                },
            ],
        }
    }

    fn row(id: &str, note: &str) -> Row {
        vec![Some(id.to_string()), Some(note.to_string())]
    }

    #[derive(Default)]
    struct FakeTarget {
        calls: Mutex<Vec<String>>,
        tables: Mutex<HashMap<String, Vec<String>>>,
    }

    impl FakeTarget {
        fn with_table(table: &str, columns: &[&str]) -> Self {
            let fake = Self::default();
            fake.tables.lock().unwrap().insert(
                table.to_string(),
                columns.iter().map(|c| c.to_string()).collect(),
            );
            fake
        }

        fn log(&self, entry: String) {
            self.calls.lock().unwrap().push(entry);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TargetWriter for FakeTarget {
        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        async fn ensure_database(&self, database: &str) -> Result<()> {
            self.log(format!("ensure_database {}", database));
            Ok(())
        }

        async fn table_exists(&self, _database: &str, table: &str) -> Result<bool> {
            Ok(self.tables.lock().unwrap().contains_key(table))
        }

        async fn table_columns(&self, _database: &str, table: &str) -> Result<Vec<String>> {
            Ok(self
                .tables
                .lock()
                .unwrap()
                .get(table)
                .cloned()
                .unwrap_or_default())
        }

        async fn count_rows(&self, _database: &str, _table: &str) -> Result<u64> {
            Ok(0)
        }

        async fn create_table(&self, _database: &str, spec: &TableSpec) -> Result<()> {
            self.log(format!("create {}", spec.name));
            self.tables.lock().unwrap().insert(
                spec.name.clone(),
                spec.columns.iter().map(|c| c.name.clone()).collect(),
            );
            Ok(())
        }

        async fn drop_table(&self, _database: &str, table: &str) -> Result<()> {
            self.log(format!("drop {}", table));
            self.tables.lock().unwrap().remove(table);
            Ok(())
        }

        async fn truncate_table(&self, _database: &str, table: &str) -> Result<()> {
            self.log(format!("truncate {}", table));
            Ok(())
        }

        async fn insert_batch(
            &self,
            _database: &str,
            spec: &TableSpec,
            rows: &[Row],
        ) -> Result<u64> {
            let poisoned = rows
                .iter()
                .any(|row| row.iter().any(|f| f.as_deref() == Some(POISON)));
            if poisoned {
                self.log(format!("insert {} FAILED ({})", spec.name, rows.len()));
                return Err(MigrateError::load(&spec.name, "server rejected data"));
            }
            self.log(format!("insert {} ({})", spec.name, rows.len()));
            Ok(rows.len() as u64)
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    // === ensure_schema ===

    #[tokio::test]
    async fn test_create_drops_remnant_then_creates() {
        let target = FakeTarget::with_table("orders", &["stale"]);
        ensure_schema(&target, "acme", &spec(), MigrationAction::Create)
            .await
            .unwrap();
        assert_eq!(target.calls(), vec!["drop orders", "create orders"]);
    }

    #[tokio::test]
    async fn test_update_creates_when_table_missing() {
        let target = FakeTarget::default();
        ensure_schema(&target, "acme", &spec(), MigrationAction::Update)
            .await
            .unwrap();
        assert_eq!(target.calls(), vec!["create orders"]);
    }

    #[tokio::test]
    async fn test_update_truncates_when_columns_match() {
        let target = FakeTarget::with_table("orders", &["id", "note"]);
        ensure_schema(&target, "acme", &spec(), MigrationAction::Update)
            .await
            .unwrap();
        assert_eq!(target.calls(), vec!["truncate orders"]);
    }

    #[tokio::test]
    async fn test_update_recreates_on_column_drift() {
        let target = FakeTarget::with_table("orders", &["id", "old_note", "extra"]);
        ensure_schema(&target, "acme", &spec(), MigrationAction::Update)
            .await
            .unwrap();
        assert_eq!(target.calls(), vec!["drop orders", "create orders"]);
    }

    #[tokio::test]
    async fn test_skip_touches_nothing() {
        let target = FakeTarget::with_table("orders", &["id", "note"]);
        ensure_schema(&target, "acme", &spec(), MigrationAction::Skip)
            .await
            .unwrap();
        assert!(target.calls().is_empty());
    }

    // === load_rows ===

    #[tokio::test]
    async fn test_clean_load_batches_by_size() {
        let target = FakeTarget::default();
        let rows: Vec<Row> = (0..5).map(|i| row(&i.to_string(), "ok")).collect();

        let stats = load_rows(&target, "acme", &spec(), &rows, 2).await.unwrap();

        assert_eq!(stats.rows_loaded, 5);
        assert_eq!(stats.rows_skipped, 0);
        assert_eq!(stats.batches, 3);
        assert_eq!(stats.retried_batches, 0);
        assert_eq!(
            target.calls(),
            vec!["insert orders (2)", "insert orders (2)", "insert orders (1)"]
        );
    }

    #[tokio::test]
    async fn test_failed_batch_retries_rows_and_skips_poison() {
        let target = FakeTarget::default();
        let rows = vec![
            row("1", "ok"),
            row("2", POISON),
            row("3", "ok"),
            row("4", "ok"),
        ];

        let stats = load_rows(&target, "acme", &spec(), &rows, 3).await.unwrap();

        // first batch of 3 fails, its rows retried singly; second batch clean
        assert_eq!(stats.rows_loaded, 3);
        assert_eq!(stats.rows_skipped, 1);
        assert_eq!(stats.batches, 2);
        assert_eq!(stats.retried_batches, 1);
        assert_eq!(
            target.calls(),
            vec![
                "insert orders FAILED (3)",
                "insert orders (1)",
                "insert orders FAILED (1)",
                "insert orders (1)",
                "insert orders (1)",
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_load_is_a_no_op() {
        let target = FakeTarget::default();
        let stats = load_rows(&target, "acme", &spec(), &[], 1000).await.unwrap();
        assert_eq!(stats, LoadStats::default());
        assert!(target.calls().is_empty());
    }
}
