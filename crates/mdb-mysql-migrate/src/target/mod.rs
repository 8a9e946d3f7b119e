//! MySQL target database operations.

use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{OptsBuilder, Pool, Value};
use tracing::{debug, info};

use crate::config::TargetConfig;
use crate::core::identifier::{qualify_mysql, quote_mysql};
use crate::core::{ColumnType, Row, TableSpec};
use crate::error::Result;

/// MySQL's hard cap on placeholders in one prepared statement.
const MAX_PLACEHOLDERS: usize = 65_535;

/// Trait for target database operations.
#[async_trait]
pub trait TargetWriter: Send + Sync {
    /// Verify the server is reachable.
    async fn ping(&self) -> Result<()>;

    /// Create a database if it doesn't exist.
    async fn ensure_database(&self, database: &str) -> Result<()>;

    /// Check if a table exists.
    async fn table_exists(&self, database: &str, table: &str) -> Result<bool>;

    /// Column names of a table, in ordinal order.
    async fn table_columns(&self, database: &str, table: &str) -> Result<Vec<String>>;

    /// Row count of a table.
    async fn count_rows(&self, database: &str, table: &str) -> Result<u64>;

    /// Create a table from its spec.
    async fn create_table(&self, database: &str, spec: &TableSpec) -> Result<()>;

    /// Drop a table if it exists.
    async fn drop_table(&self, database: &str, table: &str) -> Result<()>;

    /// Truncate a table.
    async fn truncate_table(&self, database: &str, table: &str) -> Result<()>;

    /// Insert rows, splitting into statements that respect the placeholder
    /// cap. Returns the number of rows written. Each statement commits on
    /// its own, so a failure can leave earlier statements applied; the
    /// caller owns retry granularity.
    async fn insert_batch(&self, database: &str, spec: &TableSpec, rows: &[Row]) -> Result<u64>;

    /// Close all connections.
    async fn close(&self) -> Result<()>;
}

/// MySQL target pool implementation.
pub struct MysqlPool {
    pool: Pool,
}

impl MysqlPool {
    /// Build a pool and verify it with a round trip.
    pub async fn connect(config: &TargetConfig) -> Result<Self> {
        let opts = OptsBuilder::default()
            .ip_or_hostname(config.host.clone())
            .tcp_port(config.port)
            .user(Some(config.user.clone()))
            .pass(Some(config.password.clone()))
            .init(vec!["SET NAMES utf8mb4".to_string()])
            .prefer_socket(false);
        let pool = Pool::new(opts);

        let mut conn = pool.get_conn().await?;
        conn.query_drop("SELECT 1").await?;
        info!("Connected to MySQL: {}:{}", config.host, config.port);

        Ok(Self { pool })
    }
}

#[async_trait]
impl TargetWriter for MysqlPool {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.pool.get_conn().await?;
        conn.query_drop("SELECT 1").await?;
        Ok(())
    }

    async fn ensure_database(&self, database: &str) -> Result<()> {
        let mut conn = self.pool.get_conn().await?;
        let sql = format!(
            "CREATE DATABASE IF NOT EXISTS {} CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci",
            quote_mysql(database)
        );
        conn.query_drop(sql).await?;
        debug!("Ensured database '{}'", database);
        Ok(())
    }

    async fn table_exists(&self, database: &str, table: &str) -> Result<bool> {
        let mut conn = self.pool.get_conn().await?;
        let count: Option<u64> = conn
            .exec_first(
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = ? AND table_name = ?",
                (database, table),
            )
            .await?;
        Ok(count.unwrap_or(0) > 0)
    }

    async fn table_columns(&self, database: &str, table: &str) -> Result<Vec<String>> {
        let mut conn = self.pool.get_conn().await?;
        let columns: Vec<String> = conn
            .exec(
                "SELECT column_name FROM information_schema.columns \
                 WHERE table_schema = ? AND table_name = ? \
                 ORDER BY ordinal_position",
                (database, table),
            )
            .await?;
        Ok(columns)
    }

    async fn count_rows(&self, database: &str, table: &str) -> Result<u64> {
        let mut conn = self.pool.get_conn().await?;
        let sql = format!("SELECT COUNT(*) FROM {}", qualify_mysql(database, table));
        let count: Option<u64> = conn.query_first(sql).await?;
        Ok(count.unwrap_or(0))
    }

    async fn create_table(&self, database: &str, spec: &TableSpec) -> Result<()> {
        let mut conn = self.pool.get_conn().await?;
        conn.query_drop(spec.ddl(database)?).await?;
        debug!("Created table {}.{}", database, spec.name);
        Ok(())
    }

    async fn drop_table(&self, database: &str, table: &str) -> Result<()> {
        let mut conn = self.pool.get_conn().await?;
        let sql = format!("DROP TABLE IF EXISTS {}", qualify_mysql(database, table));
        conn.query_drop(sql).await?;
        debug!("Dropped table {}.{}", database, table);
        Ok(())
    }

    async fn truncate_table(&self, database: &str, table: &str) -> Result<()> {
        let mut conn = self.pool.get_conn().await?;
        let sql = format!("TRUNCATE TABLE {}", qualify_mysql(database, table));
        conn.query_drop(sql).await?;
        debug!("Truncated table {}.{}", database, table);
        Ok(())
    }

    async fn insert_batch(&self, database: &str, spec: &TableSpec, rows: &[Row]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut conn = self.pool.get_conn().await?;
        let per_statement = rows_per_statement(spec.columns.len());
        let mut total = 0u64;

        for chunk in rows.chunks(per_statement) {
            let sql = insert_statement(database, spec, chunk.len());
            let params = chunk_params(spec, chunk);
            conn.exec_drop(&sql, params).await?;
            total += chunk.len() as u64;
        }

        Ok(total)
    }

    async fn close(&self) -> Result<()> {
        self.pool.clone().disconnect().await?;
        Ok(())
    }
}

/// Rows that fit one INSERT without breaching the placeholder cap.
fn rows_per_statement(columns: usize) -> usize {
    (MAX_PLACEHOLDERS / columns.max(1)).max(1)
}

/// Build a multi-row parameterized INSERT.
fn insert_statement(database: &str, spec: &TableSpec, row_count: usize) -> String {
    let columns: Vec<String> = spec
        .columns
        .iter()
        .map(|col| quote_mysql(&col.name))
        .collect();
    let row = format!("({})", vec!["?"; spec.columns.len()].join(", "));
    let values = vec![row; row_count].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        qualify_mysql(database, &spec.name),
        columns.join(", "),
        values
    )
}

/// Flatten a chunk of text rows into positional parameters.
///
/// Rows narrower than the spec are padded with NULL and wider ones are cut,
/// so a ragged row degrades one cell at most instead of shifting every
/// later parameter.
fn chunk_params(spec: &TableSpec, rows: &[Row]) -> Vec<Value> {
    let width = spec.columns.len();
    let mut params = Vec::with_capacity(rows.len() * width);
    for row in rows {
        for (index, column) in spec.columns.iter().enumerate() {
            let field = row.get(index).and_then(|f| f.as_deref());
            params.push(field_param(field, column.column_type));
        }
    }
    params
}

/// Convert one text field for the wire.
///
/// Integers and floats are sent typed when they parse; everything else,
/// datetimes included, goes as text and the server coerces it against the
/// column type.
fn field_param(field: Option<&str>, column_type: ColumnType) -> Value {
    let Some(text) = field else {
        return Value::NULL;
    };
    if column_type.is_integer() {
        if let Ok(n) = text.trim().parse::<i64>() {
            return Value::Int(n);
        }
    }
    if column_type == ColumnType::Double {
        if let Ok(f) = text.trim().parse::<f64>() {
            return Value::Double(f);
        }
    }
    Value::Bytes(text.as_bytes().to_vec())
}
