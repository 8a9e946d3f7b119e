//! Schema and row types shared across the pipeline.
//!
//! Rows travel in text form between extraction and load: the legacy driver
//! emits everything as text, and typed conversion happens once, at the load
//! boundary, against the inferred column types. `None` is SQL NULL and is
//! kept distinct from the empty string end to end.

use serde::{Deserialize, Serialize};

use crate::core::identifier::{quote_mysql, validate_identifier};
use crate::error::Result;

/// A single row in text form. One entry per column, `None` = NULL.
pub type Row = Vec<Option<String>>;

/// Bounded ordered batch of rows staged between extraction and load.
///
/// Chunks are ephemeral: they exist only inside the export channel and are
/// dropped once loaded (or when the pipeline tears down).
#[derive(Debug, Clone, Default)]
pub struct ExportChunk {
    /// Rows in this chunk.
    pub rows: Vec<Row>,

    /// Whether this is the final chunk for the table.
    pub is_last: bool,
}

impl ExportChunk {
    /// Create a new chunk with the given rows.
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows,
            is_last: false,
        }
    }

    /// Create an empty final chunk.
    pub fn empty_final() -> Self {
        Self {
            rows: Vec::new(),
            is_last: true,
        }
    }

    /// Mark this as the final chunk.
    pub fn mark_final(mut self) -> Self {
        self.is_last = true;
        self
    }

    /// Number of rows in this chunk.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the chunk is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Bounded sample of a table: ordered column names plus the leading rows.
///
/// The column order is the driver's export order and is the one authority on
/// column layout for the whole pipeline.
#[derive(Debug, Clone)]
pub struct Sample {
    /// Source column names, in export order.
    pub columns: Vec<String>,

    /// Leading rows, text form.
    pub rows: Vec<Row>,
}

impl Sample {
    /// Check whether the sample is unusable for inference (no columns).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Inferred MySQL column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Double,
    DateTime,
    VarChar(u16),
    Text,
}

impl ColumnType {
    /// Render the MySQL type for DDL.
    #[must_use]
    pub fn sql(&self) -> String {
        match self {
            ColumnType::TinyInt => "TINYINT".to_string(),
            ColumnType::SmallInt => "SMALLINT".to_string(),
            ColumnType::Int => "INT".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Double => "DOUBLE".to_string(),
            ColumnType::DateTime => "DATETIME".to_string(),
            ColumnType::VarChar(n) => format!("VARCHAR({})", n),
            ColumnType::Text => "TEXT".to_string(),
        }
    }

    /// Whether values of this type are sent to MySQL as integers.
    #[must_use]
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            ColumnType::TinyInt | ColumnType::SmallInt | ColumnType::Int | ColumnType::BigInt
        )
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.sql())
    }
}

/// One target column: the source name it came from, its sanitized target
/// name, and the inferred type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name as the source reports it.
    pub source_name: String,

    /// Sanitized target column name.
    pub name: String,

    /// Inferred MySQL type.
    pub column_type: ColumnType,
}

/// Target table specification produced by inference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Table name as the source reports it.
    pub source_name: String,

    /// Sanitized target table name.
    pub name: String,

    /// Ordered column specifications.
    pub columns: Vec<ColumnSpec>,
}

impl TableSpec {
    /// Sanitized target column names, in order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Build the CREATE TABLE statement for this spec.
    ///
    /// Every column is nullable: legacy data is unreliable enough that NOT
    /// NULL constraints would reject rows the operator still wants migrated.
    pub fn ddl(&self, database: &str) -> Result<String> {
        validate_identifier(database)?;
        validate_identifier(&self.name)?;
        let mut cols = Vec::with_capacity(self.columns.len());
        for col in &self.columns {
            validate_identifier(&col.name)?;
            cols.push(format!("{} {}", quote_mysql(&col.name), col.column_type));
        }
        Ok(format!(
            "CREATE TABLE {}.{} ({}) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci",
            quote_mysql(database),
            quote_mysql(&self.name),
            cols.join(", ")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> TableSpec {
        TableSpec {
            source_name: "Order Details".to_string(),
            name: "order_details".to_string(),
            columns: vec![
                ColumnSpec {
                    source_name: "Order ID".to_string(),
                    name: "order_id".to_string(),
                    column_type: ColumnType::Int,
                },
                ColumnSpec {
                    source_name: "Notes".to_string(),
                    name: "notes".to_string(),
                    column_type: ColumnType::VarChar(120),
                },
            ],
        }
    }

    #[test]
    fn test_column_type_sql() {
        assert_eq!(ColumnType::TinyInt.sql(), "TINYINT");
        assert_eq!(ColumnType::SmallInt.sql(), "SMALLINT");
        assert_eq!(ColumnType::Int.sql(), "INT");
        assert_eq!(ColumnType::BigInt.sql(), "BIGINT");
        assert_eq!(ColumnType::Double.sql(), "DOUBLE");
        assert_eq!(ColumnType::DateTime.sql(), "DATETIME");
        assert_eq!(ColumnType::VarChar(255).sql(), "VARCHAR(255)");
        assert_eq!(ColumnType::Text.sql(), "TEXT");
    }

    #[test]
    fn test_ddl_shape() {
        let ddl = spec().ddl("northwind").unwrap();
        assert_eq!(
            ddl,
            "CREATE TABLE `northwind`.`order_details` (`order_id` INT, `notes` VARCHAR(120)) \
             ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci"
        );
    }

    #[test]
    fn test_chunk_operations() {
        let chunk = ExportChunk::new(vec![
            vec![Some("1".to_string()), None],
            vec![Some("2".to_string()), Some("x".to_string())],
        ]);
        assert_eq!(chunk.len(), 2);
        assert!(!chunk.is_empty());
        assert!(!chunk.is_last);

        let final_chunk = chunk.mark_final();
        assert!(final_chunk.is_last);

        let empty = ExportChunk::empty_final();
        assert!(empty.is_empty());
        assert!(empty.is_last);
    }

    #[test]
    fn test_sample_emptiness() {
        let empty = Sample {
            columns: vec![],
            rows: vec![],
        };
        assert!(empty.is_empty());

        let headered = Sample {
            columns: vec!["id".to_string()],
            rows: vec![],
        };
        assert!(!headered.is_empty());
    }
}
