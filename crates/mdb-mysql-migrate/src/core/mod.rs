//! Core types shared by every pipeline stage.
//!
//! - [`identifier`]: sanitization and quoting for source and target SQL
//! - [`schema`]: table/column specifications, text-form rows, export chunks
//!
//! Everything here is plain data or pure functions; stages that do I/O live
//! in their own modules and depend on these types, never the other way
//! around.

pub mod identifier;
pub mod schema;

// Re-export commonly used types for convenience
pub use identifier::sanitize_identifier;
pub use schema::{ColumnSpec, ColumnType, ExportChunk, Row, Sample, TableSpec};
