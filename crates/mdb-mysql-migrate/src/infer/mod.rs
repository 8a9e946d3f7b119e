//! Column type inference from sampled rows.
//!
//! The text export discards source type information, so target types are
//! re-derived from a bounded sample of each table. A column whose non-null
//! values all read as integers becomes the smallest integer type that holds
//! them. Float and datetime get their turn next; anything else becomes
//! sized text. Inference is deliberately one-way generous: a wrong guess
//! widens storage, never loses data.

use std::collections::HashSet;

use chrono::{NaiveDate, NaiveDateTime};

use crate::core::identifier::sanitize_identifier;
use crate::core::{ColumnSpec, ColumnType, Sample, TableSpec};
use crate::error::{MigrateError, Result};

/// Datetime renderings accepted by inference. The first is what our own
/// export requests; the rest cover dumps made by other tools.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%m/%d/%y %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%y", "%m/%d/%Y"];

/// Widest VARCHAR issued before falling back to TEXT.
const VARCHAR_CAP: u16 = 255;

/// Headroom added over the longest sampled value, since the sample rarely
/// contains the longest value in the table.
const VARCHAR_HEADROOM: u16 = 50;

/// Build a table spec for `target_table` from a sample of the source table.
///
/// Fails when the sample has no columns at all, or when two source columns
/// collapse to the same sanitized name. A collision is reported rather than
/// silently merged; losing a column is the one thing inference must never
/// do.
pub fn infer_table_spec(
    source_table: &str,
    target_table: &str,
    sample: &Sample,
) -> Result<TableSpec> {
    if sample.columns.is_empty() {
        return Err(MigrateError::inference(
            source_table,
            "sample has no columns",
        ));
    }

    let mut seen = HashSet::new();
    let mut columns = Vec::with_capacity(sample.columns.len());
    for (index, source_name) in sample.columns.iter().enumerate() {
        let mut name = sanitize_identifier(source_name);
        if name.is_empty() {
            name = format!("col_{}", index + 1);
        }
        if !seen.insert(name.clone()) {
            return Err(MigrateError::inference(
                source_table,
                format!(
                    "columns {:?} and another collapse to the same name {:?}",
                    source_name, name
                ),
            ));
        }

        let values: Vec<&str> = sample
            .rows
            .iter()
            .filter_map(|row| row.get(index).and_then(|field| field.as_deref()))
            .collect();
        columns.push(ColumnSpec {
            source_name: source_name.clone(),
            name,
            column_type: infer_column_type(&values),
        });
    }

    Ok(TableSpec {
        source_name: source_table.to_string(),
        name: target_table.to_string(),
        columns,
    })
}

/// Classify one column from its non-null sampled values.
pub fn infer_column_type(values: &[&str]) -> ColumnType {
    if values.is_empty() {
        // Nothing to go on. TEXT accepts whatever shows up later.
        return ColumnType::Text;
    }

    if let Some(max_abs) = all_integers(values) {
        return integer_type(max_abs);
    }
    if values.iter().all(|v| is_float(v)) {
        return ColumnType::Double;
    }
    if values.iter().all(|v| is_datetime(v)) {
        return ColumnType::DateTime;
    }

    let max_len = values
        .iter()
        .map(|v| v.chars().count())
        .max()
        .unwrap_or(0);
    if max_len <= VARCHAR_CAP as usize {
        let width = (max_len as u16).saturating_add(VARCHAR_HEADROOM).min(VARCHAR_CAP);
        ColumnType::VarChar(width)
    } else {
        ColumnType::Text
    }
}

/// If every value parses as an integer, the largest magnitude among them.
fn all_integers(values: &[&str]) -> Option<u64> {
    let mut max_abs: u64 = 0;
    for value in values {
        let parsed: i64 = value.trim().parse().ok()?;
        max_abs = max_abs.max(parsed.unsigned_abs());
    }
    Some(max_abs)
}

fn integer_type(max_abs: u64) -> ColumnType {
    if max_abs < 128 {
        ColumnType::TinyInt
    } else if max_abs < 32_768 {
        ColumnType::SmallInt
    } else if max_abs < 2_147_483_648 {
        ColumnType::Int
    } else {
        ColumnType::BigInt
    }
}

fn is_float(value: &str) -> bool {
    match value.trim().parse::<f64>() {
        // "inf" and "NaN" parse but are column text, not numbers
        Ok(f) => f.is_finite(),
        Err(_) => false,
    }
}

fn is_datetime(value: &str) -> bool {
    let value = value.trim();
    DATETIME_FORMATS
        .iter()
        .any(|format| NaiveDateTime::parse_from_str(value, format).is_ok())
        || DATE_FORMATS
            .iter()
            .any(|format| NaiveDate::parse_from_str(value, format).is_ok())
}
