//! Identifier sanitization and quoting.
//!
//! Legacy Access names arrive with spaces, punctuation, mixed case, leading
//! digits and the occasional reserved word. Two concerns live here:
//!
//! 1. **Sanitization**: mapping an arbitrary source name onto a MySQL-safe
//!    identifier, deterministically, so re-runs address the same target
//!    objects.
//! 2. **Quoting**: backtick quoting for target SQL, and the set of quoting
//!    variants the legacy SQL path is retried with when a raw table
//!    reference is rejected (reserved words, embedded spaces).
//!
//! Identifiers cannot be passed as parameters in prepared statements, so
//! every dynamically built statement goes through these functions.

use crate::error::{MigrateError, Result};

/// Maximum identifier length accepted by MySQL.
const MAX_IDENTIFIER_LENGTH: usize = 64;

/// Sanitize a source identifier for use in the target database.
///
/// Deterministic and pure. ASCII alphanumerics are lowercased and kept while
/// every other character becomes `_`; a leading digit gets a `db_` prefix,
/// and the result is truncated to 64 characters. The output always matches
/// `[a-z0-9_]{1,64}` for non-empty input and never starts with a digit.
///
/// # Examples
///
/// ```
/// use mdb_mysql_migrate::core::identifier::sanitize_identifier;
///
/// assert_eq!(sanitize_identifier("Order Details"), "order_details");
/// assert_eq!(sanitize_identifier("2024 Sales"), "db_2024_sales");
/// ```
pub fn sanitize_identifier(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else {
            out.push('_');
        }
    }
    if out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert_str(0, "db_");
    }
    out.truncate(MAX_IDENTIFIER_LENGTH);
    out
}

/// Validate an identifier for security issues.
///
/// Rejects empty identifiers, identifiers containing null bytes (injection
/// vector), and identifiers exceeding what MySQL accepts.
///
/// # Errors
///
/// Returns `MigrateError::Config` with a descriptive message.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::Config(format!(
            "SECURITY: Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a MySQL identifier using backticks.
///
/// Escapes backticks by doubling them and wraps in backticks. Quoting alone
/// is injection-safe for any input; callers that need the name to actually
/// be acceptable to the server run [`validate_identifier`] first.
pub fn quote_mysql(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Qualify a MySQL table name with its database.
///
/// Returns `` `db`.`table` `` with proper quoting.
pub fn qualify_mysql(database: &str, table: &str) -> String {
    format!("{}.{}", quote_mysql(database), quote_mysql(table))
}

/// Table-reference variants for the legacy SQL path.
///
/// Jet-era drivers disagree on how a table with spaces or a reserved-word
/// name must be referenced. Returned in retry order: raw first (the common
/// case), then bracketed, double-quoted, backticked.
pub fn source_reference_variants(name: &str) -> Vec<String> {
    vec![
        name.to_string(),
        format!("[{}]", name.replace(']', "]]")),
        format!("\"{}\"", name.replace('"', "\"\"")),
        format!("`{}`", name.replace('`', "``")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    // === sanitize_identifier tests ===

    #[test]
    fn test_sanitize_plain_name() {
        assert_eq!(sanitize_identifier("Customers"), "customers");
    }

    #[test]
    fn test_sanitize_spaces_and_punctuation() {
        assert_eq!(sanitize_identifier("Order Details"), "order_details");
        assert_eq!(sanitize_identifier("Sales (2019)"), "sales__2019_");
        assert_eq!(sanitize_identifier("a.b-c/d"), "a_b_c_d");
    }

    #[test]
    fn test_sanitize_leading_digit_gets_prefix() {
        assert_eq!(sanitize_identifier("2024 Sales"), "db_2024_sales");
        assert_eq!(sanitize_identifier("1"), "db_1");
    }

    #[test]
    fn test_sanitize_non_ascii_becomes_underscore() {
        assert_eq!(sanitize_identifier("Gemälde"), "gem_lde");
        assert_eq!(sanitize_identifier("日本語"), "___");
    }

    #[test]
    fn test_sanitize_truncates_to_64() {
        let long = "x".repeat(200);
        let out = sanitize_identifier(&long);
        assert_eq!(out.len(), 64);
    }

    #[test]
    fn test_sanitize_truncates_after_prefix() {
        let long = format!("9{}", "x".repeat(200));
        let out = sanitize_identifier(&long);
        assert_eq!(out.len(), 64);
        assert!(out.starts_with("db_9"));
    }

    #[test]
    fn test_sanitize_is_pure() {
        let inputs = ["Order Details", "2024 Sales", "ümlaut", "MiXeD"];
        for input in inputs {
            assert_eq!(sanitize_identifier(input), sanitize_identifier(input));
        }
    }

    #[test]
    fn test_sanitize_output_charset() {
        let inputs = [
            "Order Details",
            "2024 Sales",
            "weird!@#$%^&*()name",
            "tab\there",
            "ümlaut-ñame",
        ];
        for input in inputs {
            let out = sanitize_identifier(input);
            assert!(!out.is_empty());
            assert!(out.len() <= 64);
            assert!(
                out.chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'),
                "bad charset in {:?}",
                out
            );
            assert!(!out.chars().next().unwrap().is_ascii_digit());
        }
    }

    // === validate_identifier tests ===

    #[test]
    fn test_validate_accepts_normal_names() {
        assert!(validate_identifier("customers").is_ok());
        assert!(validate_identifier("order_details_2024").is_ok());
    }

    #[test]
    fn test_validate_rejects_empty() {
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn test_validate_rejects_null_byte() {
        assert!(validate_identifier("tab\0le").is_err());
    }

    #[test]
    fn test_validate_rejects_overlong() {
        let long = "x".repeat(MAX_IDENTIFIER_LENGTH + 1);
        assert!(validate_identifier(&long).is_err());
    }

    // === quoting tests ===

    #[test]
    fn test_quote_mysql_plain() {
        assert_eq!(quote_mysql("users"), "`users`");
    }

    #[test]
    fn test_quote_mysql_escapes_backtick() {
        assert_eq!(quote_mysql("ta`ble"), "`ta``ble`");
    }

    #[test]
    fn test_qualify_mysql() {
        assert_eq!(
            qualify_mysql("northwind", "orders"),
            "`northwind`.`orders`"
        );
    }

    #[test]
    fn test_source_reference_variants_order() {
        let variants = source_reference_variants("Order Details");
        assert_eq!(
            variants,
            vec![
                "Order Details".to_string(),
                "[Order Details]".to_string(),
                "\"Order Details\"".to_string(),
                "`Order Details`".to_string(),
            ]
        );
    }

    #[test]
    fn test_source_reference_variants_escape_their_own_quote() {
        let variants = source_reference_variants("a]b\"c`d");
        assert_eq!(variants[1], "[a]]b\"c`d]");
        assert_eq!(variants[2], "\"a]b\"\"c`d\"");
        assert_eq!(variants[3], "`a]b\"c``d`");
    }
}
