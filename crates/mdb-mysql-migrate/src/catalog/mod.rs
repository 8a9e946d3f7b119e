//! Source discovery and table enumeration.
//!
//! Discovery walks a directory tree for legacy database files and assigns
//! each one a target database name derived from its file stem. Enumeration
//! asks an open session for its user tables, trying progressively more
//! desperate strategies until one yields results. Old files regularly have
//! damaged catalogs that defeat the native listing while the data pages are
//! still perfectly readable, which is why the fallback chain exists at all.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::core::identifier::sanitize_identifier;
use crate::error::{MigrateError, Result};
use crate::source::SourceSession;

/// File extensions that mark a migratable source database.
const SOURCE_EXTENSIONS: &[&str] = &["mdb", "accdb"];

/// Table names probed one by one when every listing strategy has failed.
/// Drawn from the names small business databases actually use.
pub const PROBE_TABLES: &[&str] = &[
    "Table1",
    "Data",
    "Main",
    "Records",
    "Items",
    "Customers",
    "Orders",
    "Products",
];

/// One discovered source file and the target database it will load into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDatabase {
    pub path: PathBuf,
    /// Sanitized, collision-free target database name.
    pub target_db: String,
}

impl SourceDatabase {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// How a table list was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumerationStrategy {
    /// Native table listing.
    Catalog,
    /// Query against the system object table.
    SystemObjects,
    /// Names scraped from a schema dump.
    SchemaDump,
    /// Probing well-known table names one by one.
    NameProbe,
}

impl EnumerationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnumerationStrategy::Catalog => "catalog",
            EnumerationStrategy::SystemObjects => "system_objects",
            EnumerationStrategy::SchemaDump => "schema_dump",
            EnumerationStrategy::NameProbe => "name_probe",
        }
    }
}

impl std::fmt::Display for EnumerationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Table list plus the strategy that produced it. `strategy` is `None` when
/// every strategy came back empty.
#[derive(Debug, Clone)]
pub struct TableEnumeration {
    pub tables: Vec<String>,
    pub strategy: Option<EnumerationStrategy>,
}

impl TableEnumeration {
    fn empty() -> Self {
        Self {
            tables: Vec::new(),
            strategy: None,
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        match self.strategy {
            Some(strategy) => strategy.as_str(),
            None => "none",
        }
    }
}

/// Walk `root` for source database files, depth first, and return them in
/// path order with unique target names.
///
/// An unreadable root is fatal; unreadable subdirectories are skipped with a
/// warning. Finding nothing is not an error.
pub fn discover(root: &Path) -> Result<Vec<SourceDatabase>> {
    let metadata = std::fs::metadata(root)
        .map_err(|e| MigrateError::discovery(root, format!("cannot read root: {}", e)))?;
    if !metadata.is_dir() {
        return Err(MigrateError::discovery(root, "not a directory"));
    }

    let mut paths = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(MigrateError::discovery(root, e.to_string()));
            }
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if entry.file_type().is_file() && is_source_extension(entry.path()) {
            paths.push(entry.into_path());
        }
    }
    paths.sort();

    let mut taken = HashSet::new();
    let databases: Vec<SourceDatabase> = paths
        .into_iter()
        .map(|path| {
            let stem = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            let target_db = unique_name(&sanitize_identifier(&stem), &mut taken);
            SourceDatabase { path, target_db }
        })
        .collect();

    for db in &databases {
        debug!(path = %db.path.display(), target_db = %db.target_db, "discovered source database");
    }
    info!(root = %root.display(), found = databases.len(), "source discovery complete");
    Ok(databases)
}

fn is_source_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            SOURCE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// System and temporary tables that must never be migrated.
pub fn is_system_table(name: &str) -> bool {
    name.starts_with("MSys") || name.starts_with('~') || name.starts_with("TEMP")
}

fn unique_name(base: &str, taken: &mut HashSet<String>) -> String {
    if taken.insert(base.to_string()) {
        return base.to_string();
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}_{}", base, n);
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// List the user tables of an open session.
///
/// Strategies run in order of fidelity; the first one that yields at least
/// one user table wins. Strategy failures are logged and skipped, so a
/// damaged catalog degrades to the next strategy instead of failing the
/// database.
pub async fn enumerate_tables(session: &dyn SourceSession) -> Result<TableEnumeration> {
    let listings: [(EnumerationStrategy, Result<Vec<String>>); 3] = [
        (
            EnumerationStrategy::Catalog,
            session.catalog_tables().await,
        ),
        (
            EnumerationStrategy::SystemObjects,
            session.system_object_names().await,
        ),
        (
            EnumerationStrategy::SchemaDump,
            session.schema_table_names().await,
        ),
    ];

    for (strategy, listing) in listings {
        match listing {
            Ok(names) => {
                let tables: Vec<String> = names
                    .into_iter()
                    .filter(|name| !is_system_table(name))
                    .collect();
                if !tables.is_empty() {
                    debug!(
                        path = %session.path().display(),
                        strategy = %strategy,
                        tables = tables.len(),
                        "table enumeration succeeded"
                    );
                    return Ok(TableEnumeration {
                        tables,
                        strategy: Some(strategy),
                    });
                }
            }
            Err(e) => {
                debug!(
                    path = %session.path().display(),
                    strategy = %strategy,
                    error = %e,
                    "table enumeration strategy failed; trying next"
                );
            }
        }
    }

    // Last resort: probe for well-known names. A successful count proves the
    // table exists even when nothing will list it.
    let mut tables = Vec::new();
    for name in PROBE_TABLES {
        if session.count_rows(name).await.is_ok() {
            tables.push(name.to_string());
        }
    }
    if tables.is_empty() {
        warn!(
            path = %session.path().display(),
            "no user tables found by any strategy"
        );
        return Ok(TableEnumeration::empty());
    }
    Ok(TableEnumeration {
        tables,
        strategy: Some(EnumerationStrategy::NameProbe),
    })
}
