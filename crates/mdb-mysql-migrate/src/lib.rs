//! # mdb-mysql-migrate
//!
//! Batch migration of legacy Microsoft Access files (`.mdb`/`.accdb`)
//! into MySQL, built on the mdbtools suite:
//!
//! - **Recursive discovery** of Access files under a source tree
//! - **Layered table enumeration** that survives damaged catalogs
//! - **Adaptive extraction**: bulk export, capped export, SQL cursor and
//!   id-range scans, tried in order until one materializes the table
//! - **Schema inference** from sampled rows, no Access metadata required
//! - **Sync planning** that skips tables already matching the target
//! - **Lock-aware retries** with driver restart escalation
//!
//! ## Example
//!
//! ```rust,no_run
//! use mdb_mysql_migrate::{Config, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> mdb_mysql_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config);
//!     let summary = orchestrator.run(CancellationToken::new()).await?;
//!     println!("Loaded {} rows", summary.rows_loaded);
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod core;
pub mod error;
pub mod estimate;
pub mod extract;
pub mod infer;
pub mod loader;
pub mod orchestrator;
pub mod planner;
pub mod progress;
pub mod source;
pub mod target;

// Re-exports for convenient access
pub use config::{Config, RunConfig, SourceConfig, TargetConfig};
pub use self::core::{ColumnSpec, ColumnType, Row, Sample, TableSpec};
pub use error::{MigrateError, Result};
pub use orchestrator::{Orchestrator, RunSummary};
pub use planner::{MigrationAction, TablePlan};
pub use source::{ConnectionGuard, MdbToolsDriver, SourceDriver, SourceSession};
pub use target::{MysqlPool, TargetWriter};
