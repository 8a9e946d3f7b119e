//! Source access layer for legacy Access files.
//!
//! Two trait seams isolate the pipeline from the legacy driver:
//!
//! - [`SourceDriver`]: capability probe at startup, session factory, forced
//!   restart escalation.
//! - [`SourceSession`]: per-file operations, meaning the enumeration
//!   primitives, row counting, sampling, and the two streaming export paths.
//!
//! The production implementation ([`mdbtools`]) shells out to the mdbtools
//! suite; unit tests substitute scripted fakes. The legacy layer does not
//! support concurrent sessions on one file, so a session is opened, drained
//! and closed strictly sequentially (see [`guard`]).

pub mod guard;
pub mod mdbtools;

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::{ExportChunk, Sample};
use crate::error::Result;

pub use guard::{ConnectionGuard, GuardState};
pub use mdbtools::MdbToolsDriver;

/// Options for a streaming export.
#[derive(Debug, Clone, Copy)]
pub struct ExportOptions {
    /// Rows per emitted chunk.
    pub chunk_size: usize,

    /// Stop (and log a truncation warning) after this many rows.
    pub row_ceiling: Option<u64>,
}

/// Receiving end of a chunked export.
///
/// Chunks arrive in source order; the channel is bounded, so extraction
/// blocks once the loader falls behind. The final item has `is_last` set.
pub type ChunkStream = mpsc::Receiver<Result<ExportChunk>>;

/// Identity of a usable legacy access layer, from the startup probe.
#[derive(Debug, Clone)]
pub struct DriverInfo {
    /// Access-layer name, e.g. `mdbtools`.
    pub name: String,

    /// Reported version, or `unknown` for vintages without a version flag.
    pub version: String,
}

/// Factory and lifecycle seam for the legacy driver.
#[async_trait]
pub trait SourceDriver: Send + Sync {
    /// Capability probe. Fails with `DriverUnavailable` when no compatible
    /// access layer exists on this host.
    async fn probe(&self) -> Result<DriverInfo>;

    /// Open a session on one file.
    ///
    /// Lock contention surfaces as a `Driver` error whose text names the
    /// lock; [`ConnectionGuard`] interprets it and drives the retry policy.
    async fn open(&self, path: &Path) -> Result<Box<dyn SourceSession>>;

    /// Forcibly restart the underlying driver layer.
    ///
    /// Called between the penultimate and final open attempts when a file
    /// stays locked.
    async fn restart(&self) -> Result<()>;
}

/// One open legacy database.
#[async_trait]
pub trait SourceSession: Send + Sync {
    /// Path of the underlying file.
    fn path(&self) -> &Path;

    /// Table names from the native catalog listing.
    async fn catalog_tables(&self) -> Result<Vec<String>>;

    /// Table names from the internal metadata table (`MSysObjects`).
    async fn system_object_names(&self) -> Result<Vec<String>>;

    /// Table names recovered from a schema (DDL) dump.
    async fn schema_table_names(&self) -> Result<Vec<String>>;

    /// Exact row count for one table. May be arbitrarily slow on oversized
    /// tables; callers bound it with a timeout.
    async fn count_rows(&self, table: &str) -> Result<u64>;

    /// Ordered column names plus the leading rows of a table.
    async fn sample(&self, table: &str, rows: usize) -> Result<Sample>;

    /// Stream a whole table through the fast export path.
    ///
    /// The stream carries data rows only; column order matches
    /// [`SourceSession::sample`] for the same table.
    async fn export(&self, table: &str, opts: ExportOptions) -> Result<ChunkStream>;

    /// Stream the rows produced by a SQL statement through the slow query
    /// path.
    async fn query_stream(&self, sql: &str, opts: ExportOptions) -> Result<ChunkStream>;

    /// Close the session. The guard makes this idempotent and swallows
    /// close-time faults.
    async fn close(&mut self) -> Result<()>;
}
