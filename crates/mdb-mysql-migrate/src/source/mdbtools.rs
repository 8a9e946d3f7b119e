//! mdbtools-backed implementation of the source traits.
//!
//! Every operation shells out to one of the suite's tools:
//!
//! | operation              | tool         |
//! |------------------------|--------------|
//! | probe / restart        | `mdb-export --version` |
//! | open (validate file)   | `mdb-ver`    |
//! | catalog_tables         | `mdb-tables` |
//! | system_object_names    | `mdb-sql` against `MSysObjects` |
//! | schema_table_names     | `mdb-schema` |
//! | count_rows             | `mdb-count`  |
//! | sample / export        | `mdb-export` |
//! | query_stream           | `mdb-sql`    |
//!
//! # Wire format
//!
//! `mdb-export` is driven with quote-all (`-Q`), backslash escapes (`-X`),
//! the ASCII unit separator as field delimiter and the ASCII record
//! separator as row delimiter, so embedded commas, quotes and newlines never
//! corrupt record framing. With quote interpretation disabled on the reader,
//! an unquoted empty field is NULL and a quoted empty field is the empty
//! string, the one framing that lets NULL round-trip losslessly through a
//! text export.
//!
//! The `mdb-sql` path has no quoting at all; there an empty field decodes to
//! NULL, which matches how Jet stores "no value" for the zero-length-string
//! case that path is a fallback for.
//!
//! Small lookups run through `tokio::process`; the two row streams run the
//! child synchronously on a blocking task feeding a bounded channel, so the
//! pipeline suspends only at I/O boundaries.

use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::core::{ExportChunk, Row, Sample};
use crate::error::{MigrateError, Result};

use super::{ChunkStream, DriverInfo, ExportOptions, SourceDriver, SourceSession};

/// Field delimiter for the export wire format (ASCII unit separator).
const FIELD_DELIMITER: u8 = 0x1f;

/// Row delimiter for the export wire format (ASCII record separator).
const ROW_DELIMITER: u8 = 0x1e;

/// Datetime rendering requested from the export tool; must stay parseable
/// by the loader's datetime formats.
const EXPORT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Chunks buffered between the export child and the consumer.
const STREAM_BUFFER: usize = 4;

fn delimiter_arg() -> String {
    (FIELD_DELIMITER as char).to_string()
}

fn row_delimiter_arg() -> String {
    (ROW_DELIMITER as char).to_string()
}

/// Driver for the mdbtools suite.
///
/// Probes once and caches the result; [`SourceDriver::restart`] drops the
/// cache and re-verifies the toolchain.
pub struct MdbToolsDriver {
    info: Mutex<Option<DriverInfo>>,
}

impl MdbToolsDriver {
    pub fn new() -> Self {
        Self {
            info: Mutex::new(None),
        }
    }

    async fn run_probe() -> Result<DriverInfo> {
        match Command::new("mdb-export").arg("--version").output().await {
            Ok(output) => Ok(DriverInfo {
                name: "mdbtools".to_string(),
                version: parse_version(&output.stdout, &output.stderr),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(MigrateError::DriverUnavailable(
                    "mdbtools not found on PATH. \
                     Debian/Ubuntu: apt install mdbtools. \
                     Fedora: dnf install mdbtools. \
                     macOS: brew install mdbtools."
                        .to_string(),
                ))
            }
            Err(e) => Err(MigrateError::DriverUnavailable(format!(
                "mdbtools probe failed: {}",
                e
            ))),
        }
    }
}

impl Default for MdbToolsDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceDriver for MdbToolsDriver {
    async fn probe(&self) -> Result<DriverInfo> {
        let mut cached = self.info.lock().await;
        if let Some(info) = cached.as_ref() {
            return Ok(info.clone());
        }
        let info = Self::run_probe().await?;
        debug!(
            name = %info.name,
            version = %info.version,
            "legacy driver probe succeeded"
        );
        *cached = Some(info.clone());
        Ok(info)
    }

    async fn open(&self, path: &Path) -> Result<Box<dyn SourceSession>> {
        self.probe().await?;

        // mdb-ver both validates that the driver can read the file and
        // reports its Jet/ACE vintage.
        let output = Command::new("mdb-ver")
            .arg(path)
            .output()
            .await
            .map_err(|e| spawn_error("mdb-ver", &e))?;
        if !output.status.success() {
            // Wording matters: the guard sniffs error text for lock markers,
            // so the fixed part of this message must stay neutral and let
            // the tool's own stderr carry any lock indication.
            return Err(MigrateError::Driver(format!(
                "cannot read {}: {}",
                path.display(),
                stderr_text(&output.stderr)
            )));
        }
        let format = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(path = %path.display(), format = %format, "opened source database");

        Ok(Box::new(MdbToolsSession {
            path: path.to_path_buf(),
            format,
        }))
    }

    async fn restart(&self) -> Result<()> {
        // Per-call child processes hold no state between invocations, so a
        // restart re-verifies the toolchain and gives the OS a beat to
        // release file handles a killed export may still hold.
        self.info.lock().await.take();
        tokio::time::sleep(Duration::from_millis(500)).await;
        self.probe().await.map(|_| ())
    }
}

/// One open file, addressed through per-call tool invocations.
struct MdbToolsSession {
    path: PathBuf,
    #[allow(dead_code)]
    format: String,
}

impl MdbToolsSession {
    async fn query_once(&self, sql: &str) -> Result<Vec<Row>> {
        let mut child = sql_command(&self.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error("mdb-sql", &e))?;

        {
            use tokio::io::AsyncWriteExt;
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| MigrateError::Driver("mdb-sql stdin unavailable".to_string()))?;
            stdin.write_all(sql.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            // dropping stdin sends EOF and starts execution
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(MigrateError::Driver(format!(
                "mdb-sql failed on {}: {}",
                self.path.display(),
                stderr_text(&output.stderr)
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .filter(|line| !line.is_empty())
            .map(parse_sql_line)
            .collect())
    }
}

fn sql_command(path: &Path) -> Command {
    let mut cmd = Command::new("mdb-sql");
    cmd.arg("-H")
        .arg("-F")
        .arg("-d")
        .arg(delimiter_arg())
        .arg(path);
    cmd
}

fn export_command(path: &Path, table: &str) -> std::process::Command {
    let mut cmd = std::process::Command::new("mdb-export");
    cmd.arg("-Q")
        .arg("-X")
        .arg("\\")
        .arg("-d")
        .arg(delimiter_arg())
        .arg("-R")
        .arg(row_delimiter_arg())
        .arg("-D")
        .arg(EXPORT_DATE_FORMAT)
        .arg(path)
        .arg(table);
    cmd
}

fn blocking_sql_command(path: &Path) -> std::process::Command {
    let mut cmd = std::process::Command::new("mdb-sql");
    cmd.arg("-H")
        .arg("-F")
        .arg("-d")
        .arg(delimiter_arg())
        .arg(path);
    cmd
}

#[async_trait]
impl SourceSession for MdbToolsSession {
    fn path(&self) -> &Path {
        &self.path
    }

    async fn catalog_tables(&self) -> Result<Vec<String>> {
        let output = Command::new("mdb-tables")
            .arg("-1")
            .arg(&self.path)
            .output()
            .await
            .map_err(|e| spawn_error("mdb-tables", &e))?;
        if !output.status.success() {
            return Err(MigrateError::Driver(format!(
                "mdb-tables failed on {}: {}",
                self.path.display(),
                stderr_text(&output.stderr)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn system_object_names(&self) -> Result<Vec<String>> {
        let rows = self
            .query_once("SELECT Name FROM MSysObjects WHERE Type = 1 AND Flags = 0")
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_iter().next().flatten())
            .collect())
    }

    async fn schema_table_names(&self) -> Result<Vec<String>> {
        let output = Command::new("mdb-schema")
            .arg(&self.path)
            .output()
            .await
            .map_err(|e| spawn_error("mdb-schema", &e))?;
        if !output.status.success() {
            return Err(MigrateError::Driver(format!(
                "mdb-schema failed on {}: {}",
                self.path.display(),
                stderr_text(&output.stderr)
            )));
        }
        Ok(parse_schema_tables(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn count_rows(&self, table: &str) -> Result<u64> {
        let output = Command::new("mdb-count")
            .arg(&self.path)
            .arg(table)
            .output()
            .await
            .map_err(|e| spawn_error("mdb-count", &e))?;
        if !output.status.success() {
            return Err(MigrateError::Driver(format!(
                "mdb-count failed for {} in {}: {}",
                table,
                self.path.display(),
                stderr_text(&output.stderr)
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_count(&stdout).ok_or_else(|| {
            MigrateError::Driver(format!(
                "mdb-count returned no number for {}: {:?}",
                table,
                stdout.trim()
            ))
        })
    }

    async fn sample(&self, table: &str, rows: usize) -> Result<Sample> {
        let cmd = export_command(&self.path, table);
        let label = table.to_string();
        tokio::task::spawn_blocking(move || run_sample(cmd, rows, &label))
            .await
            .map_err(|e| MigrateError::Driver(format!("sample worker failed: {}", e)))?
    }

    async fn export(&self, table: &str, opts: ExportOptions) -> Result<ChunkStream> {
        let cmd = export_command(&self.path, table);
        let label = table.to_string();
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::task::spawn_blocking(move || {
            if let Err(e) = run_export_loop(cmd, opts, &label, &tx) {
                let _ = tx.blocking_send(Err(e));
            }
        });
        Ok(rx)
    }

    async fn query_stream(&self, sql: &str, opts: ExportOptions) -> Result<ChunkStream> {
        let cmd = blocking_sql_command(&self.path);
        let sql = sql.to_string();
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::task::spawn_blocking(move || {
            if let Err(e) = run_query_loop(cmd, &sql, opts, &tx) {
                let _ = tx.blocking_send(Err(e));
            }
        });
        Ok(rx)
    }

    async fn close(&mut self) -> Result<()> {
        debug!(path = %self.path.display(), "closed source database");
        Ok(())
    }
}

/// Synchronous export loop. Runs on a blocking task.
fn run_export_loop(
    mut cmd: std::process::Command,
    opts: ExportOptions,
    label: &str,
    tx: &mpsc::Sender<Result<ExportChunk>>,
) -> Result<()> {
    let mut child = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_error("mdb-export", &e))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| MigrateError::Driver("mdb-export stdout unavailable".to_string()))?;
    let mut stderr = child.stderr.take();

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(FIELD_DELIMITER)
        .terminator(csv::Terminator::Any(ROW_DELIMITER))
        .quoting(false)
        .flexible(true)
        .has_headers(false)
        .from_reader(BufReader::new(stdout));

    let mut rows: Vec<Row> = Vec::with_capacity(opts.chunk_size);
    let mut seen: u64 = 0;
    let mut truncated = false;
    let mut header_skipped = false;

    for record in reader.records() {
        let record =
            record.map_err(|e| MigrateError::Driver(format!("export stream for {}: {}", label, e)))?;
        if !header_skipped {
            // Column order comes from sample(); the stream carries data only.
            header_skipped = true;
            continue;
        }
        rows.push(decode_record(&record));
        seen += 1;

        if rows.len() >= opts.chunk_size {
            let chunk = ExportChunk::new(std::mem::replace(
                &mut rows,
                Vec::with_capacity(opts.chunk_size),
            ));
            if tx.blocking_send(Ok(chunk)).is_err() {
                // receiver dropped: pipeline teardown
                let _ = child.kill();
                let _ = child.wait();
                return Ok(());
            }
        }
        if let Some(ceiling) = opts.row_ceiling {
            if seen >= ceiling {
                truncated = true;
                break;
            }
        }
    }

    if truncated {
        warn!(
            table = %label,
            rows = seen,
            "row ceiling reached; export truncated"
        );
        let _ = child.kill();
    }
    let status = child.wait()?;
    if !truncated && !status.success() {
        return Err(MigrateError::Driver(format!(
            "mdb-export exited with {} for {}: {}",
            status,
            label,
            drain_stderr(&mut stderr)
        )));
    }

    let _ = tx.blocking_send(Ok(ExportChunk { rows, is_last: true }));
    Ok(())
}

/// Synchronous query loop for the mdb-sql path. Runs on a blocking task.
fn run_query_loop(
    mut cmd: std::process::Command,
    sql: &str,
    opts: ExportOptions,
    tx: &mpsc::Sender<Result<ExportChunk>>,
) -> Result<()> {
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_error("mdb-sql", &e))?;

    {
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| MigrateError::Driver("mdb-sql stdin unavailable".to_string()))?;
        stdin.write_all(sql.as_bytes())?;
        stdin.write_all(b"\n")?;
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| MigrateError::Driver("mdb-sql stdout unavailable".to_string()))?;
    let mut stderr = child.stderr.take();

    let mut rows: Vec<Row> = Vec::with_capacity(opts.chunk_size);
    let mut seen: u64 = 0;
    let mut truncated = false;

    for line in BufReader::new(stdout).lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        rows.push(parse_sql_line(&line));
        seen += 1;

        if rows.len() >= opts.chunk_size {
            let chunk = ExportChunk::new(std::mem::replace(
                &mut rows,
                Vec::with_capacity(opts.chunk_size),
            ));
            if tx.blocking_send(Ok(chunk)).is_err() {
                let _ = child.kill();
                let _ = child.wait();
                return Ok(());
            }
        }
        if let Some(ceiling) = opts.row_ceiling {
            if seen >= ceiling {
                truncated = true;
                break;
            }
        }
    }

    if truncated {
        warn!(sql = %sql, rows = seen, "row ceiling reached; query truncated");
        let _ = child.kill();
    }
    let status = child.wait()?;
    let detail = drain_stderr(&mut stderr);
    if !truncated && !status.success() {
        return Err(MigrateError::Driver(format!(
            "mdb-sql exited with {}: {}",
            status, detail
        )));
    }
    // mdb-sql reports some failures only on stderr and still exits zero
    if seen == 0 && detail != "(no error output)" {
        return Err(MigrateError::Driver(format!("mdb-sql: {}", detail)));
    }

    let _ = tx.blocking_send(Ok(ExportChunk { rows, is_last: true }));
    Ok(())
}

/// Synchronous sample read: header record plus up to `limit` rows.
fn run_sample(mut cmd: std::process::Command, limit: usize, label: &str) -> Result<Sample> {
    let mut child = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_error("mdb-export", &e))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| MigrateError::Driver("mdb-export stdout unavailable".to_string()))?;
    let mut stderr = child.stderr.take();

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(FIELD_DELIMITER)
        .terminator(csv::Terminator::Any(ROW_DELIMITER))
        .quoting(false)
        .flexible(true)
        .has_headers(false)
        .from_reader(BufReader::new(stdout));

    let mut columns: Vec<String> = Vec::new();
    let mut rows: Vec<Row> = Vec::new();
    let mut complete = true;

    for record in reader.records() {
        let record =
            record.map_err(|e| MigrateError::Driver(format!("sample stream for {}: {}", label, e)))?;
        if columns.is_empty() {
            columns = record
                .iter()
                .map(|field| decode_csv_field(field).unwrap_or_default())
                .collect();
            continue;
        }
        rows.push(decode_record(&record));
        if rows.len() >= limit {
            complete = false;
            break;
        }
    }

    if complete {
        let status = child.wait()?;
        if !status.success() {
            return Err(MigrateError::Driver(format!(
                "mdb-export exited with {} while sampling {}: {}",
                status,
                label,
                drain_stderr(&mut stderr)
            )));
        }
    } else {
        let _ = child.kill();
        let _ = child.wait();
    }

    Ok(Sample { columns, rows })
}

fn decode_record(record: &csv::StringRecord) -> Row {
    record.iter().map(decode_csv_field).collect()
}

/// Decode one raw export field.
///
/// With quote interpretation disabled, quoted fields keep their quotes:
/// empty = NULL, `""` = empty string, `"x"` = text, bare = numeric/date
/// literal.
fn decode_csv_field(raw: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        return Some(unescape_quoted(&raw[1..raw.len() - 1]));
    }
    Some(raw.to_string())
}

fn unescape_quoted(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next) => out.push(next),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Split one mdb-sql output line into a row. No quoting on this path; an
/// empty field decodes to NULL.
fn parse_sql_line(line: &str) -> Row {
    line.split(FIELD_DELIMITER as char)
        .map(|field| {
            let field = field.trim();
            if field.is_empty() {
                None
            } else {
                Some(field.to_string())
            }
        })
        .collect()
}

/// Pull table names out of a schema (DDL) dump.
fn parse_schema_tables(ddl: &str) -> Vec<String> {
    let mut names = Vec::new();
    for line in ddl.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix("CREATE TABLE ") else {
            continue;
        };
        let name = if let Some(bracketed) = rest.strip_prefix('[') {
            bracketed.split(']').next().unwrap_or_default().to_string()
        } else {
            rest.split('(')
                .next()
                .unwrap_or_default()
                .trim()
                .trim_matches('"')
                .to_string()
        };
        if !name.is_empty() {
            names.push(name);
        }
    }
    names
}

fn parse_count(stdout: &str) -> Option<u64> {
    stdout.split_whitespace().next()?.parse().ok()
}

fn parse_version(stdout: &[u8], stderr: &[u8]) -> String {
    let pick = |bytes: &[u8]| -> Option<String> {
        String::from_utf8_lossy(bytes)
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
    };
    pick(stdout)
        .or_else(|| pick(stderr))
        .unwrap_or_else(|| "unknown".to_string())
}

fn stderr_text(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes).trim().to_string();
    if text.is_empty() {
        "(no error output)".to_string()
    } else {
        text
    }
}

fn drain_stderr(stderr: &mut Option<std::process::ChildStderr>) -> String {
    let mut buf = String::new();
    if let Some(handle) = stderr.as_mut() {
        let _ = handle.read_to_string(&mut buf);
    }
    let trimmed = buf.trim();
    if trimmed.is_empty() {
        "(no error output)".to_string()
    } else {
        trimmed.to_string()
    }
}

fn spawn_error(tool: &str, e: &std::io::Error) -> MigrateError {
    if e.kind() == std::io::ErrorKind::NotFound {
        MigrateError::DriverUnavailable(format!("{} not found on PATH", tool))
    } else {
        MigrateError::Driver(format!("{} failed to start: {}", tool, e))
    }
}
