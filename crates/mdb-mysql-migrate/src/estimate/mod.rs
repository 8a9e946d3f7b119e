//! Table size estimation.
//!
//! Counting rows in a half-corrupt desktop file can hang for minutes, so the
//! count runs under a short wall-clock timeout. The estimate is advisory: it
//! schedules tables, picks extraction strategies and sizes ceilings, but the
//! real row count is whatever extraction ends up streaming.

use std::time::Duration;

use tracing::{debug, warn};

use crate::source::SourceSession;

/// Row count at or above which a table is treated as large.
pub const LARGE_TABLE_THRESHOLD: u64 = 100_000;

/// Assumed size when the count times out. Deliberately huge so a table that
/// would not even count gets the most conservative extraction treatment.
const TIMEOUT_FALLBACK_ROWS: u64 = 1_000_000;

/// Assumed size when the count fails outright.
const ERROR_FALLBACK_ROWS: u64 = 1_000;

/// How a row estimate was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimateBasis {
    /// The count completed.
    Counted,
    /// The count hit the wall-clock timeout.
    TimedOut,
    /// The count failed; the table may still export fine.
    Failed,
}

impl EstimateBasis {
    pub fn as_str(&self) -> &'static str {
        match self {
            EstimateBasis::Counted => "counted",
            EstimateBasis::TimedOut => "timed_out",
            EstimateBasis::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeEstimate {
    pub rows: u64,
    pub basis: EstimateBasis,
}

impl SizeEstimate {
    pub fn is_large(&self) -> bool {
        self.basis == EstimateBasis::TimedOut || self.rows >= LARGE_TABLE_THRESHOLD
    }
}

/// Estimate the row count of `table`, folding timeout and failure into
/// fallback sizes instead of errors.
pub async fn estimate_rows(
    session: &dyn SourceSession,
    table: &str,
    timeout: Duration,
) -> SizeEstimate {
    match tokio::time::timeout(timeout, session.count_rows(table)).await {
        Ok(Ok(rows)) => {
            debug!(table, rows, "row count complete");
            SizeEstimate {
                rows,
                basis: EstimateBasis::Counted,
            }
        }
        Ok(Err(e)) => {
            warn!(table, error = %e, "row count failed; assuming small table");
            SizeEstimate {
                rows: ERROR_FALLBACK_ROWS,
                basis: EstimateBasis::Failed,
            }
        }
        Err(_) => {
            warn!(
                table,
                timeout_secs = timeout.as_secs(),
                "row count timed out; treating table as large"
            );
            SizeEstimate {
                rows: TIMEOUT_FALLBACK_ROWS,
                basis: EstimateBasis::TimedOut,
            }
        }
    }
}
