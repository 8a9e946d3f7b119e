//! Per-table sync planning and scheduling.
//!
//! The plan compares what the source claims to hold against what the target
//! already has and decides, table by table, whether to create, update or
//! skip. Small tables run first so a run that dies late still leaves the
//! bulk of the tables finished.

use crate::estimate::{EstimateBasis, SizeEstimate};

/// What to do with one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationAction {
    /// Target table absent: create it and load.
    Create,
    /// Target table present but out of sync: refresh schema and reload.
    Update,
    /// Source and target row counts agree: leave it alone.
    Skip,
}

impl MigrationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationAction::Create => "create",
            MigrationAction::Update => "update",
            MigrationAction::Skip => "skip",
        }
    }
}

impl std::fmt::Display for MigrationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One table's place in the run.
#[derive(Debug, Clone)]
pub struct TablePlan {
    pub source_table: String,
    /// Sanitized name in the target database.
    pub target_table: String,
    pub estimate: SizeEstimate,
    /// Row count in the target, `None` when the table does not exist there.
    pub target_rows: Option<u64>,
    pub action: MigrationAction,
}

/// Decide the action for one table.
///
/// A skip needs an actual count on the source side. Fallback estimates are
/// invented numbers; treating their accidental equality with the target as
/// "in sync" would strand stale data, so anything but a completed count
/// forces an update.
pub fn plan_action(estimate: &SizeEstimate, target_rows: Option<u64>) -> MigrationAction {
    match target_rows {
        None => MigrationAction::Create,
        Some(target) if estimate.basis == EstimateBasis::Counted && estimate.rows == target => {
            MigrationAction::Skip
        }
        Some(_) => MigrationAction::Update,
    }
}

/// Order plans for execution: ascending estimated size, name as tiebreak.
pub fn order_plans(plans: &mut [TablePlan]) {
    plans.sort_by(|a, b| {
        (a.estimate.rows, a.source_table.as_str()).cmp(&(b.estimate.rows, b.source_table.as_str()))
    });
}
