//! Expected-vs-counted diffing.
//!
//! Planning is pure: it decides which lines produce an adjustment. Applying the
//! plan to the ledger, and flipping the session status, happens in one store
//! transaction in the infra layer.

use serde::{Deserialize, Serialize};

use stockroom_core::{ItemId, LocationId};

use crate::stocktaking::StocktakingLine;

/// A non-zero difference that completion will write as an adjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedAdjustment {
    pub item_id: ItemId,
    pub location_id: LocationId,
    pub expected_quantity: i64,
    pub counted_quantity: i64,
    /// counted − expected; never zero.
    pub difference: i64,
}

/// Outcome of diffing every line of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationPlan {
    pub adjustments: Vec<PlannedAdjustment>,
    /// Counted lines whose count matched the snapshot.
    pub lines_unchanged: usize,
    /// Lines nobody counted. Never treated as zero.
    pub lines_skipped_uncounted: usize,
    /// Counted lines with a difference but no resolved location.
    pub lines_skipped_unresolved: usize,
}

impl ReconciliationPlan {
    /// Saturates at `i64::MAX`.
    pub fn total_absolute_difference(&self) -> i64 {
        self.adjustments
            .iter()
            .fold(0i64, |total, a| total.saturating_add(a.difference.saturating_abs()))
    }

    pub fn summary(&self) -> CompletionSummary {
        CompletionSummary {
            lines_adjusted: self.adjustments.len(),
            total_absolute_difference: self.total_absolute_difference(),
            lines_skipped_uncounted: self.lines_skipped_uncounted,
            lines_skipped_unresolved: self.lines_skipped_unresolved,
        }
    }
}

/// Returned by completing a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionSummary {
    pub lines_adjusted: usize,
    pub total_absolute_difference: i64,
    pub lines_skipped_uncounted: usize,
    pub lines_skipped_unresolved: usize,
}

/// Read-only view of how far a count has progressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionProgress {
    pub lines_total: usize,
    pub lines_counted: usize,
    pub lines_uncounted: usize,
    /// What `complete` would write right now.
    pub pending: ReconciliationPlan,
}

impl SessionProgress {
    pub fn of(lines: &[StocktakingLine]) -> Self {
        let lines_counted = lines.iter().filter(|l| l.is_counted()).count();
        Self {
            lines_total: lines.len(),
            lines_counted,
            lines_uncounted: lines.len() - lines_counted,
            pending: plan_reconciliation(lines),
        }
    }
}

/// Diff counted against expected for every line.
pub fn plan_reconciliation(lines: &[StocktakingLine]) -> ReconciliationPlan {
    let mut plan = ReconciliationPlan::default();

    for line in lines {
        let (Some(counted), Some(difference)) = (line.counted_quantity, line.difference()) else {
            plan.lines_skipped_uncounted += 1;
            continue;
        };

        if difference == 0 {
            plan.lines_unchanged += 1;
            continue;
        }

        let Some(location_id) = line.location_id else {
            plan.lines_skipped_unresolved += 1;
            continue;
        };

        plan.adjustments.push(PlannedAdjustment {
            item_id: line.item_id,
            location_id,
            expected_quantity: line.expected_quantity,
            counted_quantity: counted,
            difference,
        });
    }

    plan
}
