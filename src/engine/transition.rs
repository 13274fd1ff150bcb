//! The vote-driven half of the status state machine.

use jiff::Timestamp;

use crate::{
    model::{Report, ReportStatus, UpdatedBy},
    tally::Tally,
};

/// A status change made by the consensus engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ReportStatus,
    pub to: ReportStatus,
}

/// Moves `report` to where the tally points, if the tally is decisive and the
/// report is still open to the crowd.
///
/// Reports that are terminal or awaiting confirmation never move here: the
/// only way out of `PotentiallyResolved` is the auto-resolve task.
pub fn apply_decision(report: &mut Report, tally: &Tally, now: Timestamp) -> Option<Transition> {
    if report.status.is_terminal() || report.status == ReportStatus::PotentiallyResolved {
        return None;
    }

    let to = tally.decision()?.status();
    if to == report.status {
        return None;
    }

    let from = report.status;
    report.status = to;
    report.last_updated_by = UpdatedBy::System;
    report.last_updated_progress_at = Some(now);
    if to == ReportStatus::PotentiallyResolved {
        report.potentially_resolved_at = Some(now);
    }
    Some(Transition { from, to })
}
