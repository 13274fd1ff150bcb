//! Daily reconciliation sweeps.
//!
//! The task path can lose work: an enqueue can fail after its transaction
//! committed, and a task can be dropped. The sweeps converge what it missed.
//! Both sweeps treat each report on its own; one bad report is logged and
//! counted, and the sweep moves on.

use jiff::{SignedDuration, Timestamp};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    effects,
    model::{Report, ReportStatus, UpdatedBy},
    tasks::Task,
};

use super::{Engine, EngineError};

/// What a sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    /// Reports the sweep looked at.
    pub examined: usize,
    /// Reports it acted on: re-armed and reminded, or expired.
    pub acted: usize,
    pub failed: usize,
}

impl Engine {
    /// Re-arms the auto-resolve task for every report awaiting confirmation and
    /// reminds its owner how many days are left.
    pub fn sweep_potentially_resolved(&self) -> Result<SweepSummary, EngineError> {
        let now = self.clock.now();
        let reports = self
            .storage
            .read(|tx| tx.reports_with_status(&[ReportStatus::PotentiallyResolved]))?;

        let mut summary = SweepSummary::default();
        for report in &reports {
            summary.examined += 1;
            match self.rearm(report, now) {
                Ok(()) => summary.acted += 1,
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!(report_id = %report.id, error = %e, "failed to re-arm report awaiting confirmation");
                }
            }
        }

        tracing::info!(
            examined = summary.examined,
            acted = summary.acted,
            failed = summary.failed,
            "reminder sweep finished"
        );
        Ok(summary)
    }

    fn rearm(&self, report: &Report, now: Timestamp) -> Result<(), EngineError> {
        let Some(since) = report.potentially_resolved_at else {
            return Err(EngineError::Integrity {
                id: report.id,
                reason: "potentially resolved without a timestamp",
            });
        };
        let grace = self.settings.grace_period;
        let Ok(due) = since.checked_add(grace) else {
            return Err(EngineError::Integrity {
                id: report.id,
                reason: "grace period runs past the supported calendar",
            });
        };
        let delay = now.duration_until(due).max(SignedDuration::ZERO);

        self.queue.enqueue(&Task::AutoResolve { report_id: report.id }, delay)?;
        self.effects.remind(
            report,
            &self.settings.client_url,
            effects::days_remaining(since, grace, now),
        );
        Ok(())
    }

    /// Expires every `Waiting` or `OnProgress` report the system last touched
    /// longer than `expire_after` ago.
    pub fn expire_stale(&self) -> Result<SweepSummary, EngineError> {
        let now = self.clock.now();
        // Nothing predates a cutoff before the start of the calendar.
        let cutoff = now
            .checked_sub(self.settings.expire_after)
            .unwrap_or(Timestamp::MIN);
        let candidates = self
            .storage
            .read(|tx| tx.reports_with_status(&[ReportStatus::Waiting, ReportStatus::OnProgress]))?;

        let mut summary = SweepSummary {
            examined: candidates.len(),
            ..SweepSummary::default()
        };
        for report in candidates.iter().filter(|r| is_stale(r, cutoff)) {
            match self.expire(report.id, cutoff, now) {
                Ok(true) => summary.acted += 1,
                Ok(false) => {}
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!(report_id = %report.id, error = %e, "failed to expire report");
                }
            }
        }

        tracing::info!(
            examined = summary.examined,
            acted = summary.acted,
            failed = summary.failed,
            "expiration sweep finished"
        );
        Ok(summary)
    }

    /// Expires one report, re-checking staleness inside the write transaction.
    fn expire(&self, id: Uuid, cutoff: Timestamp, now: Timestamp) -> Result<bool, EngineError> {
        let expired = self.storage.write(|tx| {
            let mut report = tx.load_report(id)?;
            if !is_stale(&report, cutoff) {
                return Ok::<_, EngineError>(None);
            }
            let from = report.status;
            report.status = ReportStatus::Expired;
            report.last_updated_by = UpdatedBy::System;
            report.last_updated_progress_at = Some(now);
            tx.update_report(&report)?;
            Ok(Some(from))
        })?;

        if let Some(from) = expired {
            tracing::info!(report_id = %id, %from, "report expired");
        }
        Ok(expired.is_some())
    }
}

/// Open, last moved by the system, and untouched since before `cutoff`.
///
/// A report with no recorded update is never stale.
fn is_stale(report: &Report, cutoff: Timestamp) -> bool {
    matches!(report.status, ReportStatus::Waiting | ReportStatus::OnProgress)
        && report.last_updated_by == UpdatedBy::System
        && report
            .last_updated_progress_at
            .is_some_and(|updated| updated < cutoff)
}
