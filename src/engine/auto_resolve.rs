//! The auto-resolve task handler.
//!
//! Runs once the grace period after a report entered `PotentiallyResolved`
//! has passed. Every check is repeated against fresh state, so duplicate
//! deliveries and stale tasks are harmless no-ops.

use jiff::SignedDuration;
use uuid::Uuid;

use crate::{
    model::{ReportStatus, UpdatedBy},
    tasks::{Task, TaskError, TaskHandler},
};

use super::{Engine, EngineError};

/// What an auto-resolve run found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The report is now `Resolved`.
    Resolved,

    /// The report had already left `PotentiallyResolved`.
    NotPending(ReportStatus),

    /// The grace period has not run out yet.
    TooEarly { remaining: SignedDuration },
}

impl Engine {
    /// Finalizes a report whose confirmation window has closed.
    pub fn auto_resolve(&self, report_id: Uuid) -> Result<Resolution, EngineError> {
        let now = self.clock.now();
        let grace = self.settings.grace_period;

        let resolution = self.storage.write(|tx| {
            let mut report = tx.load_report(report_id)?;
            if report.status != ReportStatus::PotentiallyResolved {
                return Ok(Resolution::NotPending(report.status));
            }
            let Some(since) = report.potentially_resolved_at else {
                return Err(EngineError::Integrity {
                    id: report_id,
                    reason: "potentially resolved without a timestamp",
                });
            };

            let Ok(due) = since.checked_add(grace) else {
                return Err(EngineError::Integrity {
                    id: report_id,
                    reason: "grace period runs past the supported calendar",
                });
            };
            let remaining = now.duration_until(due);
            if remaining.is_positive() {
                return Ok(Resolution::TooEarly { remaining });
            }

            report.status = ReportStatus::Resolved;
            report.last_updated_by = UpdatedBy::System;
            report.last_updated_progress_at = Some(now);
            tx.update_report(&report)?;
            Ok(Resolution::Resolved)
        })?;

        match resolution {
            Resolution::Resolved => tracing::info!(%report_id, "report auto-resolved"),
            Resolution::NotPending(status) => {
                tracing::debug!(%report_id, %status, "report no longer awaiting confirmation; nothing to do");
            }
            Resolution::TooEarly { remaining } => {
                tracing::debug!(%report_id, %remaining, "grace period not over; nothing to do");
            }
        }
        Ok(resolution)
    }
}

impl TaskHandler for Engine {
    fn handle(&self, task: &Task) -> Result<(), TaskError> {
        match task {
            Task::AutoResolve { report_id } => {
                self.auto_resolve(*report_id)?;
                Ok(())
            }
        }
    }
}
