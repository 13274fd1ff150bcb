//! Output formatting for CLI display.

use uuid::Uuid;

use crate::{
    engine::SweepSummary,
    model::{Progress, Report, VoteType},
    storage::QueuedTask,
    tally::Tally,
};

pub(super) fn short_id(id: Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// One line per report: `7f3c09d2  [WAITING]  Pothole on Elm St`.
pub(super) fn format_report_line(report: &Report) -> String {
    let info = if report.has_progress { "" } else { "  (info)" };
    format!(
        "{}  [{}]  {}{info}",
        short_id(report.id),
        report.status,
        report.title
    )
}

/// `RESOLVED 3 · ON_PROGRESS 1 · NOT_RESOLVED 1 (margin 40.0%)`
pub(super) fn format_tally(tally: &Tally) -> String {
    let counts = VoteType::PRIORITY
        .iter()
        .map(|&vote_type| format!("{vote_type} {}", tally.count(vote_type)))
        .collect::<Vec<_>>()
        .join(" · ");
    match tally.margin_pct() {
        Some(margin) => format!("{counts} (margin {margin:.1}%)"),
        None => format!("{counts} (no votes)"),
    }
}

pub(super) fn format_report(report: &Report, tally: &Tally, progress: &[Progress]) -> String {
    let updated = report
        .last_updated_progress_at
        .map_or_else(|| "never".to_string(), |t| t.to_string());
    let mut lines = vec![
        format!("{}  {}", report.id, report.title),
        format!("Owner:   {}", report.owner),
        format!("Status:  {} (by {}, {updated})", report.status, report.last_updated_by),
    ];
    if let Some(since) = report.potentially_resolved_at {
        lines.push(format!("Awaiting confirmation since {since}"));
    }
    if report.admin_override {
        lines.push("Closed by the owner".to_string());
    }

    if report.has_progress {
        lines.push(format!("Votes:   {}", format_tally(tally)));
        if let Some(leading) = tally.majority() {
            let decisive = if tally.decision().is_some() { " (decisive)" } else { "" };
            lines.push(format!("Leading: {leading}{decisive}"));
        }
    } else {
        lines.push("Information only: no votes or progress".to_string());
    }

    lines.extend(progress.iter().map(format_progress_line));
    lines.join("\n")
}

fn format_progress_line(entry: &Progress) -> String {
    let line = format!(
        "  {}  {}  {}",
        entry.created_at.strftime("%Y-%m-%d %H:%M"),
        entry.status,
        entry.notes
    );
    if entry.attachments.is_empty() {
        line
    } else {
        format!("{line} [{}]", entry.attachments.join(", "))
    }
}

/// `report:auto-resolve  7f3c09d2-...  due 2026-03-01T11:00:00Z  (attempt 2: database is locked)`
pub(super) fn format_task_line(task: &QueuedTask) -> String {
    let line = format!("{}  {}  due {}", task.kind, task.key, task.run_at);
    match (task.attempts, &task.last_error) {
        (0, _) => line,
        (attempts, Some(error)) => format!("{line}  (attempt {attempts}: {error})"),
        (attempts, None) => format!("{line}  (attempt {attempts})"),
    }
}

pub(super) fn format_summary(what: &str, summary: &SweepSummary) -> String {
    format!(
        "{what}: examined {}, acted on {}, failed {}",
        summary.examined, summary.acted, summary.failed
    )
}
