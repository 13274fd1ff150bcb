//! Report commands: new, show, list.

use serde::Serialize;

use crate::{
    engine::Engine,
    model::{NewReport, Progress, Report, ReportStatus},
    tally::Tally,
};

use super::{
    Output, blocking,
    format::{format_report, format_report_line},
    resolve_report,
};

pub(super) async fn cmd_new(
    engine: &Engine,
    out: Output,
    owner: String,
    title: String,
    contact: Option<String>,
    has_progress: bool,
) -> Result<(), String> {
    let new = NewReport {
        owner,
        title,
        contact,
        has_progress,
    };
    let report = blocking(engine, move |engine| engine.create_report(new)).await?;

    out.print(&report, || report.id.to_string())
}

/// A report as `report show --json` prints it.
#[derive(Serialize)]
struct ReportView {
    report: Report,
    tally: Tally,
    progress: Vec<Progress>,
}

pub(super) async fn cmd_show(engine: &Engine, out: Output, reference: String) -> Result<(), String> {
    let report = resolve_report(engine, reference).await?;
    let id = report.id;
    let (snapshot, progress) = blocking(engine, move |engine| {
        Ok((engine.report_status(id)?, engine.list_progress(id)?))
    })
    .await?;

    let view = ReportView {
        report,
        tally: snapshot.tally,
        progress,
    };
    out.print(&view, || format_report(&view.report, &view.tally, &view.progress))
}

pub(super) async fn cmd_list(engine: &Engine, out: Output, status: Option<ReportStatus>) -> Result<(), String> {
    let mut reports = blocking(engine, Engine::list_reports).await?;
    if let Some(status) = status {
        reports.retain(|r| r.status == status);
    }

    out.print(&reports, || {
        if reports.is_empty() {
            return "No reports".to_string();
        }
        reports
            .iter()
            .map(format_report_line)
            .collect::<Vec<_>>()
            .join("\n")
    })
}
