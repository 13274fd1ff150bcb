//! Status-moving commands: vote and progress.

use crate::{
    engine::Engine,
    model::{ReportStatus, VoteType},
};

use super::{Output, blocking, format::format_tally, resolve_report, short_id};

pub(super) async fn cmd_vote(
    engine: &Engine,
    out: Output,
    user: String,
    reference: String,
    vote_type: VoteType,
) -> Result<(), String> {
    let report = resolve_report(engine, reference).await?;
    let id = report.id;
    let outcome = blocking(engine, move |engine| engine.cast_vote(&user, id, vote_type)).await?;

    out.print(&outcome, || {
        let action = match &outcome.vote {
            Some(vote) => format!("Voted {} on {}", vote.vote_type, short_id(id)),
            None => format!("Withdrew vote on {}", short_id(id)),
        };
        let moved = if outcome.status == report.status {
            String::new()
        } else {
            format!(" (was {})", report.status)
        };
        format!(
            "{action}\nStatus:  {}{moved}\nVotes:   {}",
            outcome.status,
            format_tally(&outcome.tally)
        )
    })
}

pub(super) async fn cmd_progress(
    engine: &Engine,
    out: Output,
    user: String,
    reference: String,
    proposal: ReportStatus,
    notes: String,
    attachments: Vec<String>,
) -> Result<(), String> {
    let report = resolve_report(engine, reference).await?;
    let id = report.id;
    let progress = blocking(engine, move |engine| {
        engine.upload_progress(&user, id, proposal, &notes, attachments)
    })
    .await?;

    out.print(&progress, || {
        format!(
            "Progress {} posted\nStatus:  {} (was {})",
            short_id(progress.id),
            progress.status,
            report.status
        )
    })
}
