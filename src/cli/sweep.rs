//! Background jobs, run by hand: the two sweeps and a single auto-resolve.

use crate::{
    engine::{Engine, Resolution},
    storage::Storage,
};

use super::{
    Output, blocking,
    format::{format_summary, format_task_line},
    resolve_report, short_id,
};

pub(super) async fn cmd_reminders(engine: &Engine, out: Output) -> Result<(), String> {
    let summary = blocking(engine, Engine::sweep_potentially_resolved).await?;
    out.print(&summary, || format_summary("Reminders", &summary))
}

pub(super) async fn cmd_expire(engine: &Engine, out: Output) -> Result<(), String> {
    let summary = blocking(engine, Engine::expire_stale).await?;
    out.print(&summary, || format_summary("Expiration", &summary))
}

pub(super) async fn cmd_resolve(engine: &Engine, reference: String) -> Result<(), String> {
    let report = resolve_report(engine, reference).await?;
    let id = report.id;
    let resolution = blocking(engine, move |engine| engine.auto_resolve(id)).await?;

    let short = short_id(id);
    match resolution {
        Resolution::Resolved => println!("Report {short} resolved"),
        Resolution::NotPending(status) => {
            println!("Report {short} is {status}; nothing to resolve");
        }
        Resolution::TooEarly { remaining } => {
            println!("Report {short} is still awaiting confirmation ({remaining:#} left)");
        }
    }
    Ok(())
}

pub(super) async fn cmd_tasks(storage: &Storage) -> Result<(), String> {
    let storage = storage.clone();
    let tasks = tokio::task::spawn_blocking(move || storage.read(|tx| tx.pending_tasks()))
        .await
        .map_err(|e| format!("command panicked: {e}"))?
        .map_err(|e| format!("failed to list tasks: {e}"))?;

    if tasks.is_empty() {
        println!("No tasks");
        return Ok(());
    }
    for task in &tasks {
        println!("{}", format_task_line(task));
    }
    Ok(())
}
