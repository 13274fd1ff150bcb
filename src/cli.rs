//! CLI interface for Quorum.
//!
//! Every subcommand is non-interactive: arguments in, text (or `--json`) out.
//!
//! - `quorum report new|show|list`: file and inspect reports.
//! - `quorum vote` / `quorum progress`: the two ways a report's status moves.
//! - `quorum sweep reminders|expire` / `quorum resolve`: run the background
//!   jobs by hand; `quorum tasks` shows what is queued.
//! - `quorum serve`: run the task worker and the daily sweeps until Ctrl-C.
//!
//! Report arguments take a full UUID or an unambiguous prefix.

mod format;
mod report;
mod serve;
mod sweep;
mod vote;

use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use crate::{
    clock::{Clock, SystemClock},
    config::Config,
    effects::{Effects, LogNotifier, Notifier, OutboxNotifier},
    engine::{Engine, EngineError, ErrorKind},
    model::{Report, ReportStatus, VoteType},
    storage::Storage,
    tasks::SqliteQueue,
};

use format::short_id;

/// Quorum: crowd-verified civic reports.
#[derive(Debug, Parser)]
#[command(name = "quorum", after_long_help = WORKFLOW_HELP)]
pub struct Cli {
    /// Acting user. Falls back to `QUORUM_USER`, then `user` in the config file.
    #[arg(long = "as", global = true)]
    user: Option<String>,

    /// Print JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    pub command: Command,
}

const WORKFLOW_HELP: &str = r#"Workflow: a report from filing to resolution
  1. quorum --as alice report new "Pothole on Elm St" --contact alice@example.org
     → prints a report ID (e.g. 7f3c09d2-...)
  2. quorum --as bob vote 7f3 resolved
  3. quorum --as carol vote 7f3 resolved
     → the crowd agrees: POTENTIALLY_RESOLVED, confirmation window opens
  4. quorum serve
     → resolves the report once the grace period is over

The owner can settle it directly:
  quorum --as alice progress 7f3 --status resolved --notes "Patched on Tuesday""#;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// File and inspect reports.
    Report {
        #[command(subcommand)]
        command: ReportCommand,
    },

    /// Vote on a report's status.
    ///
    /// Voting the same way twice withdraws the vote. Owners cannot vote on
    /// their own reports.
    Vote {
        /// Report ID: full UUID or unambiguous prefix.
        report: String,

        #[arg(value_enum)]
        vote: VoteArg,
    },

    /// Post an owner progress update.
    ///
    /// `--status resolved` closes the report regardless of votes.
    Progress {
        /// Report ID: full UUID or unambiguous prefix.
        report: String,

        /// The status the report should move to.
        #[arg(long, value_enum)]
        status: StatusArg,

        #[arg(long, default_value = "")]
        notes: String,

        /// Reference to an uploaded file. At most two.
        #[arg(long = "attach")]
        attachments: Vec<String>,
    },

    /// Run a daily sweep now.
    Sweep {
        #[command(subcommand)]
        sweep: SweepCommand,
    },

    /// Run the auto-resolve check for one report now.
    Resolve {
        /// Report ID: full UUID or unambiguous prefix.
        report: String,
    },

    /// List tasks waiting in the queue.
    Tasks,

    /// Run the task worker and the daily sweeps until Ctrl-C.
    Serve,
}

#[derive(Debug, Subcommand)]
pub enum ReportCommand {
    /// File a new report. Prints the report ID.
    New {
        title: String,

        /// Where status emails go.
        #[arg(long)]
        contact: Option<String>,

        /// An announcement rather than an issue: no votes, no progress.
        #[arg(long)]
        info_only: bool,
    },

    /// Show a report with its tally and progress log.
    Show {
        /// Report ID: full UUID or unambiguous prefix.
        report: String,
    },

    /// List reports.
    List {
        /// Only reports in this status.
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
    },
}

#[derive(Debug, Subcommand)]
pub enum SweepCommand {
    /// Re-arm auto-resolve and remind owners of reports awaiting confirmation.
    Reminders,

    /// Expire open reports nobody has touched in too long.
    Expire,
}

/// CLI-facing vote, mapped to the domain `VoteType`.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum VoteArg {
    Resolved,
    OnProgress,
    NotResolved,
}

impl VoteArg {
    fn to_domain(self) -> VoteType {
        match self {
            Self::Resolved => VoteType::Resolved,
            Self::OnProgress => VoteType::OnProgress,
            Self::NotResolved => VoteType::NotResolved,
        }
    }
}

/// CLI-facing status, mapped to the domain `ReportStatus`.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StatusArg {
    Waiting,
    OnProgress,
    PotentiallyResolved,
    Resolved,
    NotResolved,
    Expired,
}

impl StatusArg {
    fn to_domain(self) -> ReportStatus {
        match self {
            Self::Waiting => ReportStatus::Waiting,
            Self::OnProgress => ReportStatus::OnProgress,
            Self::PotentiallyResolved => ReportStatus::PotentiallyResolved,
            Self::Resolved => ReportStatus::Resolved,
            Self::NotResolved => ReportStatus::NotResolved,
            Self::Expired => ReportStatus::Expired,
        }
    }
}

/// Run the CLI, returning an error message on failure.
pub async fn run(config: &Config, storage: Storage) -> Result<(), String> {
    let cli = Cli::parse();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let queue = Arc::new(SqliteQueue::new(storage.clone(), Arc::clone(&clock)));
    let (effects, effects_worker) = Effects::spawn(notifier(config));
    let engine = Engine::new(
        storage.clone(),
        queue,
        effects,
        Arc::clone(&clock),
        config.settings(),
    );
    let out = Output { json: cli.json };

    let result = match cli.command {
        Command::Report { command } => match command {
            ReportCommand::New {
                title,
                contact,
                info_only,
            } => {
                let user = crate::identity::resolve_user(cli.user.as_deref(), config)?;
                report::cmd_new(&engine, out, user, title, contact, !info_only).await
            }
            ReportCommand::Show { report } => report::cmd_show(&engine, out, report).await,
            ReportCommand::List { status } => {
                report::cmd_list(&engine, out, status.map(StatusArg::to_domain)).await
            }
        },
        Command::Vote { report, vote } => {
            let user = crate::identity::resolve_user(cli.user.as_deref(), config)?;
            vote::cmd_vote(&engine, out, user, report, vote.to_domain()).await
        }
        Command::Progress {
            report,
            status,
            notes,
            attachments,
        } => {
            let user = crate::identity::resolve_user(cli.user.as_deref(), config)?;
            vote::cmd_progress(&engine, out, user, report, status.to_domain(), notes, attachments).await
        }
        Command::Sweep { sweep } => match sweep {
            SweepCommand::Reminders => sweep::cmd_reminders(&engine, out).await,
            SweepCommand::Expire => sweep::cmd_expire(&engine, out).await,
        },
        Command::Resolve { report } => sweep::cmd_resolve(&engine, report).await,
        Command::Tasks => sweep::cmd_tasks(&storage).await,
        Command::Serve => serve::run(&engine, storage, clock, config).await,
    };

    // Flush queued emails before exiting: the worker stops once the last sender is gone.
    drop(engine);
    if let Err(e) = effects_worker.await {
        tracing::error!(error = %e, "effects worker failed");
    }
    result
}

fn notifier(config: &Config) -> Arc<dyn Notifier> {
    match &config.outbox {
        Some(path) => Arc::new(OutboxNotifier::new(path)),
        None => Arc::new(LogNotifier),
    }
}

/// How command results are printed.
#[derive(Debug, Clone, Copy)]
struct Output {
    json: bool,
}

impl Output {
    /// Prints `value` as JSON, or `text` when JSON was not asked for.
    fn print<T: Serialize>(self, value: &T, text: impl FnOnce() -> String) -> Result<(), String> {
        if self.json {
            let json = serde_json::to_string_pretty(value)
                .map_err(|e| format!("failed to serialize output: {e}"))?;
            println!("{json}");
        } else {
            println!("{}", text());
        }
        Ok(())
    }
}

/// Runs a synchronous engine call on the blocking pool.
async fn blocking<T, F>(engine: &Engine, f: F) -> Result<T, String>
where
    T: Send + 'static,
    F: FnOnce(&Engine) -> Result<T, EngineError> + Send + 'static,
{
    let engine = engine.clone();
    tokio::task::spawn_blocking(move || f(&engine))
        .await
        .map_err(|e| format!("command panicked: {e}"))?
        .map_err(|e| match e.kind() {
            ErrorKind::Store | ErrorKind::Timeout => format!("{e}; nothing was changed, try again"),
            _ => e.to_string(),
        })
}

/// Resolve a report reference (full UUID or unambiguous prefix) to a report.
async fn resolve_report(engine: &Engine, reference: String) -> Result<Report, String> {
    // Try full UUID first.
    if let Ok(id) = reference.parse() {
        return blocking(engine, move |engine| engine.load_report(id)).await;
    }

    // Try as a prefix match against all reports.
    let reports = blocking(engine, Engine::list_reports).await?;
    let matches: Vec<&Report> = reports
        .iter()
        .filter(|r| r.id.to_string().starts_with(&reference))
        .collect();

    match matches.as_slice() {
        [] => Err(format!("no report matching '{reference}'")),
        [report] => Ok((*report).clone()),
        _ => {
            let ids: Vec<String> = matches.iter().map(|r| short_id(r.id)).collect();
            Err(format!(
                "'{reference}' is ambiguous: matches {} reports: {}",
                matches.len(),
                ids.join(", ")
            ))
        }
    }
}
