//! The status transition controller: every status-changing operation on a report.
//!
//! Votes and progress uploads run as one write transaction each. The vote path
//! writes the vote, rebuilds the tally from every current vote, and applies the
//! tally's decision before committing, so the tally a caller sees is the tally
//! the decision was made on. Side effects (the auto-resolve task and the
//! reminder email) are issued only after the commit, and their failures are
//! logged rather than returned.
//!
//! Guards are checked twice: once against a read snapshot, so a rejected call
//! never takes the write lock, and again inside the write transaction, where
//! they are authoritative.

mod auto_resolve;
mod error;
mod sweep;
mod transition;

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use jiff::{SignedDuration, Timestamp};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    clock::Clock,
    effects::{self, Effects},
    model::{MAX_ATTACHMENTS, NewReport, Progress, Report, ReportStatus, UpdatedBy, Vote, VoteType},
    storage::Storage,
    tally::Tally,
    tasks::{Task, TaskQueue},
};

pub use auto_resolve::Resolution;
pub use error::{EngineError, ErrorKind};
pub use sweep::SweepSummary;
use transition::apply_decision;

/// Tunables for the report lifecycle.
#[derive(Debug, Clone)]
pub struct Settings {
    /// How long a report waits in `PotentiallyResolved` before it resolves.
    pub grace_period: SignedDuration,

    /// How long a `Waiting` or `OnProgress` report may sit untouched before it expires.
    pub expire_after: SignedDuration,

    /// Budget for a caller-facing operation, measured up to its commit.
    pub op_timeout: Duration,

    /// Base URL of the client app, for links in emails.
    pub client_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            grace_period: SignedDuration::from_hours(7 * 24),
            expire_after: SignedDuration::from_hours(30 * 24),
            op_timeout: Duration::from_secs(5),
            client_url: "http://localhost:3000".to_string(),
        }
    }
}

/// The result of a vote: what the user's vote is now, and where the report stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteOutcome {
    /// `None` when the call withdrew the user's vote.
    pub vote: Option<Vote>,
    pub status: ReportStatus,
    pub tally: Tally,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub status: ReportStatus,
    pub tally: Tally,
}

#[derive(Clone)]
pub struct Engine {
    storage: Storage,
    queue: Arc<dyn TaskQueue>,
    effects: Effects,
    clock: Arc<dyn Clock>,
    settings: Settings,
}

impl Engine {
    pub fn new(
        storage: Storage,
        queue: Arc<dyn TaskQueue>,
        effects: Effects,
        clock: Arc<dyn Clock>,
        settings: Settings,
    ) -> Self {
        Self {
            storage,
            queue,
            effects,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Files a new report in `Waiting`.
    pub fn create_report(&self, new: NewReport) -> Result<Report, EngineError> {
        if new.owner.trim().is_empty() {
            return Err(EngineError::MissingField("owner"));
        }
        if new.title.trim().is_empty() {
            return Err(EngineError::MissingField("title"));
        }

        let report = Report::file(new, self.clock.now());
        self.storage.write(|tx| tx.insert_report(&report))?;
        tracing::info!(report_id = %report.id, owner = %report.owner, has_progress = report.has_progress, "report filed");
        Ok(report)
    }

    pub fn load_report(&self, id: Uuid) -> Result<Report, EngineError> {
        Ok(self.storage.read(|tx| tx.load_report(id))?)
    }

    pub fn list_reports(&self) -> Result<Vec<Report>, EngineError> {
        Ok(self.storage.read(|tx| tx.list_reports())?)
    }

    /// A report's progress log, oldest first.
    pub fn list_progress(&self, id: Uuid) -> Result<Vec<Progress>, EngineError> {
        self.storage.read(|tx| {
            tx.load_report(id)?;
            Ok(tx.progress_for(id)?)
        })
    }

    /// The report's status together with the tally it was decided on.
    pub fn report_status(&self, id: Uuid) -> Result<StatusSnapshot, EngineError> {
        self.storage.read(|tx| {
            let report = tx.load_report(id)?;
            let tally = Tally::from_votes(&tx.votes_for(id)?);
            Ok(StatusSnapshot {
                status: report.status,
                tally,
            })
        })
    }

    /// Records `user`'s vote on a report and applies the crowd's decision.
    ///
    /// Voting the same type again withdraws the vote; a different type replaces it.
    pub fn cast_vote(&self, user: &str, report_id: Uuid, vote_type: VoteType) -> Result<VoteOutcome, EngineError> {
        let deadline = self.deadline();
        let now = self.clock.now();

        let snapshot = self.storage.read(|tx| tx.load_report(report_id))?;
        check_votable(&snapshot, user)?;

        let (outcome, transition, report) = self.storage.write(|tx| {
            let mut report = tx.load_report(report_id)?;
            check_votable(&report, user)?;

            let vote = match tx.load_vote(report_id, user)? {
                Some(existing) if existing.vote_type == vote_type => {
                    tx.delete_vote(report_id, user)?;
                    None
                }
                Some(mut existing) => {
                    existing.vote_type = vote_type;
                    existing.updated_at = now;
                    tx.put_vote(&existing)?;
                    Some(existing)
                }
                None => {
                    let vote = Vote::new(report_id, user, vote_type, now);
                    tx.put_vote(&vote)?;
                    Some(vote)
                }
            };

            let tally = Tally::from_votes(&tx.votes_for(report_id)?);
            let transition = apply_decision(&mut report, &tally, now);
            if transition.is_some() {
                tx.update_report(&report)?;
            }

            deadline.check()?;
            let outcome = VoteOutcome {
                vote,
                status: report.status,
                tally,
            };
            Ok::<_, EngineError>((outcome, transition, report))
        })?;

        match &outcome.vote {
            Some(vote) => tracing::info!(%report_id, user, vote = %vote.vote_type, "vote recorded"),
            None => tracing::info!(%report_id, user, "vote withdrawn"),
        }
        if let Some(transition) = transition {
            tracing::info!(%report_id, from = %transition.from, to = %transition.to, "status changed by vote");
            if transition.to == ReportStatus::PotentiallyResolved {
                self.awaiting_confirmation(&report, now);
            }
        }
        Ok(outcome)
    }

    /// Appends an owner progress entry and moves the report to the proposed status.
    ///
    /// A `Resolved` proposal finalizes the report immediately, whatever the crowd says.
    pub fn upload_progress(
        &self,
        user: &str,
        report_id: Uuid,
        proposal: ReportStatus,
        notes: &str,
        attachments: Vec<String>,
    ) -> Result<Progress, EngineError> {
        if attachments.len() > MAX_ATTACHMENTS {
            return Err(EngineError::TooManyAttachments(attachments.len()));
        }
        if !proposal.is_progress_proposal() {
            return Err(EngineError::InvalidProposal(proposal));
        }

        let deadline = self.deadline();
        let now = self.clock.now();

        let snapshot = self.storage.read(|tx| tx.load_report(report_id))?;
        check_uploadable(&snapshot, user, proposal)?;

        let progress = Progress {
            id: Uuid::new_v4(),
            report_id,
            author: user.to_string(),
            status: proposal,
            notes: notes.to_string(),
            attachments,
            created_at: now,
        };

        let from = self.storage.write(|tx| {
            let mut report = tx.load_report(report_id)?;
            check_uploadable(&report, user, proposal)?;
            let from = report.status;

            tx.append_progress(&progress)?;
            report.status = proposal;
            report.last_updated_by = UpdatedBy::Owner;
            report.last_updated_progress_at = Some(now);
            if proposal == ReportStatus::Resolved {
                report.admin_override = true;
            }
            tx.update_report(&report)?;

            deadline.check()?;
            Ok::<_, EngineError>(from)
        })?;

        tracing::info!(%report_id, progress_id = %progress.id, %from, to = %proposal, "owner progress recorded");
        Ok(progress)
    }

    /// Schedules the auto-resolve task and tells the owner how long the crowd has to object.
    fn awaiting_confirmation(&self, report: &Report, now: Timestamp) {
        let task = Task::AutoResolve { report_id: report.id };
        if let Err(e) = self.queue.enqueue(&task, self.settings.grace_period) {
            tracing::error!(report_id = %report.id, error = %e, "failed to enqueue auto-resolve; the daily sweep will re-arm it");
        }
        let since = report.potentially_resolved_at.unwrap_or(now);
        self.effects.remind(
            report,
            &self.settings.client_url,
            effects::days_remaining(since, self.settings.grace_period, now),
        );
    }

    fn deadline(&self) -> Deadline {
        Deadline {
            at: Instant::now().checked_add(self.settings.op_timeout),
            budget: self.settings.op_timeout,
        }
    }
}

/// Fails the enclosing transaction once the caller's budget is spent.
struct Deadline {
    at: Option<Instant>,
    budget: Duration,
}

impl Deadline {
    fn check(&self) -> Result<(), EngineError> {
        match self.at {
            Some(at) if Instant::now() >= at => Err(EngineError::Timeout(self.budget)),
            _ => Ok(()),
        }
    }
}

fn check_votable(report: &Report, user: &str) -> Result<(), EngineError> {
    if report.is_owned_by(user) {
        return Err(EngineError::OwnReport);
    }
    if report.status.is_terminal() {
        return Err(EngineError::Closed {
            id: report.id,
            status: report.status,
        });
    }
    if !report.has_progress {
        return Err(EngineError::NoProgress(report.id));
    }
    Ok(())
}

fn check_uploadable(report: &Report, user: &str, proposal: ReportStatus) -> Result<(), EngineError> {
    if !report.is_owned_by(user) {
        return Err(EngineError::NotOwner(report.id));
    }
    if !report.has_progress {
        return Err(EngineError::NoProgress(report.id));
    }
    if report.status.is_terminal() {
        return Err(EngineError::Closed {
            id: report.id,
            status: report.status,
        });
    }
    if report.status == ReportStatus::PotentiallyResolved && proposal != ReportStatus::Resolved {
        return Err(EngineError::AwaitingResolution(report.id));
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use crate::model::NewReport;

    use super::testing::Harness;
    use super::*;

    #[test]
    fn create_report_requires_title() {
        let h = Harness::new();

        let err = h
            .engine
            .create_report(NewReport {
                owner: "alice".into(),
                title: "  ".into(),
                contact: None,
                has_progress: true,
            })
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(h.engine.list_reports().unwrap().is_empty());
    }

    #[test]
    fn crowd_resolves_report_and_schedules_confirmation() {
        let mut h = Harness::new();
        let report = h.report("alice");

        let votes = [
            ("a", VoteType::Resolved),
            ("b", VoteType::Resolved),
            ("c", VoteType::Resolved),
            ("d", VoteType::OnProgress),
            ("e", VoteType::NotResolved),
        ];
        let mut last = None;
        for (user, vote_type) in votes {
            last = Some(h.engine.cast_vote(user, report.id, vote_type).unwrap());
        }

        let outcome = last.unwrap();
        assert_eq!(outcome.status, ReportStatus::PotentiallyResolved);
        assert_eq!(outcome.tally.total(), 5);
        assert_eq!(outcome.tally.margin_pct(), Some(40.0));

        let stored = h.engine.load_report(report.id).unwrap();
        assert_eq!(stored.potentially_resolved_at, Some(h.clock.now()));
        assert_eq!(stored.last_updated_by, UpdatedBy::System);

        // One transition, one task, one email.
        let enqueued = h.queue.take();
        assert_eq!(
            enqueued,
            vec![(
                Task::AutoResolve { report_id: report.id },
                h.engine.settings().grace_period
            )]
        );
        let emails = h.emails();
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0].recipient, "alice@example.com");
        assert_eq!(emails[0].days_remaining, 7);
    }

    #[test]
    fn single_vote_changes_nothing() {
        let h = Harness::new();
        let report = h.report("alice");

        let outcome = h.engine.cast_vote("bob", report.id, VoteType::Resolved).unwrap();

        assert_eq!(outcome.status, ReportStatus::Waiting);
        assert_eq!(outcome.tally.resolved, 1);
        assert!(h.queue.take().is_empty());
    }

    #[test]
    fn voting_the_same_type_twice_withdraws() {
        let h = Harness::new();
        let report = h.report("alice");

        h.engine.cast_vote("bob", report.id, VoteType::OnProgress).unwrap();
        let outcome = h.engine.cast_vote("bob", report.id, VoteType::OnProgress).unwrap();

        assert!(outcome.vote.is_none());
        assert_eq!(outcome.tally.total(), 0);
    }

    #[test]
    fn changing_vote_overwrites_in_place() {
        let h = Harness::new();
        let report = h.report("alice");

        h.engine.cast_vote("bob", report.id, VoteType::OnProgress).unwrap();
        let outcome = h.engine.cast_vote("bob", report.id, VoteType::NotResolved).unwrap();

        assert_eq!(outcome.vote.unwrap().vote_type, VoteType::NotResolved);
        assert_eq!(outcome.tally.total(), 1);
        assert_eq!(outcome.tally.not_resolved, 1);
    }

    #[test]
    fn owner_cannot_vote_and_nothing_is_written() {
        let h = Harness::new();
        let report = h.report("alice");

        let err = h.engine.cast_vote("alice", report.id, VoteType::Resolved).unwrap_err();

        assert!(matches!(err, EngineError::OwnReport));
        assert_eq!(err.kind(), ErrorKind::Validation);
        let votes = h.storage.read(|tx| tx.votes_for(report.id)).unwrap();
        assert!(votes.is_empty());
    }

    #[test]
    fn information_only_reports_take_no_votes() {
        let h = Harness::new();
        let report = h
            .engine
            .create_report(NewReport {
                owner: "alice".into(),
                title: "Road closed for the parade".into(),
                contact: None,
                has_progress: false,
            })
            .unwrap();

        let err = h.engine.cast_vote("bob", report.id, VoteType::Resolved).unwrap_err();

        assert!(matches!(err, EngineError::NoProgress(_)));
    }

    #[test]
    fn closed_reports_reject_votes() {
        let h = Harness::new();
        let report = h.report("alice");
        h.engine
            .upload_progress("alice", report.id, ReportStatus::Resolved, "Fixed.", vec![])
            .unwrap();

        let err = h.engine.cast_vote("bob", report.id, VoteType::NotResolved).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(h.engine.load_report(report.id).unwrap().status, ReportStatus::Resolved);
    }

    #[test]
    fn unknown_report_is_not_found() {
        let h = Harness::new();

        let err = h.engine.cast_vote("bob", Uuid::new_v4(), VoteType::Resolved).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn votes_on_awaiting_report_are_counted_but_do_not_move_it() {
        let h = Harness::new();
        let report = h.report("alice");
        h.engine.cast_vote("a", report.id, VoteType::Resolved).unwrap();
        h.engine.cast_vote("b", report.id, VoteType::Resolved).unwrap();

        for user in ["c", "d", "e", "f", "g"] {
            h.engine.cast_vote(user, report.id, VoteType::NotResolved).unwrap();
        }

        let snapshot = h.engine.report_status(report.id).unwrap();
        assert_eq!(snapshot.status, ReportStatus::PotentiallyResolved);
        assert_eq!(snapshot.tally.not_resolved, 5);
        assert_eq!(snapshot.tally.decision(), Some(VoteType::NotResolved));
    }

    #[test]
    fn crowd_can_reopen_a_not_resolved_report() {
        let h = Harness::new();
        let report = h.report("alice");
        h.engine.cast_vote("a", report.id, VoteType::NotResolved).unwrap();
        h.engine.cast_vote("b", report.id, VoteType::NotResolved).unwrap();
        assert_eq!(h.engine.load_report(report.id).unwrap().status, ReportStatus::NotResolved);

        h.engine.cast_vote("a", report.id, VoteType::OnProgress).unwrap();
        h.engine.cast_vote("b", report.id, VoteType::OnProgress).unwrap();

        assert_eq!(h.engine.load_report(report.id).unwrap().status, ReportStatus::OnProgress);
    }

    #[test]
    fn concurrent_voters_trigger_one_transition() {
        let mut h = Harness::new();
        let report = h.report("alice");

        let voters: Vec<_> = (0..16)
            .map(|i| {
                let engine = h.engine.clone();
                std::thread::spawn(move || engine.cast_vote(&format!("voter-{i}"), report.id, VoteType::Resolved))
            })
            .collect();
        let results: Vec<_> = voters.into_iter().map(|t| t.join().unwrap()).collect();

        assert!(results.iter().all(Result::is_ok), "{results:?}");
        let snapshot = h.engine.report_status(report.id).unwrap();
        assert_eq!(snapshot.status, ReportStatus::PotentiallyResolved);
        assert_eq!(snapshot.tally.resolved, 16);
        assert_eq!(h.queue.take().len(), 1);
        assert_eq!(h.emails().len(), 1);
    }

    #[test]
    fn failed_enqueue_does_not_fail_the_vote() {
        let (dir, storage) = crate::storage::testing::test_storage();
        let (effects, _rx) = Effects::channel();
        let engine = Engine::new(
            storage,
            Arc::new(crate::tasks::testing::BrokenQueue),
            effects,
            Arc::new(crate::clock::SystemClock),
            Settings::default(),
        );
        let report = engine
            .create_report(NewReport {
                owner: "alice".into(),
                title: "Graffiti".into(),
                contact: None,
                has_progress: true,
            })
            .unwrap();

        engine.cast_vote("a", report.id, VoteType::Resolved).unwrap();
        let outcome = engine.cast_vote("b", report.id, VoteType::Resolved).unwrap();

        assert_eq!(outcome.status, ReportStatus::PotentiallyResolved);
        drop(dir);
    }

    #[test]
    fn exhausted_budget_rolls_back_the_vote() {
        let h = Harness::with_settings(Settings {
            op_timeout: Duration::ZERO,
            ..Settings::default()
        });
        let report = h.report("alice");

        let err = h.engine.cast_vote("bob", report.id, VoteType::Resolved).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(h.storage.read(|tx| tx.votes_for(report.id)).unwrap().is_empty());
    }

    #[test]
    fn owner_progress_sets_status_and_log() {
        let h = Harness::new();
        let report = h.report("alice");
        h.clock.advance(SignedDuration::from_hours(1));

        let progress = h
            .engine
            .upload_progress(
                "alice",
                report.id,
                ReportStatus::OnProgress,
                "Crew booked for Tuesday.",
                vec!["schedule.pdf".into()],
            )
            .unwrap();

        let stored = h.engine.load_report(report.id).unwrap();
        assert_eq!(stored.status, ReportStatus::OnProgress);
        assert_eq!(stored.last_updated_by, UpdatedBy::Owner);
        assert_eq!(stored.last_updated_progress_at, Some(h.clock.now()));
        assert!(!stored.admin_override);
        assert_eq!(h.engine.list_progress(report.id).unwrap(), vec![progress]);
    }

    #[test]
    fn owner_resolution_overrides_the_crowd() {
        let h = Harness::new();
        let report = h.report("alice");
        h.engine.cast_vote("a", report.id, VoteType::NotResolved).unwrap();
        h.engine.cast_vote("b", report.id, VoteType::NotResolved).unwrap();

        h.engine
            .upload_progress("alice", report.id, ReportStatus::Resolved, "Done.", vec![])
            .unwrap();

        let stored = h.engine.load_report(report.id).unwrap();
        assert_eq!(stored.status, ReportStatus::Resolved);
        assert!(stored.admin_override);
        assert_eq!(stored.last_updated_by, UpdatedBy::Owner);
    }

    #[test]
    fn owner_may_resolve_a_report_awaiting_confirmation_but_not_reopen_it() {
        let h = Harness::new();
        let report = h.report("alice");
        h.engine.cast_vote("a", report.id, VoteType::Resolved).unwrap();
        h.engine.cast_vote("b", report.id, VoteType::Resolved).unwrap();

        let err = h
            .engine
            .upload_progress("alice", report.id, ReportStatus::OnProgress, "", vec![])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        h.engine
            .upload_progress("alice", report.id, ReportStatus::Resolved, "", vec![])
            .unwrap();
        assert_eq!(h.engine.load_report(report.id).unwrap().status, ReportStatus::Resolved);
    }

    #[test]
    fn progress_validation_happens_before_any_write() {
        let h = Harness::new();
        let report = h.report("alice");
        let three = vec!["a.jpg".into(), "b.jpg".into(), "c.jpg".into()];

        let too_many = h
            .engine
            .upload_progress("alice", report.id, ReportStatus::OnProgress, "", three)
            .unwrap_err();
        let bad_status = h
            .engine
            .upload_progress("alice", report.id, ReportStatus::Expired, "", vec![])
            .unwrap_err();
        let stranger = h
            .engine
            .upload_progress("mallory", report.id, ReportStatus::Resolved, "", vec![])
            .unwrap_err();

        assert!(matches!(too_many, EngineError::TooManyAttachments(3)));
        assert!(matches!(bad_status, EngineError::InvalidProposal(ReportStatus::Expired)));
        assert!(matches!(stranger, EngineError::NotOwner(_)));
        assert!(h.engine.list_progress(report.id).unwrap().is_empty());
        assert_eq!(h.engine.load_report(report.id).unwrap().status, ReportStatus::Waiting);
    }

    #[test]
    fn resolved_report_rejects_further_progress() {
        let h = Harness::new();
        let report = h.report("alice");
        h.engine
            .upload_progress("alice", report.id, ReportStatus::Resolved, "", vec![])
            .unwrap();

        let err = h
            .engine
            .upload_progress("alice", report.id, ReportStatus::Resolved, "again", vec![])
            .unwrap_err();

        assert!(matches!(err, EngineError::Closed { status: ReportStatus::Resolved, .. }));
        assert_eq!(h.engine.list_progress(report.id).unwrap().len(), 1);
    }
}
