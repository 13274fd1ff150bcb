//! Detached side effects: status emails sent after a transaction commits.
//!
//! The engine never talks to the notifier directly. It pushes an [`Effect`]
//! onto an unbounded channel and returns; a single worker task drains the
//! channel and hands each effect to a [`Notifier`]. A failed send shows up in
//! the logs and nowhere else.
//!
//! The worker exits once every [`Effects`] handle has been dropped, so a
//! short-lived command can drop its engine and await the worker to flush.

use std::{fs, io, io::Write, path::PathBuf, sync::Arc};

use jiff::{SignedDuration, Timestamp};
use serde::Serialize;
use tokio::{sync::mpsc, task::JoinHandle};
use uuid::Uuid;

use crate::model::Report;

/// A "your report is awaiting confirmation" email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEmail {
    pub recipient: String,
    pub report_title: String,
    pub link: String,
    pub days_remaining: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    StatusEmail(StatusEmail),
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The outbound notification collaborator.
pub trait Notifier: Send + Sync {
    fn send_status_email(&self, email: &StatusEmail) -> Result<(), NotifyError>;
}

/// Logs each email instead of sending it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send_status_email(&self, email: &StatusEmail) -> Result<(), NotifyError> {
        tracing::info!(
            recipient = %email.recipient,
            title = %email.report_title,
            link = %email.link,
            days_remaining = email.days_remaining,
            "status email"
        );
        Ok(())
    }
}

/// Appends each email as one JSON line for a mail relay to pick up.
#[derive(Debug, Clone)]
pub struct OutboxNotifier {
    path: PathBuf,
}

impl OutboxNotifier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Notifier for OutboxNotifier {
    fn send_status_email(&self, email: &StatusEmail) -> Result<(), NotifyError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut line = serde_json::to_string(email)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

/// Sending half of the effects channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Effects {
    tx: mpsc::UnboundedSender<Effect>,
}

impl Effects {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Effect>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Starts a worker delivering effects to `notifier`.
    pub fn spawn(notifier: Arc<dyn Notifier>) -> (Self, JoinHandle<()>) {
        let (effects, rx) = Self::channel();
        let handle = tokio::spawn(run(rx, notifier));
        (effects, handle)
    }

    /// Queues an effect. Never fails: if the worker is gone the effect is logged and dropped.
    pub fn send(&self, effect: Effect) {
        if let Err(mpsc::error::SendError(effect)) = self.tx.send(effect) {
            tracing::warn!(?effect, "effects worker stopped; dropping effect");
        }
    }

    /// Queues the "awaiting confirmation" reminder for a report.
    ///
    /// A report without a contact address gets no email; that is logged as an error.
    pub fn remind(&self, report: &Report, client_url: &str, days_remaining: i64) {
        let Some(recipient) = &report.contact else {
            tracing::error!(report_id = %report.id, "no contact address for report; skipping reminder");
            return;
        };
        self.send(Effect::StatusEmail(StatusEmail {
            recipient: recipient.clone(),
            report_title: report.title.clone(),
            link: report_link(client_url, report.id),
            days_remaining,
        }));
    }
}

/// Drains `rx` until every sender is dropped.
pub async fn run(mut rx: mpsc::UnboundedReceiver<Effect>, notifier: Arc<dyn Notifier>) {
    while let Some(effect) = rx.recv().await {
        let notifier = Arc::clone(&notifier);
        let sent = tokio::task::spawn_blocking(move || match &effect {
            Effect::StatusEmail(email) => notifier
                .send_status_email(email)
                .map_err(|e| (email.recipient.clone(), e)),
        })
        .await;

        match sent {
            Ok(Ok(())) => {}
            Ok(Err((recipient, e))) => {
                tracing::error!(%recipient, error = %e, "failed to send status email");
            }
            Err(e) => tracing::error!(error = %e, "notifier panicked"),
        }
    }
    tracing::debug!("effects worker finished");
}

/// Where the client app shows a report.
pub fn report_link(client_url: &str, id: Uuid) -> String {
    format!("{}/main/reports/{id}", client_url.trim_end_matches('/'))
}

/// Whole days left before a report awaiting confirmation resolves, rounded up.
///
/// Zero once the grace period is over.
pub fn days_remaining(potentially_resolved_at: Timestamp, grace: SignedDuration, now: Timestamp) -> i64 {
    let elapsed = potentially_resolved_at.duration_until(now);
    let remaining = grace.checked_sub(elapsed).unwrap_or(SignedDuration::MAX);
    if !remaining.is_positive() {
        return 0;
    }
    let secs = remaining.as_secs();
    let partial_day = secs % 86_400 > 0 || remaining.subsec_nanos() > 0;
    secs / 86_400 + i64::from(partial_day)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::{Notifier, NotifyError, StatusEmail};

    /// Keeps every email it is asked to send.
    #[derive(Debug, Default)]
    pub struct RecordingNotifier {
        pub sent: Mutex<Vec<StatusEmail>>,
    }

    impl Notifier for RecordingNotifier {
        fn send_status_email(&self, email: &StatusEmail) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    /// Fails every send.
    #[derive(Debug, Default)]
    pub struct FailingNotifier;

    impl Notifier for FailingNotifier {
        fn send_status_email(&self, _email: &StatusEmail) -> Result<(), NotifyError> {
            Err(NotifyError::Io(std::io::Error::other("relay unreachable")))
        }
    }
}
