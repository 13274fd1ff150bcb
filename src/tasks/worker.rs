//! The polling worker that runs due tasks.
//!
//! Each tick claims a batch of due tasks under a lease, runs each through the
//! handler registered for its kind, and settles the row:
//!
//! - success: the task is deleted;
//! - a retryable failure: the task goes back to the queue after a backoff,
//!   until it runs out of attempts;
//! - anything else: the task is logged and dropped.
//!
//! A worker that dies mid-task simply lets the lease lapse, and the next tick
//! claims the task again. Delivery is at-least-once, so handlers must be
//! idempotent.

use std::{collections::HashMap, sync::Arc, time::Duration};

use jiff::SignedDuration;
use tokio::task::JoinHandle;

use crate::{
    clock::Clock,
    storage::{QueuedTask, Storage, StorageError},
};

use super::Task;

/// How many times a task is tried before it is given up on.
const MAX_ATTEMPTS: u32 = 5;

/// Wait before retry N (1-based), capped at the last entry.
const BACKOFF: [SignedDuration; 4] = [
    SignedDuration::from_secs(30),
    SignedDuration::from_secs(5 * 60),
    SignedDuration::from_secs(60 * 60),
    SignedDuration::from_secs(6 * 60 * 60),
];

const DEFAULT_LEASE: SignedDuration = SignedDuration::from_secs(5 * 60);
const DEFAULT_BATCH: usize = 32;

/// Runs one kind of task.
pub trait TaskHandler: Send + Sync {
    fn handle(&self, task: &Task) -> Result<(), TaskError>;
}

/// How a handler failed, which decides what happens to the task.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// Transient: run the task again later.
    #[error("{0}")]
    Retry(String),

    /// Permanent: running it again would fail the same way.
    #[error("{0}")]
    Abort(String),
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub completed: usize,
    pub retried: usize,
    pub dropped: usize,
}

pub struct Worker {
    storage: Storage,
    clock: Arc<dyn Clock>,
    handlers: HashMap<&'static str, Arc<dyn TaskHandler>>,
    lease: SignedDuration,
    batch: usize,
}

enum Settled {
    Completed,
    Retried,
    Dropped,
}

impl Worker {
    pub fn new(storage: Storage, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            clock,
            handlers: HashMap::new(),
            lease: DEFAULT_LEASE,
            batch: DEFAULT_BATCH,
        }
    }

    /// How long a claimed task stays invisible to other claims.
    #[must_use]
    pub fn with_lease(mut self, lease: SignedDuration) -> Self {
        self.lease = lease;
        self
    }

    #[must_use]
    pub fn register(mut self, kind: &'static str, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    /// Claims and runs every task due now.
    pub fn tick(&self) -> Result<TickSummary, StorageError> {
        let now = self.clock.now();
        let claimed = self
            .storage
            .write(|tx| tx.claim_due_tasks(now, self.lease, self.batch))?;

        let mut summary = TickSummary::default();
        for queued in &claimed {
            match self.run(queued) {
                Settled::Completed => summary.completed += 1,
                Settled::Retried => summary.retried += 1,
                Settled::Dropped => summary.dropped += 1,
            }
        }
        Ok(summary)
    }

    fn run(&self, queued: &QueuedTask) -> Settled {
        let Some(handler) = self.handlers.get(queued.kind.as_str()) else {
            tracing::error!(task_id = %queued.id, kind = %queued.kind, "no handler for task kind; dropping");
            self.finish(queued);
            return Settled::Dropped;
        };

        let task: Task = match serde_json::from_str(&queued.payload) {
            Ok(task) => task,
            Err(e) => {
                tracing::error!(task_id = %queued.id, error = %e, "undecodable task payload; dropping");
                self.finish(queued);
                return Settled::Dropped;
            }
        };

        tracing::debug!(task_id = %queued.id, key = %queued.key, run_at = %queued.run_at, "running task");
        match handler.handle(&task) {
            Ok(()) => {
                self.finish(queued);
                Settled::Completed
            }
            Err(TaskError::Retry(reason)) if queued.attempts < MAX_ATTEMPTS => {
                let retry_at = self.clock.now() + backoff(queued.attempts);
                tracing::warn!(
                    task_id = %queued.id,
                    kind = %queued.kind,
                    attempt = queued.attempts,
                    %retry_at,
                    error = %reason,
                    "task failed; will retry"
                );
                if let Err(e) = self
                    .storage
                    .write(|tx| tx.release_task(queued.id, retry_at, &reason))
                {
                    tracing::warn!(task_id = %queued.id, error = %e, "failed to release task; lease will lapse");
                }
                Settled::Retried
            }
            Err(e) => {
                tracing::error!(
                    task_id = %queued.id,
                    kind = %queued.kind,
                    attempt = queued.attempts,
                    error = %e,
                    previous_error = ?queued.last_error,
                    "task failed permanently; dropping"
                );
                self.finish(queued);
                Settled::Dropped
            }
        }
    }

    fn finish(&self, queued: &QueuedTask) {
        match self.storage.write(|tx| tx.complete_task(queued.id)) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(task_id = %queued.id, "task was re-armed while running; keeping the new one");
            }
            Err(e) => {
                tracing::warn!(task_id = %queued.id, error = %e, "failed to complete task; it will run again");
            }
        }
    }

    /// Polls every `interval` until the runtime shuts down.
    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        let worker = Arc::new(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let worker = Arc::clone(&worker);
                match tokio::task::spawn_blocking(move || worker.tick()).await {
                    Ok(Ok(summary)) if summary != TickSummary::default() => {
                        tracing::info!(
                            completed = summary.completed,
                            retried = summary.retried,
                            dropped = summary.dropped,
                            "task tick"
                        );
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => tracing::warn!(error = %e, "failed to claim tasks"),
                    Err(e) => tracing::error!(error = %e, "task tick panicked"),
                }
            }
        })
    }
}

fn backoff(attempts: u32) -> SignedDuration {
    let index = usize::try_from(attempts.saturating_sub(1)).unwrap_or(usize::MAX);
    BACKOFF[index.min(BACKOFF.len() - 1)]
}
