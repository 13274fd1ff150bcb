//! Delayed tasks: what the lifecycle schedules for later, and the queue it schedules on.
//!
//! The engine only sees the [`TaskQueue`] trait. The bundled [`SqliteQueue`]
//! keeps tasks in the `task` table of the same database, and a [`Worker`]
//! polls it and dispatches due tasks to handlers registered by kind.

mod worker;

use std::sync::Arc;

use jiff::SignedDuration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    clock::Clock,
    storage::{Storage, StorageError},
};

pub use worker::{TaskError, TaskHandler, Worker};

/// A unit of deferred work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Task {
    /// Finalize a report once its confirmation window has passed.
    AutoResolve {
        #[serde(rename = "reportId")]
        report_id: Uuid,
    },
}

impl Task {
    pub const AUTO_RESOLVE: &'static str = "report:auto-resolve";

    /// The handler this task is dispatched to.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AutoResolve { .. } => Self::AUTO_RESOLVE,
        }
    }

    /// Identifies the task within its kind. Enqueueing the same key replaces the pending task.
    pub fn key(&self) -> String {
        match self {
            Self::AutoResolve { report_id } => report_id.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("failed to encode task: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("task cannot be scheduled that far ahead: {0}")]
    OutOfRange(#[from] jiff::Error),
}

/// The delayed-task collaborator.
pub trait TaskQueue: Send + Sync {
    /// Schedules `task` to run once `delay` from now. Negative delays run as soon as possible.
    fn enqueue(&self, task: &Task, delay: SignedDuration) -> Result<(), QueueError>;
}

/// A queue backed by the `task` table.
#[derive(Clone)]
pub struct SqliteQueue {
    storage: Storage,
    clock: Arc<dyn Clock>,
}

impl SqliteQueue {
    pub fn new(storage: Storage, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }
}

impl TaskQueue for SqliteQueue {
    fn enqueue(&self, task: &Task, delay: SignedDuration) -> Result<(), QueueError> {
        let payload = serde_json::to_string(task)?;
        let run_at = self.clock.now().checked_add(delay.max(SignedDuration::ZERO))?;
        let id = self
            .storage
            .write(|tx| tx.upsert_task(task.kind(), &task.key(), &payload, run_at))?;
        tracing::debug!(task_id = %id, kind = task.kind(), key = %task.key(), %run_at, "task enqueued");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use jiff::Timestamp;

    use crate::clock::testing::ManualClock;
    use crate::storage::testing::test_storage;

    use super::*;

    #[test]
    fn task_payload_carries_only_the_report_id() {
        let report_id = Uuid::new_v4();
        let task = Task::AutoResolve { report_id };

        let json: serde_json::Value = serde_json::to_value(&task).unwrap();

        assert_eq!(json["type"], "auto-resolve");
        assert_eq!(json["reportId"], report_id.to_string());
        assert_eq!(serde_json::from_value::<Task>(json).unwrap(), task);
    }

    #[test]
    fn enqueue_schedules_after_delay() {
        let (_dir, storage) = test_storage();
        let now = Timestamp::from_second(1_700_000_000).unwrap();
        let queue = SqliteQueue::new(storage.clone(), Arc::new(ManualClock::new(now)));
        let task = Task::AutoResolve {
            report_id: Uuid::new_v4(),
        };

        queue.enqueue(&task, SignedDuration::from_hours(168)).unwrap();

        let pending = storage.read(|tx| tx.pending_tasks()).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, Task::AUTO_RESOLVE);
        assert_eq!(pending[0].key, task.key());
        assert_eq!(pending[0].run_at, now + SignedDuration::from_hours(168));
    }

    #[test]
    fn reenqueue_keeps_a_single_task_per_report() {
        let (_dir, storage) = test_storage();
        let now = Timestamp::from_second(1_700_000_000).unwrap();
        let queue = SqliteQueue::new(storage.clone(), Arc::new(ManualClock::new(now)));
        let task = Task::AutoResolve {
            report_id: Uuid::new_v4(),
        };

        queue.enqueue(&task, SignedDuration::from_hours(168)).unwrap();
        queue.enqueue(&task, SignedDuration::from_hours(24)).unwrap();
        queue.enqueue(&task, SignedDuration::from_hours(-5)).unwrap();

        let pending = storage.read(|tx| tx.pending_tasks()).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].run_at, now);
    }
}
