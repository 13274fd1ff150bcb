//! Task storage: the durable side of the bundled delayed-task queue.
//!
//! A task is keyed by `(kind, key)`; enqueueing the same key again replaces
//! the pending row, so a report never has more than one auto-resolve task.
//! Every enqueue stamps a fresh `id`, which lets a worker finishing an older
//! claim leave a newer re-arm untouched.
//!
//! Times are stored as Unix milliseconds so due-ness can be checked in SQL.

use jiff::{SignedDuration, Timestamp};
use rusqlite::{Row, params};
use uuid::Uuid;

use super::{Result, StorageError, Tx, parse_uuid};

/// A task row as held by the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedTask {
    pub id: Uuid,
    pub kind: String,
    pub key: String,
    pub payload: String,
    pub run_at: Timestamp,

    /// How many times the task has been claimed, including the current claim.
    pub attempts: u32,

    pub last_error: Option<String>,
}

const COLUMNS: &str = "id, kind, key, payload, run_at_ms, attempts, last_error";

impl Tx<'_> {
    /// Schedules a task to become due at `run_at`, replacing any pending task
    /// with the same kind and key. Returns the new task id.
    pub fn upsert_task(&self, kind: &str, key: &str, payload: &str, run_at: Timestamp) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.inner.execute(
            "INSERT INTO task (kind, key, id, payload, run_at_ms, attempts, leased_until, last_error)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, NULL, NULL)
             ON CONFLICT (kind, key) DO UPDATE
             SET id = excluded.id, payload = excluded.payload, run_at_ms = excluded.run_at_ms,
                 attempts = 0, leased_until = NULL, last_error = NULL",
            params![kind, key, id.to_string(), payload, run_at.as_millisecond()],
        )?;
        Ok(id)
    }

    /// Claims up to `limit` due tasks, leasing each until `now + lease`.
    ///
    /// A task whose lease ran out without being completed or released is due
    /// again, so a crashed worker's tasks are picked up by the next claim.
    pub fn claim_due_tasks(&self, now: Timestamp, lease: SignedDuration, limit: usize) -> Result<Vec<QueuedTask>> {
        let now_ms = now.as_millisecond();
        let leased_until = now.checked_add(lease).unwrap_or(Timestamp::MAX).as_millisecond();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut stmt = self.inner.prepare(&format!(
            "SELECT {COLUMNS} FROM task
             WHERE run_at_ms <= ?1 AND (leased_until IS NULL OR leased_until <= ?1)
             ORDER BY run_at_ms
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![now_ms, limit], RawTask::from_row)?;
        let mut claimed = rows
            .map(|raw| raw?.into_task())
            .collect::<Result<Vec<_>>>()?;

        for task in &mut claimed {
            self.inner.execute(
                "UPDATE task SET leased_until = ?1, attempts = attempts + 1 WHERE id = ?2",
                params![leased_until, task.id.to_string()],
            )?;
            task.attempts += 1;
        }
        Ok(claimed)
    }

    /// Removes a finished task. Returns false if it was replaced or removed meanwhile.
    pub fn complete_task(&self, id: Uuid) -> Result<bool> {
        let rows = self
            .inner
            .execute("DELETE FROM task WHERE id = ?1", [id.to_string()])?;
        Ok(rows > 0)
    }

    /// Hands a failed task back to the queue, due again at `retry_at`.
    pub fn release_task(&self, id: Uuid, retry_at: Timestamp, error: &str) -> Result<bool> {
        let rows = self.inner.execute(
            "UPDATE task SET run_at_ms = ?1, leased_until = NULL, last_error = ?2 WHERE id = ?3",
            params![retry_at.as_millisecond(), error, id.to_string()],
        )?;
        Ok(rows > 0)
    }

    /// Lists every task still held by the queue, soonest first.
    pub fn pending_tasks(&self) -> Result<Vec<QueuedTask>> {
        let mut stmt = self
            .inner
            .prepare(&format!("SELECT {COLUMNS} FROM task ORDER BY run_at_ms"))?;
        let rows = stmt.query_map([], RawTask::from_row)?;
        let tasks = rows
            .map(|raw| raw?.into_task())
            .collect::<Result<Vec<_>>>()?;
        Ok(tasks)
    }
}

struct RawTask {
    id: String,
    kind: String,
    key: String,
    payload: String,
    run_at_ms: i64,
    attempts: u32,
    last_error: Option<String>,
}

impl RawTask {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            key: row.get(2)?,
            payload: row.get(3)?,
            run_at_ms: row.get(4)?,
            attempts: row.get(5)?,
            last_error: row.get(6)?,
        })
    }

    fn into_task(self) -> Result<QueuedTask> {
        Ok(QueuedTask {
            id: parse_uuid("task id", &self.id)?,
            kind: self.kind,
            key: self.key,
            payload: self.payload,
            run_at: Timestamp::from_millisecond(self.run_at_ms)
                .map_err(|e| StorageError::Corrupt(format!("invalid run_at_ms: {e}")))?,
            attempts: self.attempts,
            last_error: self.last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::testing::test_storage;

    use super::*;

    fn at(seconds: i64) -> Timestamp {
        Timestamp::from_second(1_700_000_000 + seconds).unwrap()
    }

    #[test]
    fn upsert_replaces_pending_task_with_same_key() {
        let (_dir, storage) = test_storage();

        let first = storage
            .write(|tx| tx.upsert_task("auto-resolve", "r1", "{}", at(100)))
            .unwrap();
        let second = storage
            .write(|tx| tx.upsert_task("auto-resolve", "r1", "{}", at(50)))
            .unwrap();

        let pending = storage.read(|tx| tx.pending_tasks()).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, second);
        assert_ne!(first, second);
        assert_eq!(pending[0].run_at, at(50));
    }

    #[test]
    fn claim_only_returns_due_tasks() {
        let (_dir, storage) = test_storage();
        storage
            .write(|tx| {
                tx.upsert_task("auto-resolve", "due", "{}", at(0))?;
                tx.upsert_task("auto-resolve", "later", "{}", at(600))
            })
            .unwrap();

        let claimed = storage
            .write(|tx| tx.claim_due_tasks(at(10), SignedDuration::from_mins(1), 10))
            .unwrap();

        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].key, "due");
        assert_eq!(claimed[0].attempts, 1);
    }

    #[test]
    fn leased_task_is_not_claimed_twice_until_lease_expires() {
        let (_dir, storage) = test_storage();
        storage
            .write(|tx| tx.upsert_task("auto-resolve", "r1", "{}", at(0)))
            .unwrap();
        let lease = SignedDuration::from_mins(1);

        let first = storage.write(|tx| tx.claim_due_tasks(at(10), lease, 10)).unwrap();
        let during = storage.write(|tx| tx.claim_due_tasks(at(30), lease, 10)).unwrap();
        let after = storage.write(|tx| tx.claim_due_tasks(at(80), lease, 10)).unwrap();

        assert_eq!(first.len(), 1);
        assert!(during.is_empty());
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].attempts, 2);
    }

    #[test]
    fn completing_a_stale_claim_keeps_the_rearmed_task() {
        let (_dir, storage) = test_storage();
        storage
            .write(|tx| tx.upsert_task("auto-resolve", "r1", "{}", at(0)))
            .unwrap();
        let claimed = storage
            .write(|tx| tx.claim_due_tasks(at(10), SignedDuration::from_mins(1), 10))
            .unwrap();

        // Re-armed while the worker was still handling the first claim.
        storage
            .write(|tx| tx.upsert_task("auto-resolve", "r1", "{}", at(500)))
            .unwrap();

        let removed = storage.write(|tx| tx.complete_task(claimed[0].id)).unwrap();
        assert!(!removed);
        assert_eq!(storage.read(|tx| tx.pending_tasks()).unwrap().len(), 1);
    }

    #[test]
    fn released_task_becomes_due_at_retry_time() {
        let (_dir, storage) = test_storage();
        storage
            .write(|tx| tx.upsert_task("auto-resolve", "r1", "{}", at(0)))
            .unwrap();
        let lease = SignedDuration::from_mins(10);
        let claimed = storage.write(|tx| tx.claim_due_tasks(at(10), lease, 10)).unwrap();

        storage
            .write(|tx| tx.release_task(claimed[0].id, at(40), "database is locked"))
            .unwrap();

        assert!(storage.write(|tx| tx.claim_due_tasks(at(20), lease, 10)).unwrap().is_empty());
        let retried = storage.write(|tx| tx.claim_due_tasks(at(40), lease, 10)).unwrap();
        assert_eq!(retried.len(), 1);
        assert_eq!(retried[0].last_error.as_deref(), Some("database is locked"));
    }
}
