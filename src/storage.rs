//! Local persistence for reports, votes, progress, and queued tasks.
//!
//! Everything lives in one `SQLite` file:
//!
//! ```text
//! report    # One row per report: status, timestamps, override flags
//! vote      # One row per (report, user): that user's current vote
//! progress  # Append-only owner progress entries
//! task      # Delayed tasks held for the bundled queue
//! ```
//!
//! Each transaction opens its own connection, so a `Storage` is cheap to clone
//! into worker tasks. Write transactions begin `IMMEDIATE`: the database write
//! lock is taken before the first read, which serializes every
//! read-then-write sequence (vote tally → status change) across connections.

mod progress;
mod report;
mod task;
mod vote;

use std::{fs, io, path::PathBuf, time::Duration};

use rusqlite::{Connection, Transaction, TransactionBehavior};
use uuid::Uuid;

pub use task::QueuedTask;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("report not found: {0}")]
    ReportNotFound(Uuid),

    #[error("report already exists: {0}")]
    ReportAlreadyExists(Uuid),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = core::result::Result<T, StorageError>;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS report (
    id                       TEXT PRIMARY KEY,
    owner                    TEXT NOT NULL,
    title                    TEXT NOT NULL,
    contact                  TEXT,
    has_progress             INTEGER NOT NULL,
    status                   TEXT NOT NULL,
    last_updated_by          TEXT NOT NULL,
    last_updated_progress_at TEXT,
    potentially_resolved_at  TEXT,
    admin_override           INTEGER NOT NULL DEFAULT 0,
    created_at               TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS report_status ON report (status);

CREATE TABLE IF NOT EXISTS vote (
    report_id  TEXT NOT NULL REFERENCES report (id),
    user_id    TEXT NOT NULL,
    vote_type  TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (report_id, user_id)
);

CREATE TABLE IF NOT EXISTS progress (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    id          TEXT NOT NULL UNIQUE,
    report_id   TEXT NOT NULL REFERENCES report (id),
    author      TEXT NOT NULL,
    status      TEXT NOT NULL,
    notes       TEXT NOT NULL,
    attachments TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS progress_report ON progress (report_id);

CREATE TABLE IF NOT EXISTS task (
    kind         TEXT NOT NULL,
    key          TEXT NOT NULL,
    id           TEXT NOT NULL UNIQUE,
    payload      TEXT NOT NULL,
    run_at_ms    INTEGER NOT NULL,
    attempts     INTEGER NOT NULL DEFAULT 0,
    leased_until INTEGER,
    last_error   TEXT,
    PRIMARY KEY (kind, key)
);
";

/// Default wait for a competing writer to release the database lock.
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// `SQLite`-backed storage for the report lifecycle.
#[derive(Debug, Clone)]
pub struct Storage {
    path: PathBuf,
    busy_timeout: Duration,
}

impl Storage {
    /// Opens (or creates) the database at `path` and brings the schema up to date.
    ///
    /// Parent directories are created if they don't exist.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let storage = Self {
            path,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        };
        let conn = storage.connect()?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            tracing::warn!(%mode, "database did not switch to WAL; concurrent readers will block writers");
        }
        conn.execute_batch(SCHEMA)?;
        Ok(storage)
    }

    /// How long a transaction waits on a competing writer before giving up.
    #[must_use]
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Returns the default database path: `~/.quorum/quorum.sqlite`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".quorum").join("quorum.sqlite"))
    }

    /// Runs `f` inside a read transaction and returns its result.
    ///
    /// All reads inside `f` see one consistent snapshot.
    pub fn read<T, E>(&self, f: impl FnOnce(&Tx<'_>) -> core::result::Result<T, E>) -> core::result::Result<T, E>
    where
        E: From<StorageError>,
    {
        self.transact(TransactionBehavior::Deferred, f)
    }

    /// Runs `f` inside a write transaction, committing only if it returns `Ok`.
    ///
    /// Any error from `f` rolls back everything `f` wrote.
    pub fn write<T, E>(&self, f: impl FnOnce(&Tx<'_>) -> core::result::Result<T, E>) -> core::result::Result<T, E>
    where
        E: From<StorageError>,
    {
        self.transact(TransactionBehavior::Immediate, f)
    }

    fn transact<T, E>(
        &self,
        behavior: TransactionBehavior,
        f: impl FnOnce(&Tx<'_>) -> core::result::Result<T, E>,
    ) -> core::result::Result<T, E>
    where
        E: From<StorageError>,
    {
        let mut conn = self.connect()?;
        let inner = conn
            .transaction_with_behavior(behavior)
            .map_err(StorageError::from)?;
        let tx = Tx { inner };
        let value = f(&tx)?;
        tx.inner.commit().map_err(StorageError::from)?;
        Ok(value)
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(conn)
    }
}

/// An open transaction. Entity operations live in the submodules.
///
/// Dropping a `Tx` without committing rolls it back.
pub struct Tx<'conn> {
    inner: Transaction<'conn>,
}

/// Parses a timestamp column, flagging bad text as corruption.
fn parse_timestamp(column: &str, text: &str) -> Result<jiff::Timestamp> {
    text.parse()
        .map_err(|e| StorageError::Corrupt(format!("invalid {column}: {e}")))
}

fn parse_uuid(column: &str, text: &str) -> Result<Uuid> {
    text.parse()
        .map_err(|e| StorageError::Corrupt(format!("invalid {column}: {e}")))
}


#[cfg(test)]
mod tests {
    use super::testing::test_storage;
    use super::*;

    #[test]
    fn new_creates_parent_directories() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deeper").join("quorum.sqlite");

        Storage::new(&path).unwrap();

        assert!(path.exists());
    }

    #[test]
    fn reopening_existing_database_is_fine() {
        let (dir, _storage) = test_storage();

        Storage::new(dir.path().join("quorum.sqlite")).unwrap();
    }

    #[test]
    fn failed_write_rolls_back() {
        let (_dir, storage) = test_storage();

        let result: core::result::Result<(), StorageError> = storage.write(|tx| {
            tx.inner
                .execute("INSERT INTO task (kind, key, id, payload, run_at_ms) VALUES ('k', 'a', 'x', '{}', 0)", [])?;
            Err(StorageError::Corrupt("abort".into()))
        });
        assert!(result.is_err());

        let count: i64 = storage
            .read(|tx| Ok::<_, StorageError>(tx.inner.query_row("SELECT COUNT(*) FROM task", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
    }
}
