//! Progress storage: append and load owner progress entries.

use rusqlite::{Row, params};
use uuid::Uuid;

use crate::model::{Progress, ReportStatus};

use super::{Result, StorageError, Tx, parse_timestamp, parse_uuid};

impl Tx<'_> {
    /// Appends a progress entry to a report's log.
    pub fn append_progress(&self, progress: &Progress) -> Result<()> {
        let attachments = serde_json::to_string(&progress.attachments)?;
        self.inner.execute(
            "INSERT INTO progress (id, report_id, author, status, notes, attachments, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                progress.id.to_string(),
                progress.report_id.to_string(),
                &progress.author,
                progress.status.as_str(),
                &progress.notes,
                attachments,
                progress.created_at.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Loads a report's progress log in the order it was written.
    pub fn progress_for(&self, report_id: Uuid) -> Result<Vec<Progress>> {
        let mut stmt = self.inner.prepare(
            "SELECT id, report_id, author, status, notes, attachments, created_at
             FROM progress WHERE report_id = ?1 ORDER BY seq",
        )?;
        let rows = stmt.query_map([report_id.to_string()], RawProgress::from_row)?;
        let entries = rows
            .map(|raw| raw?.into_progress())
            .collect::<Result<Vec<_>>>()?;
        Ok(entries)
    }
}

struct RawProgress {
    id: String,
    report_id: String,
    author: String,
    status: String,
    notes: String,
    attachments: String,
    created_at: String,
}

impl RawProgress {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            report_id: row.get(1)?,
            author: row.get(2)?,
            status: row.get(3)?,
            notes: row.get(4)?,
            attachments: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_progress(self) -> Result<Progress> {
        Ok(Progress {
            id: parse_uuid("progress id", &self.id)?,
            report_id: parse_uuid("progress report_id", &self.report_id)?,
            author: self.author,
            status: self
                .status
                .parse::<ReportStatus>()
                .map_err(|e| StorageError::Corrupt(e.to_string()))?,
            notes: self.notes,
            attachments: serde_json::from_str(&self.attachments)?,
            created_at: parse_timestamp("progress created_at", &self.created_at)?,
        })
    }
}
