//! Report storage: insert, load, update, and select reports by status.

use rusqlite::{ErrorCode, Row, params, params_from_iter};
use uuid::Uuid;

use crate::model::{Report, ReportStatus, UpdatedBy};

use super::{Result, StorageError, Tx, parse_timestamp, parse_uuid};

const COLUMNS: &str = "id, owner, title, contact, has_progress, status, last_updated_by, \
     last_updated_progress_at, potentially_resolved_at, admin_override, created_at";

impl Tx<'_> {
    /// Inserts a newly filed report.
    pub fn insert_report(&self, report: &Report) -> Result<()> {
        let result = self.inner.execute(
            &format!(
                "INSERT INTO report ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                report.id.to_string(),
                &report.owner,
                &report.title,
                &report.contact,
                report.has_progress,
                report.status.as_str(),
                report.last_updated_by.as_str(),
                report.last_updated_progress_at.map(|t| t.to_string()),
                report.potentially_resolved_at.map(|t| t.to_string()),
                report.admin_override,
                report.created_at.to_string(),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(StorageError::ReportAlreadyExists(report.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Loads a single report.
    pub fn load_report(&self, id: Uuid) -> Result<Report> {
        let raw = self
            .inner
            .query_row(
                &format!("SELECT {COLUMNS} FROM report WHERE id = ?1"),
                [id.to_string()],
                RawReport::from_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StorageError::ReportNotFound(id),
                other => other.into(),
            })?;
        raw.into_report()
    }

    /// Writes back every mutable column of an existing report.
    pub fn update_report(&self, report: &Report) -> Result<()> {
        let rows = self.inner.execute(
            "UPDATE report
             SET status = ?1, last_updated_by = ?2, last_updated_progress_at = ?3,
                 potentially_resolved_at = ?4, admin_override = ?5, has_progress = ?6,
                 title = ?7, contact = ?8
             WHERE id = ?9",
            params![
                report.status.as_str(),
                report.last_updated_by.as_str(),
                report.last_updated_progress_at.map(|t| t.to_string()),
                report.potentially_resolved_at.map(|t| t.to_string()),
                report.admin_override,
                report.has_progress,
                &report.title,
                &report.contact,
                report.id.to_string(),
            ],
        )?;
        if rows == 0 {
            return Err(StorageError::ReportNotFound(report.id));
        }
        Ok(())
    }

    /// Lists reports currently in any of `statuses`, oldest first.
    pub fn reports_with_status(&self, statuses: &[ReportStatus]) -> Result<Vec<Report>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let mut stmt = self.inner.prepare(&format!(
            "SELECT {COLUMNS} FROM report WHERE status IN ({placeholders}) ORDER BY created_at"
        ))?;
        let rows = stmt.query_map(
            params_from_iter(statuses.iter().map(|s| s.as_str())),
            RawReport::from_row,
        )?;
        let reports = rows
            .map(|raw| raw?.into_report())
            .collect::<Result<Vec<_>>>()?;
        Ok(reports)
    }

    /// Lists every report, oldest first.
    pub fn list_reports(&self) -> Result<Vec<Report>> {
        let mut stmt = self
            .inner
            .prepare(&format!("SELECT {COLUMNS} FROM report ORDER BY created_at"))?;
        let rows = stmt.query_map([], RawReport::from_row)?;
        let reports = rows
            .map(|raw| raw?.into_report())
            .collect::<Result<Vec<_>>>()?;
        Ok(reports)
    }
}

/// A report row as `SQLite` hands it back, before parsing.
struct RawReport {
    id: String,
    owner: String,
    title: String,
    contact: Option<String>,
    has_progress: bool,
    status: String,
    last_updated_by: String,
    last_updated_progress_at: Option<String>,
    potentially_resolved_at: Option<String>,
    admin_override: bool,
    created_at: String,
}

impl RawReport {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner: row.get(1)?,
            title: row.get(2)?,
            contact: row.get(3)?,
            has_progress: row.get(4)?,
            status: row.get(5)?,
            last_updated_by: row.get(6)?,
            last_updated_progress_at: row.get(7)?,
            potentially_resolved_at: row.get(8)?,
            admin_override: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    fn into_report(self) -> Result<Report> {
        let optional_timestamp = |column: &str, text: Option<String>| {
            text.map(|t| parse_timestamp(column, &t)).transpose()
        };

        Ok(Report {
            id: parse_uuid("report id", &self.id)?,
            owner: self.owner,
            title: self.title,
            contact: self.contact,
            has_progress: self.has_progress,
            status: self
                .status
                .parse::<ReportStatus>()
                .map_err(|e| StorageError::Corrupt(e.to_string()))?,
            last_updated_by: self
                .last_updated_by
                .parse::<UpdatedBy>()
                .map_err(|e| StorageError::Corrupt(e.to_string()))?,
            last_updated_progress_at: optional_timestamp(
                "last_updated_progress_at",
                self.last_updated_progress_at,
            )?,
            potentially_resolved_at: optional_timestamp(
                "potentially_resolved_at",
                self.potentially_resolved_at,
            )?,
            admin_override: self.admin_override,
            created_at: parse_timestamp("created_at", &self.created_at)?,
        })
    }
}
