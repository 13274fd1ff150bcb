//! Report types: the unit the crowd votes on.

use std::{fmt, str::FromStr};

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UnknownVariant;

/// A civic-issue report and where it stands in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: Uuid,

    /// The user who filed the report. Supplied by the identity layer, trusted as-is.
    pub owner: String,

    pub title: String,

    /// Where status emails for this report go.
    /// Reminders are skipped when the owner left no contact.
    pub contact: Option<String>,

    /// Whether the report tracks progress at all.
    /// Information-only reports never take votes and never auto-resolve.
    pub has_progress: bool,

    pub status: ReportStatus,

    /// Who made the last status change: the consensus engine or the owner.
    pub last_updated_by: UpdatedBy,

    /// When the status last changed. The expiration sweep measures staleness from here.
    pub last_updated_progress_at: Option<Timestamp>,

    /// When the report entered `PotentiallyResolved`. Only meaningful in that state.
    pub potentially_resolved_at: Option<Timestamp>,

    /// Set once the owner finalized the report by hand.
    pub admin_override: bool,

    pub created_at: Timestamp,
}

/// What the reporting user provides when filing a report.
#[derive(Debug, Clone)]
pub struct NewReport {
    pub owner: String,
    pub title: String,
    pub contact: Option<String>,
    pub has_progress: bool,
}

impl Report {
    /// Files a new report. Every report starts out `Waiting`.
    pub fn file(new: NewReport, now: Timestamp) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: new.owner,
            title: new.title,
            contact: new.contact,
            has_progress: new.has_progress,
            status: ReportStatus::Waiting,
            last_updated_by: UpdatedBy::System,
            last_updated_progress_at: Some(now),
            potentially_resolved_at: None,
            admin_override: false,
            created_at: now,
        }
    }

    pub fn is_owned_by(&self, user: &str) -> bool {
        self.owner == user
    }
}

/// Lifecycle states of a report.
///
/// ```text
/// Waiting ──► OnProgress ──► PotentiallyResolved ──► Resolved
///    │  ▲          │  ▲              ▲
///    │  └───── NotResolved ◄─────────┘ (votes)
///    └──────────────┴──► Expired
/// ```
///
/// `Resolved` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    Waiting,
    OnProgress,
    PotentiallyResolved,
    Resolved,
    NotResolved,
    Expired,
}

impl ReportStatus {
    pub const ALL: [Self; 6] = [
        Self::Waiting,
        Self::OnProgress,
        Self::PotentiallyResolved,
        Self::Resolved,
        Self::NotResolved,
        Self::Expired,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::OnProgress => "ON_PROGRESS",
            Self::PotentiallyResolved => "POTENTIALLY_RESOLVED",
            Self::Resolved => "RESOLVED",
            Self::NotResolved => "NOT_RESOLVED",
            Self::Expired => "EXPIRED",
        }
    }

    /// No transition leaves a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Expired)
    }

    /// Statuses an owner may propose in a progress entry.
    pub fn is_progress_proposal(self) -> bool {
        matches!(self, Self::OnProgress | Self::NotResolved | Self::Resolved)
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownVariant {
                what: "report status",
                value: s.to_string(),
            })
    }
}

/// Who made the last status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdatedBy {
    /// The consensus engine, the auto-resolve task, or a sweep.
    System,

    /// The report owner, through a progress upload.
    Owner,
}

impl UpdatedBy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "SYSTEM",
            Self::Owner => "OWNER",
        }
    }
}

impl fmt::Display for UpdatedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdatedBy {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SYSTEM" => Ok(Self::System),
            "OWNER" => Ok(Self::Owner),
            other => Err(UnknownVariant {
                what: "updater",
                value: other.to_string(),
            }),
        }
    }
}
