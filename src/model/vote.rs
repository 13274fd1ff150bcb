//! Vote types: one citizen's current opinion on a report.

use std::{fmt, str::FromStr};

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ReportStatus, UnknownVariant};

/// A user's current vote on a report. At most one per (user, report).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub report_id: Uuid,
    pub user: String,
    pub vote_type: VoteType,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Vote {
    pub fn new(report_id: Uuid, user: &str, vote_type: VoteType, now: Timestamp) -> Self {
        Self {
            report_id,
            user: user.to_string(),
            vote_type,
            created_at: now,
            updated_at: now,
        }
    }
}

/// What a voter says about the report's real-world state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoteType {
    Resolved,
    OnProgress,
    NotResolved,
}

impl VoteType {
    /// Tie-break order: earlier wins when counts are equal.
    pub const PRIORITY: [Self; 3] = [Self::Resolved, Self::OnProgress, Self::NotResolved];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Resolved => "RESOLVED",
            Self::OnProgress => "ON_PROGRESS",
            Self::NotResolved => "NOT_RESOLVED",
        }
    }

    /// The report status a winning vote of this type drives toward.
    pub fn status(self) -> ReportStatus {
        match self {
            Self::Resolved => ReportStatus::PotentiallyResolved,
            Self::OnProgress => ReportStatus::OnProgress,
            Self::NotResolved => ReportStatus::NotResolved,
        }
    }
}

impl fmt::Display for VoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoteType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::PRIORITY
            .into_iter()
            .find(|vote_type| vote_type.as_str() == s)
            .ok_or_else(|| UnknownVariant {
                what: "vote type",
                value: s.to_string(),
            })
    }
}
