//! Progress types: the owner's append-only account of work on a report.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ReportStatus;

/// Most attachments a single progress entry may reference.
pub const MAX_ATTACHMENTS: usize = 2;

/// One owner-authored progress entry. Never edited once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub id: Uuid,
    pub report_id: Uuid,
    pub author: String,

    /// The status the owner proposes. `Resolved` finalizes the report outright.
    pub status: ReportStatus,

    pub notes: String,

    /// References to uploaded files. Uploading itself happens elsewhere.
    pub attachments: Vec<String>,

    pub created_at: Timestamp,
}
