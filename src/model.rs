//! Core data model for Quorum.
//!
//! These types represent the lifecycle of a civic report:
//! the report itself, the crowd's votes on it, and the owner's progress log.

mod progress;
mod report;
mod vote;

pub use progress::{MAX_ATTACHMENTS, Progress};
pub use report::{NewReport, Report, ReportStatus, UpdatedBy};
pub use vote::{Vote, VoteType};

/// A status or vote string that doesn't name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {what}: {value}")]
pub struct UnknownVariant {
    pub what: &'static str,
    pub value: String,
}
