use std::time::Duration;

use rusqlite::ErrorCode;
use uuid::Uuid;

use crate::{
    model::{MAX_ATTACHMENTS, ReportStatus},
    storage::StorageError,
    tasks::{QueueError, TaskError},
};

/// Errors surfaced by lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("you cannot vote on your own report")]
    OwnReport,

    #[error("report {0} is information-only and does not track progress")]
    NoProgress(Uuid),

    #[error("only the owner of report {0} can upload progress")]
    NotOwner(Uuid),

    #[error("{0} is not a valid progress status (expected ON_PROGRESS, NOT_RESOLVED or RESOLVED)")]
    InvalidProposal(ReportStatus),

    #[error("a progress entry may carry at most {max} attachments, got {0}", max = MAX_ATTACHMENTS)]
    TooManyAttachments(usize),

    #[error("{0} must not be empty")]
    MissingField(&'static str),

    #[error("report {id} is {status} and can no longer change")]
    Closed { id: Uuid, status: ReportStatus },

    #[error("report {0} is awaiting confirmation; only a RESOLVED update is accepted")]
    AwaitingResolution(Uuid),

    #[error("report not found: {0}")]
    NotFound(Uuid),

    #[error("integrity violation on report {id}: {reason}")]
    Integrity { id: Uuid, reason: &'static str },

    #[error("operation did not commit within {0:?}")]
    Timeout(Duration),

    #[error("the database stayed locked past the busy timeout")]
    Busy,

    #[error("storage error: {0}")]
    Store(#[source] StorageError),

    #[error("task queue error: {0}")]
    Queue(#[from] QueueError),
}

/// The caller-facing category of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request itself is wrong; nothing was written.
    Validation,
    /// The report is in a state that forbids the request.
    Conflict,
    NotFound,
    /// The store failed; the transaction rolled back and the call may be retried.
    Store,
    /// Stored state breaks a lifecycle invariant.
    Integrity,
    Timeout,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OwnReport
            | Self::NoProgress(_)
            | Self::NotOwner(_)
            | Self::InvalidProposal(_)
            | Self::TooManyAttachments(_)
            | Self::MissingField(_) => ErrorKind::Validation,
            Self::Closed { .. } | Self::AwaitingResolution(_) => ErrorKind::Conflict,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Integrity { .. } => ErrorKind::Integrity,
            Self::Timeout(_) | Self::Busy => ErrorKind::Timeout,
            Self::Store(_) | Self::Queue(_) => ErrorKind::Store,
        }
    }
}

impl From<StorageError> for EngineError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::ReportNotFound(id) => Self::NotFound(id),
            StorageError::Sqlite(rusqlite::Error::SqliteFailure(ref failure, _))
                if failure.code == ErrorCode::DatabaseBusy =>
            {
                Self::Busy
            }
            other => Self::Store(other),
        }
    }
}

/// Store trouble and timeouts are worth another attempt; everything else fails the same way twice.
impl From<EngineError> for TaskError {
    fn from(e: EngineError) -> Self {
        match e.kind() {
            ErrorKind::Store | ErrorKind::Timeout => Self::Retry(e.to_string()),
            _ => Self::Abort(e.to_string()),
        }
    }
}
