//! Domain error type for the segmentation and merge engine.
//!
//! [`AnalysisError`] is the closed set of failures the core surfaces. Some of
//! them are signals rather than faults: [`AnalysisError::AlreadyClaimed`] means a
//! duplicate submission, and [`AnalysisError::VersionConflict`] is retried by the
//! orchestrator before it ever reaches a caller.

use thiserror::Error;

use crate::journal::types::ChunkStatus;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("chunk {0} is already claimed or finished")]
    AlreadyClaimed(String),

    #[error("another fragment for {username} on {day} is being processed")]
    DayBusy { username: String, day: String },

    #[error("invalid transition for chunk {chunk_id}: {from} -> {to}")]
    InvalidTransition {
        chunk_id: String,
        from: ChunkStatus,
        to: ChunkStatus,
    },

    #[error("claim on chunk {0} is no longer held by this worker")]
    ClaimLost(String),

    #[error("chunk {chunk_id} exhausted its {attempts} attempts")]
    RetriesExhausted { chunk_id: String, attempts: u32 },

    #[error("event {event_id} was modified concurrently (expected version {expected}, found {found})")]
    VersionConflict {
        event_id: String,
        expected: i64,
        found: i64,
    },

    #[error("gave up after {attempts} conflicting writes, try again")]
    TransientConflict { attempts: u32 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("storage unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("stored data is corrupt: {0}")]
    Corrupt(String),
}

impl AnalysisError {
    /// Whether the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DayBusy { .. } | Self::TransientConflict { .. } | Self::ServiceUnavailable(_)
        )
    }

    /// Programming or integrity errors; these should never reach an end user as advice.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. } | Self::ClaimLost(_) | Self::Corrupt(_)
        )
    }
}

impl From<rusqlite::Error> for AnalysisError {
    fn from(e: rusqlite::Error) -> Self {
        Self::ServiceUnavailable(e.to_string())
    }
}

impl From<serde_json::Error> for AnalysisError {
    fn from(e: serde_json::Error) -> Self {
        Self::Corrupt(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
