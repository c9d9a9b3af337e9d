use thiserror::Error;

use crate::types::ScheduleStatus;

/// Errors that can occur within the schedule store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No schedule with the given ID exists.
    #[error("Schedule not found: {id}")]
    NotFound { id: String },

    /// A schedule with the given ID already exists.
    #[error("Schedule already exists: {id}")]
    AlreadyExists { id: String },

    /// A compare-and-swap transition found a different status than expected.
    /// This means another writer got there first — callers treat it as
    /// "someone else already handled this", not as a failure.
    #[error("Conflict on {id}: expected {expected}, found {actual}")]
    Conflict {
        id: String,
        expected: ScheduleStatus,
        actual: ScheduleStatus,
    },

    /// The requested edge is not part of the schedule state machine.
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: ScheduleStatus,
        to: ScheduleStatus,
    },

    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Header map or result payload failed to (de)serialize.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be mapped back to a Schedule.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

impl StoreError {
    /// True for the lost-a-race case that every caller is expected to
    /// swallow rather than surface.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
