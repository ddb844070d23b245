//! Recording errors

use contracts::{Classify, CollaboratorError, ErrorKind, InstanceKey};
use sync_engine::SyncError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("recording not found: {0}")]
    NotFound(String),

    #[error("recording {0} already exists")]
    AlreadyExists(String),

    /// Concurrent recordings on one instance are disabled
    #[error("instance {key} already has active recording {active}")]
    Conflict { key: InstanceKey, active: String },

    /// Operation illegal in the current state; nothing changed
    #[error("cannot {operation} recording {recording_id} in state {state}")]
    InvalidTransition {
        recording_id: String,
        state: &'static str,
        operation: &'static str,
    },

    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Storage failed; the recording has been discarded
    #[error("failed to store recording {recording_id}: {source}")]
    Storage {
        recording_id: String,
        #[source]
        source: CollaboratorError,
    },
}

impl RecordingError {
    pub fn invalid_transition(
        recording_id: &str,
        state: &'static str,
        operation: &'static str,
    ) -> Self {
        Self::InvalidTransition {
            recording_id: recording_id.to_string(),
            state,
            operation,
        }
    }
}

impl Classify for RecordingError {
    fn kind(&self) -> ErrorKind {
        match self {
            RecordingError::NotFound(_) => ErrorKind::NotFound,
            RecordingError::AlreadyExists(_)
            | RecordingError::Conflict { .. }
            | RecordingError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            RecordingError::Sync(e) => e.kind(),
            RecordingError::Storage { source, .. } => source.kind(),
        }
    }
}
