//! Sync engine errors

use contracts::{Classify, DataType, ErrorKind, InstanceKey};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    /// Sample older than the last accepted one for the same slot
    #[error("out-of-order {data_type} sample at {timestamp} (last accepted {last_accepted})")]
    OutOfOrderSample {
        data_type: DataType,
        timestamp: f64,
        last_accepted: f64,
    },

    #[error("invalid {data_type} sample: {reason}")]
    InvalidSample { data_type: DataType, reason: String },

    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("robot instance not found: {0}")]
    InstanceNotFound(InstanceKey),

    #[error("cursor {0} not found")]
    CursorNotFound(usize),

    #[error("cursor {0} is not a recording cursor")]
    NotRecordingCursor(usize),

    /// The instance worker has shut down
    #[error("sync worker for {0} is unavailable")]
    WorkerUnavailable(InstanceKey),
}

impl SyncError {
    pub fn invalid_cursor(message: impl Into<String>) -> Self {
        Self::InvalidCursor(message.into())
    }
}

impl Classify for SyncError {
    fn kind(&self) -> ErrorKind {
        match self {
            SyncError::OutOfOrderSample { .. } => ErrorKind::OutOfOrderSample,
            SyncError::InvalidSample { .. } | SyncError::InvalidCursor(_) => {
                ErrorKind::InvalidInput
            }
            SyncError::InstanceNotFound(_) | SyncError::CursorNotFound(_) => ErrorKind::NotFound,
            SyncError::NotRecordingCursor(_) => ErrorKind::InvalidTransition,
            SyncError::WorkerUnavailable(_) => ErrorKind::Unavailable,
        }
    }
}
