//! Registry errors

use contracts::{Classify, ErrorKind, InstanceKey};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("robot instance not found: {0}")]
    InstanceNotFound(InstanceKey),

    #[error("instance {key} is at capacity ({max} connections)")]
    CapacityExceeded { key: InstanceKey, max: u32 },

    #[error("instance {0} has no pending reservation")]
    NoReservation(InstanceKey),
}

impl Classify for RegistryError {
    fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::InstanceNotFound(_) => ErrorKind::NotFound,
            RegistryError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            RegistryError::NoReservation(_) => ErrorKind::InvalidTransition,
        }
    }
}
