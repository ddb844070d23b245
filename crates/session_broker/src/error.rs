//! Broker errors

use contracts::{Classify, CollaboratorError, ErrorKind, RobotId};
use stream_registry::RegistryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("peer not attached: {0}")]
    PeerNotFound(String),

    #[error("token rejected for {robot_id}#{instance}")]
    Unauthorized { robot_id: RobotId, instance: u32 },

    /// The attempt has been aborted
    #[error("protocol violation on {connection_id}: {message}")]
    ProtocolViolation {
        connection_id: String,
        message: String,
    },

    /// Operation illegal in the current state; nothing changed
    #[error("cannot {operation} connection {connection_id} in state {state}")]
    InvalidTransition {
        connection_id: String,
        state: &'static str,
        operation: &'static str,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("token validator: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("failed to encode connection request: {0}")]
    Encode(#[from] serde_json::Error),
}

impl BrokerError {
    pub fn protocol_violation(connection_id: &str, message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            connection_id: connection_id.to_string(),
            message: message.into(),
        }
    }

    pub fn invalid_transition(
        connection_id: &str,
        state: &'static str,
        operation: &'static str,
    ) -> Self {
        Self::InvalidTransition {
            connection_id: connection_id.to_string(),
            state,
            operation,
        }
    }
}

impl Classify for BrokerError {
    fn kind(&self) -> ErrorKind {
        match self {
            BrokerError::ConnectionNotFound(_) | BrokerError::PeerNotFound(_) => {
                ErrorKind::NotFound
            }
            BrokerError::Unauthorized { .. } => ErrorKind::Unauthorized,
            BrokerError::ProtocolViolation { .. } => ErrorKind::ProtocolViolation,
            BrokerError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            BrokerError::Registry(e) => e.kind(),
            BrokerError::Collaborator(CollaboratorError::Timeout(_)) => ErrorKind::Timeout,
            BrokerError::Collaborator(_) => ErrorKind::Unavailable,
            BrokerError::Encode(_) => ErrorKind::InvalidInput,
        }
    }
}
