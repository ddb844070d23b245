//! Connection attempt state machine

use std::fmt;

use contracts::MessageType;
use tokio::time::Instant;

/// Why an attempt failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    HandshakeTimeout,
    ProtocolViolation(String),
    Rejected(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::HandshakeTimeout => f.write_str("handshake timeout"),
            FailureReason::ProtocolViolation(msg) => write!(f, "protocol violation: {msg}"),
            FailureReason::Rejected(reason) => write!(f, "rejected: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Requested,
    Offered,
    Answered,
    IceExchanging,
    Connected,
    Failed(FailureReason),
    Closed,
}

impl ConnectionState {
    /// Transition table for relayed messages. `None` means the message is
    /// illegal in this state.
    pub fn on_message(&self, message_type: MessageType) -> Option<ConnectionState> {
        use ConnectionState::*;
        match (self, message_type) {
            (Requested, MessageType::OpenConnection) => Some(Requested),
            (Requested, MessageType::SdpOffer) => Some(Offered),
            (Offered, MessageType::SdpAnswer) => Some(Answered),
            (Answered | IceExchanging, MessageType::IceCandidate) => Some(IceExchanging),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed(_) | ConnectionState::Closed)
    }

    /// Still negotiating: a deadline is armed
    pub fn is_handshaking(&self) -> bool {
        matches!(
            self,
            ConnectionState::Requested
                | ConnectionState::Offered
                | ConnectionState::Answered
                | ConnectionState::IceExchanging
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Requested => "requested",
            ConnectionState::Offered => "offered",
            ConnectionState::Answered => "answered",
            ConnectionState::IceExchanging => "ice_exchanging",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed(_) => "failed",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Failed(reason) => write!(f, "failed ({reason})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// What the attempt currently holds in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Hold {
    Reservation,
    Connection,
    Nothing,
}

/// Value guarded by an attempt's `StateGate`
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Phase {
    pub state: ConnectionState,
    pub last_heartbeat: Option<Instant>,
    /// Set while a connected peer has missed its heartbeat
    pub dead_since: Option<Instant>,
}

impl Phase {
    pub fn requested() -> Self {
        Self {
            state: ConnectionState::Requested,
            last_heartbeat: None,
            dead_since: None,
        }
    }

    pub fn with_state(&self, state: ConnectionState) -> Self {
        Self {
            state,
            ..self.clone()
        }
    }

    pub fn hold(&self) -> Hold {
        match self.state {
            _ if self.state.is_handshaking() => Hold::Reservation,
            ConnectionState::Connected if self.dead_since.is_none() => Hold::Connection,
            _ => Hold::Nothing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_table() {
        let s = ConnectionState::Requested;
        let s = s.on_message(MessageType::OpenConnection).unwrap();
        assert_eq!(s, ConnectionState::Requested);
        let s = s.on_message(MessageType::SdpOffer).unwrap();
        let s = s.on_message(MessageType::SdpAnswer).unwrap();
        let s = s.on_message(MessageType::IceCandidate).unwrap();
        let s = s.on_message(MessageType::IceCandidate).unwrap();
        assert_eq!(s, ConnectionState::IceExchanging);
    }

    #[test]
    fn test_illegal_messages() {
        assert!(ConnectionState::Requested
            .on_message(MessageType::SdpAnswer)
            .is_none());
        assert!(ConnectionState::Offered
            .on_message(MessageType::IceCandidate)
            .is_none());
        assert!(ConnectionState::Connected
            .on_message(MessageType::SdpOffer)
            .is_none());
        assert!(ConnectionState::Closed
            .on_message(MessageType::IceCandidate)
            .is_none());
    }

    #[test]
    fn test_holds() {
        let phase = Phase::requested();
        assert_eq!(phase.hold(), Hold::Reservation);
        let mut connected = phase.with_state(ConnectionState::Connected);
        assert_eq!(connected.hold(), Hold::Connection);
        connected.dead_since = Some(Instant::now());
        assert_eq!(connected.hold(), Hold::Nothing);
        assert_eq!(phase.with_state(ConnectionState::Closed).hold(), Hold::Nothing);
    }
}
