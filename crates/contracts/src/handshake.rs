//! Handshake / connection negotiation messages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::RobotId;

/// Handshake message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    SdpOffer,
    SdpAnswer,
    IceCandidate,
    OpenConnection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VideoFormat {
    #[default]
    WebRtcNegotiated,
    NeuracoreCustom,
}

/// Message relayed between the two peers of a connection attempt.
/// `data` is opaque to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeMessage {
    pub from_id: String,
    pub to_id: String,
    pub data: String,
    pub connection_id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl HandshakeMessage {
    pub fn new(
        message_type: MessageType,
        connection_id: impl Into<String>,
        from_id: impl Into<String>,
        to_id: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        Self {
            from_id: from_id.into(),
            to_id: to_id.into(),
            data: data.into(),
            connection_id: connection_id.into(),
            message_type,
            id: None,
        }
    }
}

/// Consumer-side request to open a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenConnectionDetails {
    pub connection_token: String,
    pub robot_id: RobotId,
    pub robot_instance: u32,
    #[serde(default)]
    pub video_format: VideoFormat,
}

/// Broker-issued connection request, sent to the producer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenConnectionRequest {
    pub from_id: String,
    pub to_id: String,
    pub robot_id: RobotId,
    pub robot_instance: u32,
    pub video_format: VideoFormat,
    pub id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamAliveResponse {
    pub resurrected: bool,
}
