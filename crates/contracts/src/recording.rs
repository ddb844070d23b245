//! Recording notifications - Recording Coordinator output

use serde::{Deserialize, Serialize};

use crate::{DataType, InstanceKey, RobotId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordingNotificationType {
    /// Snapshot of pending/active recordings, sent first to every subscriber
    Init,
    Requested,
    Start,
    Stop,
    Saved,
    Discarded,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingUpdatePayload {
    pub recording_id: String,
    pub robot_id: RobotId,
    pub instance: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingRequestedPayload {
    pub recording_id: String,
    pub robot_id: RobotId,
    pub instance: u32,
    pub created_by: String,
    pub dataset_ids: Vec<String>,
    pub data_types: Vec<DataType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingStartPayload {
    pub recording_id: String,
    pub robot_id: RobotId,
    pub instance: u32,
    pub created_by: String,
    pub dataset_ids: Vec<String>,
    pub data_types: Vec<DataType>,
    pub start_time: f64,
}

/// Entry of an `INIT` snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActiveRecording {
    Started(RecordingStartPayload),
    Requested(RecordingRequestedPayload),
}

/// Notification payload; the variant follows the notification type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordingPayload {
    Snapshot(Vec<ActiveRecording>),
    Start(RecordingStartPayload),
    Requested(RecordingRequestedPayload),
    Update(RecordingUpdatePayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingNotification {
    #[serde(rename = "type")]
    pub notification_type: RecordingNotificationType,
    pub payload: RecordingPayload,
    pub id: String,
}

impl RecordingNotification {
    /// Recording id the notification refers to (`None` for `INIT`)
    pub fn recording_id(&self) -> Option<&str> {
        match &self.payload {
            RecordingPayload::Snapshot(_) => None,
            RecordingPayload::Start(p) => Some(&p.recording_id),
            RecordingPayload::Requested(p) => Some(&p.recording_id),
            RecordingPayload::Update(p) => Some(&p.recording_id),
        }
    }
}

impl RecordingUpdatePayload {
    pub fn new(recording_id: impl Into<String>, key: &InstanceKey) -> Self {
        Self {
            recording_id: recording_id.into(),
            robot_id: key.robot_id.clone(),
            instance: key.instance,
        }
    }
}
