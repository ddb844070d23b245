use std::fmt;

use contracts::RecordingNotificationType;

/// Lifecycle of one recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordingState {
    Requested,
    Started,
    /// Sealed, waiting for the storage outcome
    Stopped,
    Saved,
    Discarded,
    Expired,
}

impl RecordingState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecordingState::Saved | RecordingState::Discarded | RecordingState::Expired
        )
    }

    /// Pending or running, i.e. occupies its instance
    pub fn is_active(&self) -> bool {
        matches!(self, RecordingState::Requested | RecordingState::Started)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingState::Requested => "requested",
            RecordingState::Started => "started",
            RecordingState::Stopped => "stopped",
            RecordingState::Saved => "saved",
            RecordingState::Discarded => "discarded",
            RecordingState::Expired => "expired",
        }
    }

    pub fn notification_type(&self) -> RecordingNotificationType {
        match self {
            RecordingState::Requested => RecordingNotificationType::Requested,
            RecordingState::Started => RecordingNotificationType::Start,
            RecordingState::Stopped => RecordingNotificationType::Stop,
            RecordingState::Saved => RecordingNotificationType::Saved,
            RecordingState::Discarded => RecordingNotificationType::Discarded,
            RecordingState::Expired => RecordingNotificationType::Expired,
        }
    }
}

impl fmt::Display for RecordingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
