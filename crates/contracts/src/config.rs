//! Runtime configuration contracts shared across crates.
//!
//! Field-level rules are declared with `validator`; cross-field rules live
//! in `config_loader`.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Sync engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SyncEngineConfig {
    /// Default output frequency of live cursors (Hz)
    #[serde(default = "default_output_frequency")]
    #[validate(range(exclusive_min = 0.0, max = 1000.0))]
    pub output_frequency_hz: f64,

    /// Alignment tolerance in milliseconds. No default: the platform must
    /// choose one explicitly.
    #[validate(range(min = 0.0))]
    pub tolerance_ms: f64,

    /// Samples retained per slot
    #[serde(default = "default_history_depth")]
    #[validate(range(min = 2, max = 65536))]
    pub history_depth: usize,

    /// Per-cursor output queue (overwrite-oldest once full)
    #[serde(default = "default_queue_capacity")]
    #[validate(range(min = 1))]
    pub queue_capacity: usize,

    /// Per-instance command channel; samples are dropped when it is full
    #[serde(default = "default_command_capacity")]
    #[validate(range(min = 1))]
    pub command_capacity: usize,

    #[serde(default)]
    pub pacing: PacingMode,

    /// Wall-clock pacing interval
    #[serde(default = "default_pacing_interval")]
    #[validate(range(min = 1, max = 10000))]
    pub pacing_interval_ms: u64,
}

impl SyncEngineConfig {
    pub fn with_tolerance_ms(tolerance_ms: f64) -> Self {
        Self {
            output_frequency_hz: default_output_frequency(),
            tolerance_ms,
            history_depth: default_history_depth(),
            queue_capacity: default_queue_capacity(),
            command_capacity: default_command_capacity(),
            pacing: PacingMode::default(),
            pacing_interval_ms: default_pacing_interval(),
        }
    }

    pub fn tolerance_s(&self) -> f64 {
        self.tolerance_ms / 1000.0
    }

    pub fn pacing_interval(&self) -> Duration {
        Duration::from_millis(self.pacing_interval_ms)
    }
}

fn default_output_frequency() -> f64 {
    10.0
}

fn default_history_depth() -> usize {
    256
}

fn default_queue_capacity() -> usize {
    64
}

fn default_command_capacity() -> usize {
    1024
}

fn default_pacing_interval() -> u64 {
    10
}

/// What advances the sync engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacingMode {
    #[default]
    WallClock,
    /// Advanced explicitly (replay / offline processing)
    External,
}

/// Stream registry configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegistryConfig {
    #[serde(default = "default_max_connections")]
    #[validate(range(min = 1, max = 10000))]
    pub max_connections_per_instance: u32,

    /// Discovery broadcast buffer; lagging subscribers re-snapshot
    #[serde(default = "default_event_capacity")]
    #[validate(range(min = 1))]
    pub event_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_connections_per_instance: default_max_connections(),
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_max_connections() -> u32 {
    4
}

fn default_event_capacity() -> usize {
    256
}

/// Session broker configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BrokerConfig {
    /// Deadline for each handshake step
    #[serde(default = "default_handshake_timeout")]
    #[validate(range(min = 1))]
    pub handshake_timeout_ms: u64,

    /// A connected stream without heartbeat for this long is marked dead
    #[serde(default = "default_heartbeat_timeout")]
    #[validate(range(min = 1))]
    pub heartbeat_timeout_ms: u64,

    /// Dead connections are forgotten after this long
    #[serde(default = "default_dead_retention")]
    #[validate(range(min = 1))]
    pub dead_retention_ms: u64,

    #[serde(default = "default_liveness_interval")]
    #[validate(range(min = 1))]
    pub liveness_check_interval_ms: u64,

    /// Per-call timeout for the token validator
    #[serde(default = "default_collaborator_timeout")]
    #[validate(range(min = 1))]
    pub collaborator_timeout_ms: u64,

    #[serde(default = "default_event_capacity")]
    #[validate(range(min = 1))]
    pub event_capacity: usize,
}

impl BrokerConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn dead_retention(&self) -> Duration {
        Duration::from_millis(self.dead_retention_ms)
    }

    pub fn liveness_check_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_check_interval_ms)
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.collaborator_timeout_ms)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: default_handshake_timeout(),
            heartbeat_timeout_ms: default_heartbeat_timeout(),
            dead_retention_ms: default_dead_retention(),
            liveness_check_interval_ms: default_liveness_interval(),
            collaborator_timeout_ms: default_collaborator_timeout(),
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_handshake_timeout() -> u64 {
    10_000
}

fn default_heartbeat_timeout() -> u64 {
    15_000
}

fn default_dead_retention() -> u64 {
    60_000
}

fn default_liveness_interval() -> u64 {
    1_000
}

fn default_collaborator_timeout() -> u64 {
    2_000
}

/// Recording coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RecordingConfig {
    /// A requested recording that is not started within this window expires.
    /// No default.
    #[validate(range(exclusive_min = 0.0))]
    pub grace_period_s: f64,

    /// A started recording that is not stopped within this window expires
    #[serde(default = "default_max_duration")]
    #[validate(range(exclusive_min = 0.0))]
    pub max_duration_s: f64,

    /// Recording cursor frequency; falls back to the sync output frequency
    #[serde(default)]
    #[validate(range(exclusive_min = 0.0, max = 1000.0))]
    pub frequency_hz: Option<f64>,

    #[serde(default = "default_true")]
    pub allow_concurrent_per_instance: bool,

    /// Per-call timeout for the storage collaborator
    #[serde(default = "default_storage_timeout")]
    #[validate(range(min = 1))]
    pub storage_timeout_ms: u64,

    #[serde(default = "default_event_capacity")]
    #[validate(range(min = 1))]
    pub notification_capacity: usize,
}

impl RecordingConfig {
    pub fn with_grace_period(grace_period_s: f64) -> Self {
        Self {
            grace_period_s,
            max_duration_s: default_max_duration(),
            frequency_hz: None,
            allow_concurrent_per_instance: true,
            storage_timeout_ms: default_storage_timeout(),
            notification_capacity: default_event_capacity(),
        }
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs_f64(self.grace_period_s)
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs_f64(self.max_duration_s)
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }
}

fn default_max_duration() -> f64 {
    3600.0
}

fn default_true() -> bool {
    true
}

fn default_storage_timeout() -> u64 {
    30_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tolerance_is_required() {
        let err = serde_json::from_str::<SyncEngineConfig>(r#"{"output_frequency_hz": 10.0}"#);
        assert!(err.is_err());

        let cfg: SyncEngineConfig = serde_json::from_str(r#"{"tolerance_ms": 100.0}"#).unwrap();
        assert_eq!(cfg.tolerance_s(), 0.1);
        assert_eq!(cfg.pacing, PacingMode::WallClock);
    }

    #[test]
    fn test_grace_period_is_required() {
        assert!(serde_json::from_str::<RecordingConfig>("{}").is_err());
        let cfg: RecordingConfig = serde_json::from_str(r#"{"grace_period_s": 5}"#).unwrap();
        assert!(cfg.allow_concurrent_per_instance);
    }

    #[test]
    fn test_validator_ranges() {
        let mut cfg = SyncEngineConfig::with_tolerance_ms(50.0);
        assert!(cfg.validate().is_ok());
        cfg.output_frequency_hz = 0.0;
        assert!(cfg.validate().is_err());

        let mut rec = RecordingConfig::with_grace_period(1.0);
        rec.grace_period_s = 0.0;
        assert!(rec.validate().is_err());
    }
}
