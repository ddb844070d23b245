//! # Recording
//!
//! 录制生命周期协调器。
//!
//! `INIT → REQUESTED → STARTED → STOPPED → {SAVED | DISCARDED}`，
//! 宽限期内未开始或超过最大录制时长进入 `EXPIRED`。
//!
//! 录制游标挂在实例的同步 worker 上；`stop` 封存 `SyncedData` 并交给
//! `RecordingStorage`（有界超时，瞬时失败重试一次）。

mod coordinator;
mod error;
mod feed;
mod state;

pub use coordinator::{RecordingCoordinator, RecordingRequest, StopOutcome};
pub use error::RecordingError;
pub use feed::NotificationFeed;
pub use state::RecordingState;
