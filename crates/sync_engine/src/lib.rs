//! # Sync Engine
//!
//! 多模态遥测数据同步引擎。
//!
//! 负责：
//! - 每种数据类型一个槽位，保留有界的历史样本
//! - 多个独立输出游标（频率、容差、起点、数据类型过滤）
//! - 按容差规则选取最近样本，输出有序的 `SyncPoint`
//! - 录制游标与 `SyncedData` 封存
//! - 每个机器人实例一个 worker 任务
//!
//! ## 使用示例
//!
//! ```ignore
//! use sync_engine::{CursorSpec, SyncService};
//!
//! let service = SyncService::new(config, registry.clone());
//! service.push_sample(&key, sample)?;
//!
//! let mut stream = service.subscribe(&key, CursorSpec::new(10.0)).await?;
//! while let Some(point) = stream.next().await {
//!     // Handle synchronized point
//! }
//! ```

mod cursor;
mod engine;
mod error;
mod history;
mod pacing;
mod service;
mod slots;

pub use cursor::{CursorQueue, CursorSpec, SyncStream, SyncedDataBuilder};
pub use engine::{EngineStats, SyncEngine};
pub use error::SyncError;
pub use pacing::{wall_clock_now, ManualPacer, PacingHandle, WallClockPacer};
pub use service::{PushOutcome, RecordingCursor, SyncService};

// Re-export contracts types
pub use contracts::{PacingMode, SamplePoint, SyncEngineConfig, SyncPoint, SyncedData};
