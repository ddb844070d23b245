//! # Ingestion Pipeline
//!
//! 机器人样本接入模块。
//!
//! 职责：
//! - 为每个机器人实例发布轨道 (StreamRegistry)
//! - 注册样本源 (Mock 或外部桥接)，统一经 `SampleSource` 接入
//! - 将样本推送到同步引擎，队列满时丢弃并计数
//! - 停止时撤回轨道
//!
//! ## Usage Example
//!
//! ```ignore
//! use ingestion::{IngestionPipeline, MockSampleSource, RobotAdapter};
//!
//! let mut adapter = RobotAdapter::new(key, "producer-1", registry.clone(), sync.clone());
//! adapter.add_source(Box::new(MockSampleSource::new(config)))?;
//!
//! let mut pipeline = IngestionPipeline::new();
//! pipeline.register_robot(adapter)?;
//! pipeline.start_all()?;
//! ```

mod adapter;
mod error;
mod metrics;
mod mock;
mod pipeline;

pub use adapter::{simulated_producer_id, RobotAdapter};
pub use contracts::{SampleCallback, SampleSource};
pub use error::{IngestionError, Result};
pub use metrics::{IngestionMetrics, MetricsSnapshot};
pub use mock::{MockSampleSource, MockSourceConfig};
pub use pipeline::IngestionPipeline;
