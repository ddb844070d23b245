//! Ingestion 错误类型

use contracts::{InstanceKey, TrackKind};
use thiserror::Error;

/// Ingestion 错误
#[derive(Debug, Error)]
pub enum IngestionError {
    /// 机器人已在采集
    #[error("robot {key} is already listening")]
    AlreadyListening { key: InstanceKey },

    /// 同一实例内 (kind, label) 重复
    #[error("robot {key} already has a {kind} source labelled '{label}'")]
    DuplicateSource {
        key: InstanceKey,
        kind: TrackKind,
        label: String,
    },

    /// 同一实例注册了两个适配器
    #[error("robot {key} is already registered")]
    DuplicateRobot { key: InstanceKey },
}

/// Ingestion Result 类型别名
pub type Result<T> = std::result::Result<T, IngestionError>;
