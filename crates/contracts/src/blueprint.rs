//! PlatformBlueprint - Config Loader 输出
//!
//! 描述完整的平台配置：注册表容量、同步策略、握手超时、录制策略、模拟机器人。

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{BrokerConfig, RecordingConfig, RegistryConfig, SyncEngineConfig, TrackKind};

/// 配置版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// 完整的平台配置蓝图
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PlatformBlueprint {
    /// 配置版本
    #[serde(default)]
    pub version: ConfigVersion,

    /// 注册表设置
    #[serde(default)]
    #[validate(nested)]
    pub registry: RegistryConfig,

    /// 同步策略
    #[validate(nested)]
    pub sync: SyncEngineConfig,

    /// 连接协商
    #[serde(default)]
    #[validate(nested)]
    pub broker: BrokerConfig,

    /// 录制策略
    #[validate(nested)]
    pub recording: RecordingConfig,

    /// 模拟机器人 (用于 `run` 命令)
    #[serde(default)]
    #[validate(nested)]
    pub robots: Vec<RobotBlueprint>,
}

/// 模拟机器人实例
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RobotBlueprint {
    /// 机器人 ID
    #[validate(length(min = 1))]
    pub robot_id: String,

    /// 实例编号
    #[serde(default)]
    pub instance: u32,

    /// 发布的轨道
    #[serde(default)]
    #[validate(nested)]
    pub tracks: Vec<TrackBlueprint>,
}

/// 模拟轨道
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TrackBlueprint {
    pub kind: TrackKind,

    /// 轨道标签 (RGB/DEPTH 用作相机名)
    #[validate(length(min = 1))]
    pub label: String,

    /// 采样频率 (Hz)，必须 > 0
    #[validate(range(exclusive_min = 0.0, max = 10000.0))]
    pub frequency_hz: f64,

    /// 时间戳抖动上限 (ms)
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub jitter_ms: f64,
}
