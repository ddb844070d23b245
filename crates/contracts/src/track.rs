//! StreamTrack / 容量快照 - Stream Registry 输出

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{DataType, RobotId};

/// 轨道类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackKind {
    Joints,
    Rgb,
    Depth,
    Language,
    Gripper,
    EndEffectorPose,
    ParallelGripperOpenAmount,
    SuctionGripper,
    PointCloud,
    Pose,
    Custom,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Joints => "JOINTS",
            TrackKind::Rgb => "RGB",
            TrackKind::Depth => "DEPTH",
            TrackKind::Language => "LANGUAGE",
            TrackKind::Gripper => "GRIPPER",
            TrackKind::EndEffectorPose => "END_EFFECTOR_POSE",
            TrackKind::ParallelGripperOpenAmount => "PARALLEL_GRIPPER_OPEN_AMOUNT",
            TrackKind::SuctionGripper => "SUCTION_GRIPPER",
            TrackKind::PointCloud => "POINT_CLOUD",
            TrackKind::Pose => "POSE",
            TrackKind::Custom => "CUSTOM",
        }
    }

    /// 该轨道承载的数据类型
    pub fn data_types(&self) -> &'static [DataType] {
        match self {
            TrackKind::Joints => &[
                DataType::JointPositions,
                DataType::JointVelocities,
                DataType::JointTorques,
                DataType::JointTargetPositions,
            ],
            TrackKind::Rgb => &[DataType::RgbImage],
            TrackKind::Depth => &[DataType::DepthImage],
            TrackKind::Language => &[DataType::Language],
            TrackKind::Gripper => &[DataType::EndEffectors],
            TrackKind::EndEffectorPose => &[DataType::EndEffectorPoses],
            TrackKind::ParallelGripperOpenAmount => &[DataType::ParallelGripperOpenAmounts],
            TrackKind::SuctionGripper => &[DataType::SuctionGripperActive],
            TrackKind::PointCloud => &[DataType::PointCloud],
            TrackKind::Pose => &[DataType::Poses],
            TrackKind::Custom => &[DataType::Custom],
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 已发布轨道，创建后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamTrack {
    pub robot_id: RobotId,
    pub robot_instance: u32,
    /// 生产者媒体会话 ID，同时作为生产者的 peer id
    pub stream_id: String,
    pub kind: TrackKind,
    pub label: String,
    pub mid: String,
    pub id: String,
    pub created_at: DateTime<Utc>,
}

/// 发布请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackSpec {
    pub kind: TrackKind,
    pub label: String,
    pub mid: String,
    pub stream_id: String,
}

impl TrackSpec {
    pub fn new(
        kind: TrackKind,
        label: impl Into<String>,
        mid: impl Into<String>,
        stream_id: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            label: label.into(),
            mid: mid.into(),
            stream_id: stream_id.into(),
        }
    }
}

/// 单个实例的容量视图
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AvailableRobotInstance {
    pub robot_instance: u32,
    pub tracks: BTreeMap<TrackKind, Vec<StreamTrack>>,
    pub connections: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AvailableRobot {
    pub robot_id: RobotId,
    pub instances: BTreeMap<u32, AvailableRobotInstance>,
}

/// 发现广播载荷
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AvailableRobotCapacityUpdate {
    pub robots: Vec<AvailableRobot>,
}

impl AvailableRobotCapacityUpdate {
    pub fn instance(&self, robot_id: &str, instance: u32) -> Option<&AvailableRobotInstance> {
        self.robots
            .iter()
            .find(|r| r.robot_id == robot_id)
            .and_then(|r| r.instances.get(&instance))
    }
}
