//! SamplePoint - 传感器适配器输出
//!
//! 单个模态的一次采样，带源时间戳。Sync Engine 的唯一输入。

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// 数据类型 (一个模态)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    JointPositions,
    JointVelocities,
    JointTorques,
    JointTargetPositions,
    EndEffectors,
    EndEffectorPoses,
    ParallelGripperOpenAmounts,
    SuctionGripperActive,
    RgbImage,
    DepthImage,
    PointCloud,
    Poses,
    Language,
    Custom,
}

impl DataType {
    pub const ALL: [DataType; 14] = [
        DataType::JointPositions,
        DataType::JointVelocities,
        DataType::JointTorques,
        DataType::JointTargetPositions,
        DataType::EndEffectors,
        DataType::EndEffectorPoses,
        DataType::ParallelGripperOpenAmounts,
        DataType::SuctionGripperActive,
        DataType::RgbImage,
        DataType::DepthImage,
        DataType::PointCloud,
        DataType::Poses,
        DataType::Language,
        DataType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::JointPositions => "JOINT_POSITIONS",
            DataType::JointVelocities => "JOINT_VELOCITIES",
            DataType::JointTorques => "JOINT_TORQUES",
            DataType::JointTargetPositions => "JOINT_TARGET_POSITIONS",
            DataType::EndEffectors => "END_EFFECTORS",
            DataType::EndEffectorPoses => "END_EFFECTOR_POSES",
            DataType::ParallelGripperOpenAmounts => "PARALLEL_GRIPPER_OPEN_AMOUNTS",
            DataType::SuctionGripperActive => "SUCTION_GRIPPER_ACTIVE",
            DataType::RgbImage => "RGB_IMAGE",
            DataType::DepthImage => "DEPTH_IMAGE",
            DataType::PointCloud => "POINT_CLOUD",
            DataType::Poses => "POSES",
            DataType::Language => "LANGUAGE",
            DataType::Custom => "CUSTOM",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 关节数据 (位置/速度/力矩/目标位置共用)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JointData {
    pub values: HashMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_values: Option<HashMap<String, f64>>,
}

/// 末端执行器开合量
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndEffectorData {
    pub open_amounts: HashMap<String, f64>,
}

/// 末端执行器位姿: name -> [x, y, z, qx, qy, qz, qw]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndEffectorPoseData {
    pub poses: HashMap<String, Vec<f64>>,
}

/// 平行夹爪开合量
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParallelGripperOpenAmountData {
    pub open_amounts: HashMap<String, f64>,
}

/// 吸盘夹爪开关状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuctionGripperActiveData {
    pub active: bool,
}

/// 位姿: name -> [x, y, z, rx, ry, rz]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseData {
    pub pose: HashMap<String, Vec<f64>>,
}

/// 相机帧。`frame_idx` 与标定原样透传
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraData {
    pub frame_idx: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extrinsics: Option<Vec<Vec<f64>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intrinsics: Option<Vec<Vec<f64>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<Bytes>,
}

/// 点云 (原始字节，不解析)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointCloudData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rgb_points: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extrinsics: Option<Vec<Vec<f64>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intrinsics: Option<Vec<Vec<f64>>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LanguageData {
    pub text: String,
}

/// 不透明载荷
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomData {
    pub data: Bytes,
}

/// 带源时间戳的数据。线上格式为 `{"timestamp": .., ..fields}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stamped<T> {
    pub timestamp: f64,
    #[serde(flatten)]
    pub value: T,
}

impl<T> Stamped<T> {
    pub fn new(timestamp: f64, value: T) -> Self {
        Self { timestamp, value }
    }
}

/// 采样载荷 (闭合枚举，每个数据类型一个变体)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "data_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SamplePayload {
    JointPositions(JointData),
    JointVelocities(JointData),
    JointTorques(JointData),
    JointTargetPositions(JointData),
    EndEffectors(EndEffectorData),
    EndEffectorPoses(EndEffectorPoseData),
    ParallelGripperOpenAmounts(ParallelGripperOpenAmountData),
    SuctionGripperActive(SuctionGripperActiveData),
    Poses(PoseData),
    RgbImage { camera: String, data: CameraData },
    DepthImage { camera: String, data: CameraData },
    PointCloud { sensor: String, data: PointCloudData },
    Language(LanguageData),
    Custom { name: String, data: CustomData },
}

impl SamplePayload {
    pub fn data_type(&self) -> DataType {
        match self {
            SamplePayload::JointPositions(_) => DataType::JointPositions,
            SamplePayload::JointVelocities(_) => DataType::JointVelocities,
            SamplePayload::JointTorques(_) => DataType::JointTorques,
            SamplePayload::JointTargetPositions(_) => DataType::JointTargetPositions,
            SamplePayload::EndEffectors(_) => DataType::EndEffectors,
            SamplePayload::EndEffectorPoses(_) => DataType::EndEffectorPoses,
            SamplePayload::ParallelGripperOpenAmounts(_) => DataType::ParallelGripperOpenAmounts,
            SamplePayload::SuctionGripperActive(_) => DataType::SuctionGripperActive,
            SamplePayload::Poses(_) => DataType::Poses,
            SamplePayload::RgbImage { .. } => DataType::RgbImage,
            SamplePayload::DepthImage { .. } => DataType::DepthImage,
            SamplePayload::PointCloud { .. } => DataType::PointCloud,
            SamplePayload::Language(_) => DataType::Language,
            SamplePayload::Custom { .. } => DataType::Custom,
        }
    }

    /// 同一数据类型下的子键 (相机名/点云传感器名/自定义名)
    pub fn key(&self) -> Option<&str> {
        match self {
            SamplePayload::RgbImage { camera, .. } | SamplePayload::DepthImage { camera, .. } => {
                Some(camera)
            }
            SamplePayload::PointCloud { sensor, .. } => Some(sensor),
            SamplePayload::Custom { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// 单次采样
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplePoint {
    /// 源时间戳 (seconds, f64)
    pub timestamp: f64,
    pub payload: SamplePayload,
}

impl SamplePoint {
    pub fn new(timestamp: f64, payload: SamplePayload) -> Self {
        Self { timestamp, payload }
    }

    pub fn data_type(&self) -> DataType {
        self.payload.data_type()
    }

    /// 形状校验: 时间戳有限、位姿数组长度正确
    pub fn validate(&self) -> Result<(), String> {
        if !self.timestamp.is_finite() {
            return Err(format!("non-finite timestamp {}", self.timestamp));
        }
        match &self.payload {
            SamplePayload::EndEffectorPoses(d) => check_arity(&d.poses, 7),
            SamplePayload::Poses(d) => check_arity(&d.pose, 6),
            _ => Ok(()),
        }
    }
}

fn check_arity(map: &HashMap<String, Vec<f64>>, expected: usize) -> Result<(), String> {
    match map.iter().find(|(_, v)| v.len() != expected) {
        Some((name, v)) => Err(format!(
            "pose '{}' has {} values, expected {}",
            name,
            v.len(),
            expected
        )),
        None => Ok(()),
    }
}
