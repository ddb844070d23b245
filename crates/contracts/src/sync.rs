//! SyncPoint / SyncedData - Sync Engine output
//!
//! Time-aligned snapshots of one robot instance.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{
    CameraData, CustomData, DataType, EndEffectorData, EndEffectorPoseData, InstanceKey,
    JointData, LanguageData, ParallelGripperOpenAmountData, PointCloudData, PoseData, RobotId,
    Stamped, SuctionGripperActiveData,
};

/// Snapshot of all modalities of one instance at a tick
///
/// A field is `None` when no sample fell within tolerance of the tick; it is
/// never zero-filled. Each present value keeps its own source timestamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncPoint {
    /// Tick timestamp (seconds)
    pub timestamp: f64,
    pub robot_id: RobotId,
    pub instance: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joint_positions: Option<Stamped<JointData>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joint_velocities: Option<Stamped<JointData>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joint_torques: Option<Stamped<JointData>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joint_target_positions: Option<Stamped<JointData>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_effectors: Option<Stamped<EndEffectorData>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_effector_poses: Option<Stamped<EndEffectorPoseData>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_gripper_open_amounts: Option<Stamped<ParallelGripperOpenAmountData>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suction_gripper_active: Option<Stamped<SuctionGripperActiveData>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poses: Option<Stamped<PoseData>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rgb_images: Option<HashMap<String, Stamped<CameraData>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth_images: Option<HashMap<String, Stamped<CameraData>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point_clouds: Option<HashMap<String, Stamped<PointCloudData>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_data: Option<Stamped<LanguageData>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<HashMap<String, Stamped<CustomData>>>,
}

impl SyncPoint {
    pub fn empty(key: &InstanceKey, timestamp: f64) -> Self {
        Self {
            timestamp,
            robot_id: key.robot_id.clone(),
            instance: key.instance,
            ..Default::default()
        }
    }

    /// Data types that carry a value in this snapshot
    pub fn present(&self) -> Vec<DataType> {
        let flags = [
            (DataType::JointPositions, self.joint_positions.is_some()),
            (DataType::JointVelocities, self.joint_velocities.is_some()),
            (DataType::JointTorques, self.joint_torques.is_some()),
            (
                DataType::JointTargetPositions,
                self.joint_target_positions.is_some(),
            ),
            (DataType::EndEffectors, self.end_effectors.is_some()),
            (DataType::EndEffectorPoses, self.end_effector_poses.is_some()),
            (
                DataType::ParallelGripperOpenAmounts,
                self.parallel_gripper_open_amounts.is_some(),
            ),
            (
                DataType::SuctionGripperActive,
                self.suction_gripper_active.is_some(),
            ),
            (DataType::Poses, self.poses.is_some()),
            (DataType::RgbImage, self.rgb_images.is_some()),
            (DataType::DepthImage, self.depth_images.is_some()),
            (DataType::PointCloud, self.point_clouds.is_some()),
            (DataType::Language, self.language_data.is_some()),
            (DataType::Custom, self.custom_data.is_some()),
        ];
        flags
            .into_iter()
            .filter_map(|(dt, present)| present.then_some(dt))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.present().is_empty()
    }

    /// Source timestamps of every value carried, one entry per keyed value
    pub fn source_timestamps(&self) -> Vec<(DataType, f64)> {
        fn one<T>(out: &mut Vec<(DataType, f64)>, dt: DataType, v: &Option<Stamped<T>>) {
            if let Some(s) = v {
                out.push((dt, s.timestamp));
            }
        }
        fn keyed<T>(
            out: &mut Vec<(DataType, f64)>,
            dt: DataType,
            v: &Option<HashMap<String, Stamped<T>>>,
        ) {
            if let Some(map) = v {
                out.extend(map.values().map(|s| (dt, s.timestamp)));
            }
        }

        let mut out = Vec::new();
        one(&mut out, DataType::JointPositions, &self.joint_positions);
        one(&mut out, DataType::JointVelocities, &self.joint_velocities);
        one(&mut out, DataType::JointTorques, &self.joint_torques);
        one(
            &mut out,
            DataType::JointTargetPositions,
            &self.joint_target_positions,
        );
        one(&mut out, DataType::EndEffectors, &self.end_effectors);
        one(&mut out, DataType::EndEffectorPoses, &self.end_effector_poses);
        one(
            &mut out,
            DataType::ParallelGripperOpenAmounts,
            &self.parallel_gripper_open_amounts,
        );
        one(
            &mut out,
            DataType::SuctionGripperActive,
            &self.suction_gripper_active,
        );
        one(&mut out, DataType::Poses, &self.poses);
        keyed(&mut out, DataType::RgbImage, &self.rgb_images);
        keyed(&mut out, DataType::DepthImage, &self.depth_images);
        keyed(&mut out, DataType::PointCloud, &self.point_clouds);
        one(&mut out, DataType::Language, &self.language_data);
        keyed(&mut out, DataType::Custom, &self.custom_data);
        out
    }
}

/// Sealed recording output
///
/// Frames are strictly increasing by timestamp and lie within
/// `[start_time, end_time]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncedData {
    pub frames: Vec<SyncPoint>,
    pub start_time: f64,
    pub end_time: f64,
    pub robot_id: RobotId,
    pub instance: u32,
}

impl SyncedData {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_fields_round_trip_as_absent() {
        let mut p = SyncPoint::empty(&InstanceKey::new("r", 0), 1.0);
        p.language_data = Some(Stamped::new(
            0.9,
            LanguageData {
                text: "go".into(),
            },
        ));
        let json = serde_json::to_string(&p).unwrap();
        assert!(!json.contains("joint_positions"));
        let back: SyncPoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
        assert_eq!(back.present(), vec![DataType::Language]);
    }

    #[test]
    fn test_suction_field_on_wire() {
        let mut p = SyncPoint::empty(&InstanceKey::new("r", 0), 2.0);
        let json = serde_json::to_value(&p).unwrap();
        assert!(json.get("suction_gripper_active").is_none());

        p.suction_gripper_active = Some(Stamped::new(1.95, SuctionGripperActiveData { active: true }));
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(
            json["suction_gripper_active"],
            serde_json::json!({"timestamp": 1.95, "active": true})
        );
        let back: SyncPoint = serde_json::from_value(json).unwrap();
        assert_eq!(back, p);
        assert_eq!(
            back.source_timestamps(),
            vec![(DataType::SuctionGripperActive, 1.95)]
        );
    }
}
