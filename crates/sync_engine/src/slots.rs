//! Slot table: one history per data type (per camera/sensor/name for keyed
//! data). Every cursor of an instance reads the same table.

use std::collections::{BTreeSet, HashMap};

use contracts::{
    CameraData, CustomData, DataType, EndEffectorData, EndEffectorPoseData, InstanceKey,
    JointData, LanguageData, ParallelGripperOpenAmountData, PointCloudData, PoseData,
    SamplePayload, SamplePoint, Stamped, SuctionGripperActiveData, SyncPoint,
};

use crate::history::{SampleHistory, Stale};

/// Eligibility window of one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickWindow {
    pub tick: f64,
    pub lo: f64,
    pub hi: f64,
}

impl TickWindow {
    /// Tick `t` covers `[t - period, t]`; samples within `tolerance` of that
    /// interval are eligible.
    pub fn new(tick: f64, period: f64, tolerance: f64) -> Self {
        Self {
            tick,
            lo: tick - period - tolerance,
            hi: tick + tolerance,
        }
    }
}

#[derive(Debug)]
pub struct SlotTable {
    depth: usize,
    joint_positions: SampleHistory<JointData>,
    joint_velocities: SampleHistory<JointData>,
    joint_torques: SampleHistory<JointData>,
    joint_target_positions: SampleHistory<JointData>,
    end_effectors: SampleHistory<EndEffectorData>,
    end_effector_poses: SampleHistory<EndEffectorPoseData>,
    parallel_gripper_open_amounts: SampleHistory<ParallelGripperOpenAmountData>,
    suction_gripper_active: SampleHistory<SuctionGripperActiveData>,
    poses: SampleHistory<PoseData>,
    rgb_images: HashMap<String, SampleHistory<CameraData>>,
    depth_images: HashMap<String, SampleHistory<CameraData>>,
    point_clouds: HashMap<String, SampleHistory<PointCloudData>>,
    language: SampleHistory<LanguageData>,
    custom: HashMap<String, SampleHistory<CustomData>>,
}

fn keyed<'a, T>(
    map: &'a mut HashMap<String, SampleHistory<T>>,
    key: String,
    depth: usize,
) -> &'a mut SampleHistory<T> {
    map.entry(key).or_insert_with(|| SampleHistory::new(depth))
}

fn pick<T: Clone>(history: &SampleHistory<T>, w: &TickWindow) -> Option<Stamped<T>> {
    history.closest_in(w.lo, w.hi, w.tick).cloned()
}

fn pick_keyed<T: Clone>(
    map: &HashMap<String, SampleHistory<T>>,
    w: &TickWindow,
) -> Option<HashMap<String, Stamped<T>>> {
    let picked: HashMap<String, Stamped<T>> = map
        .iter()
        .filter_map(|(name, history)| pick(history, w).map(|s| (name.clone(), s)))
        .collect();
    (!picked.is_empty()).then_some(picked)
}

impl SlotTable {
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            joint_positions: SampleHistory::new(depth),
            joint_velocities: SampleHistory::new(depth),
            joint_torques: SampleHistory::new(depth),
            joint_target_positions: SampleHistory::new(depth),
            end_effectors: SampleHistory::new(depth),
            end_effector_poses: SampleHistory::new(depth),
            parallel_gripper_open_amounts: SampleHistory::new(depth),
            suction_gripper_active: SampleHistory::new(depth),
            poses: SampleHistory::new(depth),
            rgb_images: HashMap::new(),
            depth_images: HashMap::new(),
            point_clouds: HashMap::new(),
            language: SampleHistory::new(depth),
            custom: HashMap::new(),
        }
    }

    /// Route a sample to its slot
    pub fn insert(&mut self, sample: SamplePoint) -> Result<(), Stale> {
        let ts = sample.timestamp;
        let depth = self.depth;
        match sample.payload {
            SamplePayload::JointPositions(d) => self.joint_positions.push(ts, d),
            SamplePayload::JointVelocities(d) => self.joint_velocities.push(ts, d),
            SamplePayload::JointTorques(d) => self.joint_torques.push(ts, d),
            SamplePayload::JointTargetPositions(d) => self.joint_target_positions.push(ts, d),
            SamplePayload::EndEffectors(d) => self.end_effectors.push(ts, d),
            SamplePayload::EndEffectorPoses(d) => self.end_effector_poses.push(ts, d),
            SamplePayload::ParallelGripperOpenAmounts(d) => {
                self.parallel_gripper_open_amounts.push(ts, d)
            }
            SamplePayload::SuctionGripperActive(d) => self.suction_gripper_active.push(ts, d),
            SamplePayload::Poses(d) => self.poses.push(ts, d),
            SamplePayload::RgbImage { camera, data } => {
                keyed(&mut self.rgb_images, camera, depth).push(ts, data)
            }
            SamplePayload::DepthImage { camera, data } => {
                keyed(&mut self.depth_images, camera, depth).push(ts, data)
            }
            SamplePayload::PointCloud { sensor, data } => {
                keyed(&mut self.point_clouds, sensor, depth).push(ts, data)
            }
            SamplePayload::Language(d) => self.language.push(ts, d),
            SamplePayload::Custom { name, data } => {
                keyed(&mut self.custom, name, depth).push(ts, data)
            }
        }
    }

    /// Build the snapshot for one tick. `filter = None` selects everything.
    pub fn snapshot(
        &self,
        key: &InstanceKey,
        window: &TickWindow,
        filter: Option<&BTreeSet<DataType>>,
    ) -> SyncPoint {
        let wanted = |dt: DataType| filter.map_or(true, |f| f.contains(&dt));
        let mut point = SyncPoint::empty(key, window.tick);

        if wanted(DataType::JointPositions) {
            point.joint_positions = pick(&self.joint_positions, window);
        }
        if wanted(DataType::JointVelocities) {
            point.joint_velocities = pick(&self.joint_velocities, window);
        }
        if wanted(DataType::JointTorques) {
            point.joint_torques = pick(&self.joint_torques, window);
        }
        if wanted(DataType::JointTargetPositions) {
            point.joint_target_positions = pick(&self.joint_target_positions, window);
        }
        if wanted(DataType::EndEffectors) {
            point.end_effectors = pick(&self.end_effectors, window);
        }
        if wanted(DataType::EndEffectorPoses) {
            point.end_effector_poses = pick(&self.end_effector_poses, window);
        }
        if wanted(DataType::ParallelGripperOpenAmounts) {
            point.parallel_gripper_open_amounts =
                pick(&self.parallel_gripper_open_amounts, window);
        }
        if wanted(DataType::SuctionGripperActive) {
            point.suction_gripper_active = pick(&self.suction_gripper_active, window);
        }
        if wanted(DataType::Poses) {
            point.poses = pick(&self.poses, window);
        }
        if wanted(DataType::RgbImage) {
            point.rgb_images = pick_keyed(&self.rgb_images, window);
        }
        if wanted(DataType::DepthImage) {
            point.depth_images = pick_keyed(&self.depth_images, window);
        }
        if wanted(DataType::PointCloud) {
            point.point_clouds = pick_keyed(&self.point_clouds, window);
        }
        if wanted(DataType::Language) {
            point.language_data = pick(&self.language, window);
        }
        if wanted(DataType::Custom) {
            point.custom_data = pick_keyed(&self.custom, window);
        }
        point
    }

    /// Drop every sample older than `cutoff`
    pub fn prune_before(&mut self, cutoff: f64) -> usize {
        let mut pruned = self.joint_positions.prune_before(cutoff)
            + self.joint_velocities.prune_before(cutoff)
            + self.joint_torques.prune_before(cutoff)
            + self.joint_target_positions.prune_before(cutoff)
            + self.end_effectors.prune_before(cutoff)
            + self.end_effector_poses.prune_before(cutoff)
            + self.parallel_gripper_open_amounts.prune_before(cutoff)
            + self.suction_gripper_active.prune_before(cutoff)
            + self.poses.prune_before(cutoff)
            + self.language.prune_before(cutoff);
        for h in self.rgb_images.values_mut() {
            pruned += h.prune_before(cutoff);
        }
        for h in self.depth_images.values_mut() {
            pruned += h.prune_before(cutoff);
        }
        for h in self.point_clouds.values_mut() {
            pruned += h.prune_before(cutoff);
        }
        for h in self.custom.values_mut() {
            pruned += h.prune_before(cutoff);
        }
        pruned
    }

    /// Samples currently retained across all slots
    pub fn buffered(&self) -> usize {
        self.joint_positions.len()
            + self.joint_velocities.len()
            + self.joint_torques.len()
            + self.joint_target_positions.len()
            + self.end_effectors.len()
            + self.end_effector_poses.len()
            + self.parallel_gripper_open_amounts.len()
            + self.suction_gripper_active.len()
            + self.poses.len()
            + self.language.len()
            + self.rgb_images.values().map(SampleHistory::len).sum::<usize>()
            + self.depth_images.values().map(SampleHistory::len).sum::<usize>()
            + self.point_clouds.values().map(SampleHistory::len).sum::<usize>()
            + self.custom.values().map(SampleHistory::len).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn language(ts: f64, text: &str) -> SamplePoint {
        SamplePoint::new(
            ts,
            SamplePayload::Language(LanguageData { text: text.into() }),
        )
    }

    fn rgb(ts: f64, camera: &str, frame_idx: u64) -> SamplePoint {
        SamplePoint::new(
            ts,
            SamplePayload::RgbImage {
                camera: camera.into(),
                data: CameraData {
                    frame_idx,
                    frame: Some(Bytes::from_static(b"jpeg")),
                    ..Default::default()
                },
            },
        )
    }

    #[test]
    fn test_window_bounds() {
        let w = TickWindow::new(0.25, 0.1, 0.1);
        assert!((w.lo - 0.05).abs() < 1e-12);
        assert!((w.hi - 0.35).abs() < 1e-12);
    }

    #[test]
    fn test_keyed_slots_are_independent() {
        let key = InstanceKey::new("r", 0);
        let mut table = SlotTable::new(8);
        table.insert(rgb(1.0, "wrist", 10)).unwrap();
        table.insert(rgb(0.5, "head", 4)).unwrap();

        let point = table.snapshot(&key, &TickWindow::new(1.0, 0.1, 0.05), None);
        let images = point.rgb_images.unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images["wrist"].value.frame_idx, 10);
        assert_eq!(
            images["wrist"].value.frame.as_deref(),
            Some(&b"jpeg"[..])
        );
    }

    #[test]
    fn test_filter_excludes_types() {
        let key = InstanceKey::new("r", 0);
        let mut table = SlotTable::new(8);
        table.insert(language(1.0, "go")).unwrap();
        table.insert(rgb(1.0, "wrist", 1)).unwrap();

        let filter: BTreeSet<DataType> = [DataType::Language].into_iter().collect();
        let point = table.snapshot(&key, &TickWindow::new(1.0, 0.1, 0.1), Some(&filter));
        assert!(point.language_data.is_some());
        assert!(point.rgb_images.is_none());
    }

    #[test]
    fn test_stale_sample_per_slot() {
        let mut table = SlotTable::new(8);
        table.insert(language(2.0, "a")).unwrap();
        assert!(table.insert(language(1.0, "b")).is_err());
        // Other slots have their own ordering
        table.insert(rgb(1.0, "wrist", 1)).unwrap();
    }

    #[test]
    fn test_suction_state_aligned_to_tick() {
        let key = InstanceKey::new("r", 0);
        let mut table = SlotTable::new(8);
        for (ts, active) in [(0.9, false), (1.02, true), (1.3, false)] {
            table
                .insert(SamplePoint::new(
                    ts,
                    SamplePayload::SuctionGripperActive(SuctionGripperActiveData { active }),
                ))
                .unwrap();
        }

        let point = table.snapshot(&key, &TickWindow::new(1.0, 0.1, 0.05), None);
        let suction = point.suction_gripper_active.as_ref().unwrap();
        assert_eq!(suction.timestamp, 1.02);
        assert!(suction.value.active);
        assert_eq!(point.present(), vec![DataType::SuctionGripperActive]);

        let filter: BTreeSet<DataType> = [DataType::Language].into_iter().collect();
        let point = table.snapshot(&key, &TickWindow::new(1.0, 0.1, 0.05), Some(&filter));
        assert!(point.suction_gripper_active.is_none());
    }

    #[test]
    fn test_prune() {
        let mut table = SlotTable::new(8);
        table.insert(language(0.0, "a")).unwrap();
        table.insert(rgb(1.0, "wrist", 1)).unwrap();
        assert_eq!(table.buffered(), 2);
        assert_eq!(table.prune_before(0.5), 1);
        assert_eq!(table.buffered(), 1);
    }
}
