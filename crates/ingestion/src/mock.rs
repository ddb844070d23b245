//! Mock 样本源
//!
//! 无真实机器人时生成模拟数据，时间戳取自共享时钟并带随机抖动。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use contracts::{
    CameraData, CustomData, EndEffectorData, EndEffectorPoseData, JointData, LanguageData,
    ParallelGripperOpenAmountData, PointCloudData, PoseData, SampleCallback, SamplePayload,
    SamplePoint, SampleSource, SuctionGripperActiveData, TrackBlueprint, TrackKind,
};
use rand::Rng;
use sync_engine::wall_clock_now;
use tracing::{debug, trace};

const JOINTS: [&str; 6] = [
    "shoulder_pan",
    "shoulder_lift",
    "elbow",
    "wrist_1",
    "wrist_2",
    "wrist_3",
];

const INSTRUCTIONS: [&str; 3] = ["pick up the red cup", "stack the cups", "return home"];

/// Mock 样本源配置
#[derive(Debug, Clone)]
pub struct MockSourceConfig {
    pub kind: TrackKind,

    /// 轨道标签 (RGB/DEPTH 为相机名)
    pub label: String,

    /// 采样频率 (Hz)
    pub frequency_hz: f64,

    /// 时间戳抖动上限 (ms)，模拟采集延迟
    pub jitter_ms: f64,

    /// 图像帧字节数 (仅 RGB/DEPTH)
    pub frame_bytes: usize,
}

impl Default for MockSourceConfig {
    fn default() -> Self {
        Self {
            kind: TrackKind::Joints,
            label: "arm".to_string(),
            frequency_hz: 10.0,
            jitter_ms: 0.0,
            frame_bytes: 64,
        }
    }
}

impl From<&TrackBlueprint> for MockSourceConfig {
    fn from(track: &TrackBlueprint) -> Self {
        Self {
            kind: track.kind,
            label: track.label.clone(),
            frequency_hz: track.frequency_hz,
            jitter_ms: track.jitter_ms,
            ..Default::default()
        }
    }
}

/// Mock 样本源
///
/// 每个源对应一条轨道。`listen` 需要在 tokio runtime 内调用。
pub struct MockSampleSource {
    config: MockSourceConfig,
    clock: fn() -> f64,
    running: Arc<AtomicBool>,
}

impl MockSampleSource {
    pub fn new(config: MockSourceConfig) -> Self {
        Self {
            config,
            clock: wall_clock_now,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replace the time source (seconds on the robot clock)
    pub fn with_clock(mut self, clock: fn() -> f64) -> Self {
        self.clock = clock;
        self
    }

    pub fn joints(label: &str, frequency_hz: f64) -> Self {
        Self::new(MockSourceConfig {
            kind: TrackKind::Joints,
            label: label.to_string(),
            frequency_hz,
            ..Default::default()
        })
    }

    pub fn camera(label: &str, frequency_hz: f64, frame_bytes: usize) -> Self {
        Self::new(MockSourceConfig {
            kind: TrackKind::Rgb,
            label: label.to_string(),
            frequency_hz,
            frame_bytes,
            ..Default::default()
        })
    }

    pub fn language(label: &str, frequency_hz: f64) -> Self {
        Self::new(MockSourceConfig {
            kind: TrackKind::Language,
            label: label.to_string(),
            frequency_hz,
            ..Default::default()
        })
    }
}

impl SampleSource for MockSampleSource {
    fn track_kind(&self) -> TrackKind {
        self.config.kind
    }

    fn label(&self) -> &str {
        &self.config.label
    }

    fn listen(&self, callback: SampleCallback) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let config = self.config.clone();
        let clock = self.clock;
        let running = self.running.clone();

        tokio::spawn(async move {
            let interval = Duration::from_secs_f64(1.0 / config.frequency_hz);
            let jitter_s = config.jitter_ms / 1000.0;
            let mut seq: u64 = 0;
            let mut last_ts = f64::NEG_INFINITY;

            debug!(
                kind = %config.kind,
                label = %config.label,
                frequency_hz = config.frequency_hz,
                "mock sample source started"
            );

            while running.load(Ordering::Relaxed) {
                let jitter = if jitter_s > 0.0 {
                    rand::rng().random_range(0.0..jitter_s)
                } else {
                    0.0
                };
                // Delay-only jitter, kept monotonic within the track
                let timestamp = (clock() - jitter).max(last_ts + 1e-6);
                last_ts = timestamp;

                for payload in mock_payloads(&config, seq) {
                    callback(SamplePoint::new(timestamp, payload));
                }
                trace!(label = %config.label, seq, timestamp, "mock sample emitted");

                seq += 1;
                tokio::time::sleep(interval).await;
            }

            debug!(label = %config.label, "mock sample source stopped");
        });
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_listening(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

/// Payloads for one sampling instant. Joint tracks carry positions and
/// velocities together.
fn mock_payloads(config: &MockSourceConfig, seq: u64) -> Vec<SamplePayload> {
    let phase = seq as f64 / config.frequency_hz;
    let label = config.label.clone();
    match config.kind {
        TrackKind::Joints => {
            let positions = JOINTS
                .iter()
                .enumerate()
                .map(|(i, name)| (name.to_string(), (phase + i as f64).sin()))
                .collect();
            let velocities = JOINTS
                .iter()
                .enumerate()
                .map(|(i, name)| (name.to_string(), (phase + i as f64).cos()))
                .collect();
            vec![
                SamplePayload::JointPositions(JointData {
                    values: positions,
                    additional_values: None,
                }),
                SamplePayload::JointVelocities(JointData {
                    values: velocities,
                    additional_values: None,
                }),
            ]
        }
        TrackKind::Rgb => vec![SamplePayload::RgbImage {
            camera: label,
            data: camera_frame(config, seq, 128),
        }],
        TrackKind::Depth => vec![SamplePayload::DepthImage {
            camera: label,
            data: camera_frame(config, seq, 255),
        }],
        TrackKind::Language => vec![SamplePayload::Language(LanguageData {
            text: INSTRUCTIONS[(seq as usize) % INSTRUCTIONS.len()].to_string(),
        })],
        TrackKind::Gripper => vec![SamplePayload::EndEffectors(EndEffectorData {
            open_amounts: HashMap::from([(label, opening(phase))]),
        })],
        TrackKind::ParallelGripperOpenAmount => {
            vec![SamplePayload::ParallelGripperOpenAmounts(
                ParallelGripperOpenAmountData {
                    open_amounts: HashMap::from([(label, opening(phase))]),
                },
            )]
        }
        // Toggles every 20 samples
        TrackKind::SuctionGripper => {
            vec![SamplePayload::SuctionGripperActive(SuctionGripperActiveData {
                active: (seq / 20) % 2 == 1,
            })]
        }
        TrackKind::EndEffectorPose => vec![SamplePayload::EndEffectorPoses(EndEffectorPoseData {
            poses: HashMap::from([(
                label,
                vec![0.4, 0.1 * phase.sin(), 0.3, 0.0, 0.0, 0.0, 1.0],
            )]),
        })],
        TrackKind::Pose => vec![SamplePayload::Poses(PoseData {
            pose: HashMap::from([(label, vec![phase.cos(), phase.sin(), 0.0, 0.0, 0.0, phase])]),
        })],
        TrackKind::PointCloud => vec![SamplePayload::PointCloud {
            sensor: label,
            data: PointCloudData {
                points: Some(Bytes::from(vec![0u8; 12 * 64])),
                ..Default::default()
            },
        }],
        TrackKind::Custom => vec![SamplePayload::Custom {
            name: label,
            data: CustomData {
                data: Bytes::copy_from_slice(&seq.to_le_bytes()),
            },
        }],
    }
}

fn camera_frame(config: &MockSourceConfig, seq: u64, fill: u8) -> CameraData {
    CameraData {
        frame_idx: seq,
        frame: Some(Bytes::from(vec![fill; config.frame_bytes])),
        ..Default::default()
    }
}

fn opening(phase: f64) -> f64 {
    0.5 + 0.5 * phase.sin()
}
