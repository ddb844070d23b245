//! 机器人适配器
//!
//! 一个机器人实例对应一个适配器：启动时发布轨道并接入样本源，
//! 样本直接推送到同步服务；停止时撤回轨道。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use contracts::{
    InstanceKey, RobotBlueprint, SampleCallback, SamplePoint, SampleSource, StreamTrack, TrackSpec,
};
use stream_registry::StreamRegistry;
use sync_engine::{PushOutcome, SyncService};
use tracing::{debug, info, instrument, trace, warn};

use crate::error::{IngestionError, Result};
use crate::metrics::IngestionMetrics;
use crate::mock::{MockSampleSource, MockSourceConfig};

pub struct RobotAdapter {
    key: InstanceKey,
    producer_id: String,
    registry: Arc<StreamRegistry>,
    sync: Arc<SyncService>,
    sources: Vec<Box<dyn SampleSource>>,
    listening: Arc<AtomicBool>,
    metrics: Arc<IngestionMetrics>,
}

/// Peer id under which a simulated robot publishes its tracks
pub fn simulated_producer_id(key: &InstanceKey) -> String {
    format!("sim-{key}")
}

impl RobotAdapter {
    pub fn new(
        key: InstanceKey,
        producer_id: impl Into<String>,
        registry: Arc<StreamRegistry>,
        sync: Arc<SyncService>,
    ) -> Self {
        Self {
            key,
            producer_id: producer_id.into(),
            registry,
            sync,
            sources: Vec::new(),
            listening: Arc::new(AtomicBool::new(false)),
            metrics: Arc::new(IngestionMetrics::new()),
        }
    }

    /// Simulated robot with one mock source per configured track
    pub fn from_blueprint(
        robot: &RobotBlueprint,
        registry: Arc<StreamRegistry>,
        sync: Arc<SyncService>,
    ) -> Result<Self> {
        let key = InstanceKey::new(robot.robot_id.as_str(), robot.instance);
        let producer_id = simulated_producer_id(&key);
        let mut adapter = Self::new(key, producer_id, registry, sync);
        for track in &robot.tracks {
            adapter.add_source(Box::new(MockSampleSource::new(MockSourceConfig::from(track))))?;
        }
        Ok(adapter)
    }

    /// Share a metrics instance with other adapters
    pub fn with_metrics(mut self, metrics: Arc<IngestionMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Add a sample source. Sources are keyed by `(kind, label)`.
    pub fn add_source(&mut self, source: Box<dyn SampleSource>) -> Result<()> {
        let duplicate = self
            .sources
            .iter()
            .any(|s| s.track_kind() == source.track_kind() && s.label() == source.label());
        if duplicate {
            return Err(IngestionError::DuplicateSource {
                key: self.key.clone(),
                kind: source.track_kind(),
                label: source.label().to_string(),
            });
        }
        self.sources.push(source);
        Ok(())
    }

    pub fn key(&self) -> &InstanceKey {
        &self.key
    }

    pub fn producer_id(&self) -> &str {
        &self.producer_id
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn metrics(&self) -> Arc<IngestionMetrics> {
        self.metrics.clone()
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Relaxed)
    }

    /// Publish every track, then start the sources.
    ///
    /// Must be called from within a tokio runtime.
    #[instrument(name = "robot_adapter_start", skip(self), fields(key = %self.key))]
    pub fn start(&self) -> Result<Vec<StreamTrack>> {
        if self.listening.swap(true, Ordering::SeqCst) {
            return Err(IngestionError::AlreadyListening {
                key: self.key.clone(),
            });
        }

        // Tracks go first so the instance exists before samples arrive
        let tracks: Vec<StreamTrack> = self
            .sources
            .iter()
            .enumerate()
            .map(|(mid, source)| {
                self.registry.publish(
                    self.key.robot_id.clone(),
                    self.key.instance,
                    TrackSpec::new(
                        source.track_kind(),
                        source.label(),
                        mid.to_string(),
                        self.producer_id.as_str(),
                    ),
                )
            })
            .collect();

        for source in &self.sources {
            source.listen(self.callback());
        }

        info!(tracks = tracks.len(), "robot adapter started");
        Ok(tracks)
    }

    /// Stop the sources and withdraw the tracks. Idempotent.
    #[instrument(name = "robot_adapter_stop", skip(self), fields(key = %self.key))]
    pub fn stop(&self) {
        if !self.listening.swap(false, Ordering::SeqCst) {
            return;
        }

        for source in &self.sources {
            source.stop();
        }
        for source in &self.sources {
            match self
                .registry
                .unpublish(&self.key, source.track_kind(), source.label())
            {
                Ok(_) => {}
                Err(e) => debug!(error = %e, "track already gone"),
            }
        }

        let snapshot = self.metrics.snapshot();
        info!(
            received = snapshot.samples_received,
            dropped = snapshot.samples_dropped,
            "robot adapter stopped"
        );
    }

    fn callback(&self) -> SampleCallback {
        let key = self.key.clone();
        let sync = self.sync.clone();
        let listening = self.listening.clone();
        let metrics = self.metrics.clone();

        Arc::new(move |sample: SamplePoint| {
            if !listening.load(Ordering::Relaxed) {
                return;
            }

            metrics.record_received();
            match sync.push_sample(&key, sample) {
                Ok(PushOutcome::Queued) => trace!(%key, "sample queued"),
                Ok(PushOutcome::Dropped) => metrics.record_dropped(),
                Err(e) => {
                    metrics.record_failed();
                    warn!(%key, error = %e, "sample not delivered");
                }
            }
        })
    }
}

impl Drop for RobotAdapter {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{PacingMode, SyncEngineConfig, TrackBlueprint, TrackKind};
    use std::time::Duration;
    use sync_engine::CursorSpec;

    fn services() -> (Arc<StreamRegistry>, Arc<SyncService>) {
        let registry = Arc::new(StreamRegistry::new());
        let config = SyncEngineConfig {
            pacing: PacingMode::External,
            ..SyncEngineConfig::with_tolerance_ms(50.0)
        };
        let sync = Arc::new(SyncService::new(config, registry.clone()));
        (registry, sync)
    }

    fn blueprint() -> RobotBlueprint {
        RobotBlueprint {
            robot_id: "robot-7".into(),
            instance: 0,
            tracks: vec![
                TrackBlueprint {
                    kind: TrackKind::Joints,
                    label: "arm".into(),
                    frequency_hz: 100.0,
                    jitter_ms: 0.0,
                },
                TrackBlueprint {
                    kind: TrackKind::Language,
                    label: "instructions".into(),
                    frequency_hz: 100.0,
                    jitter_ms: 0.0,
                },
            ],
        }
    }

    #[test]
    fn test_duplicate_source_rejected() {
        let (registry, sync) = services();
        let key = InstanceKey::new("robot-7", 0);
        let mut adapter = RobotAdapter::new(key, "producer-1", registry, sync);
        adapter
            .add_source(Box::new(MockSampleSource::joints("arm", 10.0)))
            .unwrap();
        let err = adapter
            .add_source(Box::new(MockSampleSource::joints("arm", 20.0)))
            .unwrap_err();
        assert!(matches!(err, IngestionError::DuplicateSource { .. }));
        assert_eq!(adapter.source_count(), 1);
    }

    #[tokio::test]
    async fn test_start_publishes_and_stop_withdraws() {
        let (registry, sync) = services();
        let adapter = RobotAdapter::from_blueprint(&blueprint(), registry.clone(), sync).unwrap();
        let key = adapter.key().clone();

        let tracks = adapter.start().unwrap();
        assert_eq!(tracks.len(), 2);
        assert!(tracks.iter().all(|t| t.stream_id == adapter.producer_id()));
        assert_eq!(registry.producer_of(&key).as_deref(), Some(adapter.producer_id()));
        assert!(matches!(
            adapter.start(),
            Err(IngestionError::AlreadyListening { .. })
        ));

        adapter.stop();
        assert!(!adapter.is_listening());
        assert!(!registry.contains(&key));
    }

    #[tokio::test]
    async fn test_samples_reach_sync_engine() {
        let (registry, sync) = services();
        let adapter =
            RobotAdapter::from_blueprint(&blueprint(), registry, sync.clone()).unwrap();
        let key = adapter.key().clone();
        adapter.start().unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut stream = sync
            .subscribe(&key, CursorSpec::new(10.0))
            .await
            .unwrap();
        // The first advance anchors the tick; it is emitted once the
        // tolerance has passed
        let now = sync_engine::wall_clock_now();
        sync.advance(&key, now).await.unwrap();
        sync.advance(&key, now + 0.06).await.unwrap();
        let point = stream.next().await.unwrap();
        assert!(point.language_data.is_some());
        assert!(point.joint_positions.is_some());

        let snapshot = adapter.metrics().snapshot();
        assert!(snapshot.samples_received > 0);
        assert_eq!(snapshot.samples_failed, 0);
        adapter.stop();
    }
}
