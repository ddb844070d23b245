//! Pipeline orchestrator - wires registry, sync, broker, recording and the
//! simulated robots together for one run.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use contracts::{InstanceKey, PlatformBlueprint, RecordingStorage as _};
use ingestion::IngestionPipeline;
use observability::{record_sync_point, TelemetryAggregator};
use recording::{RecordingCoordinator, RecordingRequest, RecordingState};
use session_broker::SessionBroker;
use stream_registry::StreamRegistry;
use sync_engine::{wall_clock_now, CursorSpec, SyncService};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::PipelineStats;
use crate::collaborators::{RunStorage, StaticTokenValidator};
use crate::error::CliError;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub blueprint: PlatformBlueprint,

    /// Run length (None = until shutdown signal)
    pub duration: Option<Duration>,

    /// Record every robot for this long (None = no recording)
    pub record_for: Option<Duration>,

    /// JSON output directory for recordings (None = log only)
    pub output_dir: Option<PathBuf>,

    /// Attach a live preview subscriber per robot
    pub preview: bool,

    /// Accepted consumer tokens, comma separated
    pub tokens: String,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

type Coordinator = RecordingCoordinator<RunStorage>;

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run until the configured duration elapses or `shutdown` resolves
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<PipelineStats> {
        let start_time = Instant::now();
        let blueprint = &self.config.blueprint;

        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        // Core services
        let registry = Arc::new(StreamRegistry::with_config(blueprint.registry.clone()));
        let sync = Arc::new(SyncService::new(blueprint.sync.clone(), registry.clone()));
        let watcher = sync.watch_registry(registry.discovery_feed());

        let broker = SessionBroker::new(
            blueprint.broker.clone(),
            registry.clone(),
            StaticTokenValidator::from_list(&self.config.tokens),
        );
        let liveness = broker.spawn_liveness_monitor();

        let storage = RunStorage::from_output_dir(self.config.output_dir.as_deref())
            .context("Failed to prepare recording storage")?;
        info!(storage = storage.name(), "Recording storage ready");
        let coordinator =
            RecordingCoordinator::new(blueprint.recording.clone(), sync.clone(), storage);
        let notifications = spawn_notification_logger(&coordinator);

        info!(
            tolerance_ms = blueprint.sync.tolerance_ms,
            output_frequency_hz = blueprint.sync.output_frequency_hz,
            pacing = ?blueprint.sync.pacing,
            "Core services started"
        );

        // Simulated robots
        let ingestion = IngestionPipeline::from_blueprints(
            &blueprint.robots,
            registry.clone(),
            sync.clone(),
        )
        .map_err(|e| CliError::pipeline_execution(e.to_string()))?;
        let tracks_published = ingestion
            .start_all()
            .map_err(|e| CliError::pipeline_execution(e.to_string()))?;
        let robots: Vec<InstanceKey> = ingestion.robots().cloned().collect();
        if robots.is_empty() {
            warn!("No robots configured - nothing will be synchronized");
        }
        info!(robots = robots.len(), tracks = tracks_published, "Robots started");

        let mut previews = Vec::new();
        if self.config.preview {
            for key in &robots {
                // Robots without tracks never enter the registry
                match sync
                    .subscribe(key, CursorSpec::from_config(&blueprint.sync))
                    .await
                {
                    Ok(stream) => previews.push((key.clone(), spawn_preview(stream))),
                    Err(e) => warn!(%key, error = %e, "Preview not attached"),
                }
            }
        }

        let mut stats = PipelineStats {
            robots: robots.len(),
            tracks_published,
            ..Default::default()
        };

        let mut recordings = Vec::new();
        if self.config.record_for.is_some() {
            recordings = start_recordings(&coordinator, &robots).await;
        }

        // Main wait
        let run_timer = optional_sleep(self.config.duration);
        let record_timer = optional_sleep(self.config.record_for);
        tokio::pin!(shutdown, run_timer, record_timer);

        info!(duration = ?self.config.duration, "Pipeline running");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    warn!("Received shutdown signal, stopping pipeline...");
                    break;
                }
                _ = &mut run_timer => {
                    info!("Run duration reached");
                    break;
                }
                _ = &mut record_timer, if !recordings.is_empty() => {
                    stop_recordings(&coordinator, std::mem::take(&mut recordings), &mut stats).await;
                    if self.config.duration.is_none() {
                        info!("Recording finished, still running until shutdown");
                    }
                }
            }
        }

        // Recordings must be sealed while the instances still exist
        stop_recordings(&coordinator, recordings, &mut stats).await;

        info!("Shutting down pipeline...");
        ingestion.stop_all();
        stats.samples = ingestion.metrics().snapshot();
        stats.samples_dropped_by_sync = sync.dropped_samples();
        stats.open_connections = broker.connection_count();

        sync.shutdown().await;
        for (key, handle) in previews {
            match tokio::time::timeout(Duration::from_secs(5), handle).await {
                Ok(Ok(aggregator)) => stats.previews.push((key.to_string(), aggregator.summary())),
                Ok(Err(e)) => warn!(%key, error = %e, "Preview task failed"),
                Err(_) => warn!(%key, "Preview task did not finish"),
            }
        }

        liveness.abort();
        watcher.abort();
        notifications.abort();

        stats.duration = start_time.elapsed();
        info!(
            duration_secs = stats.duration.as_secs_f64(),
            recordings_saved = stats.recordings_saved,
            "Pipeline shutdown complete"
        );

        Ok(stats)
    }
}

async fn optional_sleep(after: Option<Duration>) {
    match after {
        Some(after) => tokio::time::sleep(after).await,
        None => std::future::pending().await,
    }
}

fn spawn_notification_logger(coordinator: &Arc<Coordinator>) -> JoinHandle<()> {
    let mut feed = coordinator.subscribe();
    tokio::spawn(async move {
        while let Some(notification) = feed.recv().await {
            info!(
                notification_type = ?notification.notification_type,
                recording_id = notification.recording_id().unwrap_or("-"),
                "Recording notification"
            );
        }
    })
}

fn spawn_preview(mut stream: sync_engine::SyncStream) -> JoinHandle<TelemetryAggregator> {
    tokio::spawn(async move {
        let mut aggregator = TelemetryAggregator::new();
        while let Some(point) = stream.next().await {
            record_sync_point(stream.key(), &point);
            aggregator.update(&point);
            debug!(
                key = %stream.key(),
                timestamp = format!("{:.3}", point.timestamp),
                present = point.present().len(),
                "Sync point"
            );
        }
        aggregator
    })
}

async fn start_recordings(coordinator: &Arc<Coordinator>, robots: &[InstanceKey]) -> Vec<String> {
    let mut started = Vec::new();
    for key in robots {
        let recording_id = Uuid::new_v4().to_string();
        let request = RecordingRequest::new(recording_id.clone(), key.clone())
            .requested_by("telemetry-broker");
        if let Err(e) = coordinator.request(request) {
            warn!(%key, error = %e, "Failed to request recording");
            continue;
        }
        match coordinator.start(&recording_id, wall_clock_now()).await {
            Ok(()) => started.push(recording_id),
            Err(e) => warn!(%key, error = %e, "Failed to start recording"),
        }
    }
    started
}

async fn stop_recordings(
    coordinator: &Arc<Coordinator>,
    recordings: Vec<String>,
    stats: &mut PipelineStats,
) {
    for recording_id in recordings {
        match coordinator.stop(&recording_id, wall_clock_now()).await {
            Ok(outcome) => {
                stats.frames_recorded += outcome.frames as u64;
                if outcome.state == RecordingState::Saved {
                    stats.recordings_saved += 1;
                }
                info!(%recording_id, state = %outcome.state, frames = outcome.frames, "Recording stopped");
            }
            Err(e) => {
                stats.recordings_failed += 1;
                warn!(%recording_id, error = %e, "Recording failed");
            }
        }
    }
}
