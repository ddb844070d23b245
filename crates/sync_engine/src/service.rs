//! Worker-per-instance synchronization service.
//!
//! Every robot instance gets one worker task that owns its [`SyncEngine`].
//! Samples, subscriptions and pacing all go through the worker's command
//! queue, so each instance has exactly one writer. The worker map is only
//! write-locked when a worker is created or removed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use contracts::{
    InstanceKey, PacingMode, PacingSource, SamplePoint, SyncEngineConfig, SyncedData,
};
use parking_lot::RwLock;
use stream_registry::{DiscoveryFeed, DiscoveryUpdate, RegistryChange, StreamRegistry};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::cursor::{CursorQueue, CursorSpec, SyncStream};
use crate::engine::{EngineStats, SyncEngine};
use crate::pacing::WallClockPacer;
use crate::SyncError;

/// Result of a non-blocking push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Worker queue full, sample dropped
    Dropped,
}

/// Handle to a recording cursor attached through the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingCursor {
    pub key: InstanceKey,
    pub id: usize,
}

type Reply<T> = oneshot::Sender<Result<T, SyncError>>;

enum Command {
    Sample(SamplePoint),
    Subscribe {
        spec: CursorSpec,
        capacity: usize,
        reply: Reply<(usize, Arc<CursorQueue>)>,
    },
    AttachRecording {
        spec: CursorSpec,
        reply: Reply<usize>,
    },
    SealRecording {
        id: usize,
        end_time: f64,
        reply: Reply<SyncedData>,
    },
    DetachRecording {
        id: usize,
        reply: Reply<()>,
    },
    Advance {
        now: f64,
    },
    Stats {
        reply: Reply<EngineStats>,
    },
}

struct WorkerHandle {
    tx: mpsc::Sender<Command>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct SyncService {
    config: SyncEngineConfig,
    registry: Arc<StreamRegistry>,
    workers: RwLock<HashMap<InstanceKey, WorkerHandle>>,
    dropped: AtomicU64,
}

impl SyncService {
    pub fn new(config: SyncEngineConfig, registry: Arc<StreamRegistry>) -> Self {
        Self {
            config,
            registry,
            workers: RwLock::new(HashMap::new()),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &SyncEngineConfig {
        &self.config
    }

    /// Hand a sample to the instance's worker without waiting.
    ///
    /// Creates the worker on first use. A full worker queue drops the sample.
    /// Stale or malformed samples are rejected inside the worker and never
    /// reported here.
    ///
    /// Must be called from within a tokio runtime.
    pub fn push_sample(
        &self,
        key: &InstanceKey,
        sample: SamplePoint,
    ) -> Result<PushOutcome, SyncError> {
        let sent = match self.workers.read().get(key) {
            Some(worker) => worker.tx.try_send(Command::Sample(sample)),
            None => Err(TrySendError::Closed(Command::Sample(sample))),
        };
        // Missing or dead worker: (re)create it under the write lock
        let sent = match sent {
            Err(TrySendError::Closed(cmd)) => self.sender(key, true)?.try_send(cmd),
            other => other,
        };
        match sent {
            Ok(()) => Ok(PushOutcome::Queued),
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                observability::record_sample_dropped(key);
                debug!(%key, "worker queue full, sample dropped");
                Ok(PushOutcome::Dropped)
            }
            Err(TrySendError::Closed(_)) => {
                Err(SyncError::WorkerUnavailable(key.clone()))
            }
        }
    }

    /// Attach a live cursor and return its stream
    #[instrument(name = "sync_subscribe", skip(self, key, spec), fields(%key, frequency_hz = spec.frequency_hz))]
    pub async fn subscribe(
        &self,
        key: &InstanceKey,
        spec: CursorSpec,
    ) -> Result<SyncStream, SyncError> {
        let capacity = self.config.queue_capacity;
        let (id, queue) = self
            .request(key, true, |reply| Command::Subscribe {
                spec,
                capacity,
                reply,
            })
            .await?;
        Ok(SyncStream::new(key.clone(), id, queue))
    }

    /// Attach a recording cursor; `spec.start_time` must be set
    #[instrument(name = "sync_attach_recording", skip(self, key, spec), fields(%key))]
    pub async fn attach_recording(
        &self,
        key: &InstanceKey,
        spec: CursorSpec,
    ) -> Result<RecordingCursor, SyncError> {
        let id = self
            .request(key, true, |reply| Command::AttachRecording { spec, reply })
            .await?;
        Ok(RecordingCursor {
            key: key.clone(),
            id,
        })
    }

    /// Flush and seal a recording cursor, detaching it
    #[instrument(name = "sync_seal_recording", skip(self, cursor), fields(key = %cursor.key, cursor = cursor.id))]
    pub async fn seal_recording(
        &self,
        cursor: &RecordingCursor,
        end_time: f64,
    ) -> Result<SyncedData, SyncError> {
        let id = cursor.id;
        self.request(&cursor.key, false, |reply| Command::SealRecording {
            id,
            end_time,
            reply,
        })
        .await
    }

    /// Drop a recording cursor without sealing
    pub async fn detach_recording(&self, cursor: &RecordingCursor) -> Result<(), SyncError> {
        let id = cursor.id;
        self.request(&cursor.key, false, |reply| Command::DetachRecording { id, reply })
            .await
    }

    /// External pacing: emit every tick due at `now`
    pub async fn advance(&self, key: &InstanceKey, now: f64) -> Result<(), SyncError> {
        let tx = self.sender(key, false)?;
        tx.send(Command::Advance { now })
            .await
            .map_err(|_| SyncError::WorkerUnavailable(key.clone()))
    }

    pub async fn stats(&self, key: &InstanceKey) -> Result<EngineStats, SyncError> {
        self.request(key, false, |reply| Command::Stats { reply })
            .await
    }

    /// Start a worker driven by a custom pacing source.
    ///
    /// Replaces any existing worker for the instance.
    pub fn spawn_instance_with_pacer<P>(&self, key: &InstanceKey, pacer: P) -> Result<(), SyncError>
    where
        P: PacingSource + Send + 'static,
    {
        if !self.registry.contains(key) {
            return Err(SyncError::InstanceNotFound(key.clone()));
        }
        let handle = self.spawn_worker(key.clone(), Some(pacer));
        if let Some(old) = self.workers.write().insert(key.clone(), handle) {
            let _ = old.stop.send(());
        }
        Ok(())
    }

    /// Stop the instance's worker. Live streams end, recording cursors are
    /// discarded.
    pub fn remove_instance(&self, key: &InstanceKey) -> bool {
        let Some(handle) = self.workers.write().remove(key) else {
            return false;
        };
        let _ = handle.stop.send(());
        info!(%key, "sync worker removed");
        true
    }

    /// Remove workers whose instance disappears from the registry
    pub fn watch_registry(self: &Arc<Self>, mut feed: DiscoveryFeed) -> JoinHandle<()> {
        let service: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(update) = feed.recv().await {
                let Some(service) = service.upgrade() else {
                    break;
                };
                match update {
                    DiscoveryUpdate::Change(event) => {
                        if let RegistryChange::InstanceRemoved { key } = &event.change {
                            service.remove_instance(key);
                        }
                    }
                    DiscoveryUpdate::Resync(snapshot) => {
                        for key in service.instances() {
                            if snapshot.instance(&key.robot_id, key.instance).is_none() {
                                service.remove_instance(&key);
                            }
                        }
                    }
                }
            }
            debug!("registry watch ended");
        })
    }

    pub fn instances(&self) -> Vec<InstanceKey> {
        self.workers.read().keys().cloned().collect()
    }

    /// Samples dropped because a worker queue was full
    pub fn dropped_samples(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop every worker and wait for them to finish
    pub async fn shutdown(&self) {
        let handles: Vec<(InstanceKey, WorkerHandle)> = self.workers.write().drain().collect();
        for (key, handle) in handles {
            let _ = handle.stop.send(());
            if let Err(e) = handle.task.await {
                error!(%key, error = ?e, "sync worker panicked");
            }
        }
        debug!("sync service shutdown complete");
    }

    async fn request<T>(
        &self,
        key: &InstanceKey,
        create: bool,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, SyncError> {
        let tx = self.sender(key, create)?;
        let (reply, rx) = oneshot::channel();
        tx.send(make(reply))
            .await
            .map_err(|_| SyncError::WorkerUnavailable(key.clone()))?;
        rx.await
            .map_err(|_| SyncError::WorkerUnavailable(key.clone()))?
    }

    fn sender(&self, key: &InstanceKey, create: bool) -> Result<mpsc::Sender<Command>, SyncError> {
        if let Some(worker) = self.workers.read().get(key) {
            if !create || !worker.tx.is_closed() {
                return Ok(worker.tx.clone());
            }
        }
        if !create {
            return Err(SyncError::InstanceNotFound(key.clone()));
        }
        let mut workers = self.workers.write();
        Ok(self.worker_entry(&mut workers, key)?.tx.clone())
    }

    fn worker_entry<'a>(
        &self,
        workers: &'a mut HashMap<InstanceKey, WorkerHandle>,
        key: &InstanceKey,
    ) -> Result<&'a WorkerHandle, SyncError> {
        let alive = workers.get(key).is_some_and(|w| !w.tx.is_closed());
        if !alive {
            if !self.registry.contains(key) {
                return Err(SyncError::InstanceNotFound(key.clone()));
            }
            let handle = match self.config.pacing {
                PacingMode::WallClock => self.spawn_worker(
                    key.clone(),
                    Some(WallClockPacer::new(self.config.pacing_interval())),
                ),
                PacingMode::External => self.spawn_worker::<WallClockPacer>(key.clone(), None),
            };
            workers.insert(key.clone(), handle);
        }
        workers
            .get(key)
            .ok_or_else(|| SyncError::WorkerUnavailable(key.clone()))
    }

    fn spawn_worker<P>(&self, key: InstanceKey, pacer: Option<P>) -> WorkerHandle
    where
        P: PacingSource + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.config.command_capacity.max(1));
        let (stop_tx, stop_rx) = oneshot::channel();
        let engine = SyncEngine::new(key, self.config.history_depth);
        let task = tokio::spawn(run_worker(engine, rx, stop_rx, pacer));
        WorkerHandle {
            tx,
            stop: stop_tx,
            task,
        }
    }
}

impl Drop for SyncService {
    fn drop(&mut self) {
        for (_, handle) in self.workers.get_mut().drain() {
            let _ = handle.stop.send(());
        }
    }
}

#[instrument(name = "sync_worker_loop", skip_all, fields(key = %engine.key()))]
async fn run_worker<P: PacingSource>(
    mut engine: SyncEngine,
    mut rx: mpsc::Receiver<Command>,
    mut stop: oneshot::Receiver<()>,
    mut pacer: Option<P>,
) {
    debug!("sync worker started");
    let mut pacing_live = pacer.is_some();

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            cmd = rx.recv() => match cmd {
                Some(cmd) => handle_command(&mut engine, cmd),
                None => break,
            },
            tick = next_tick(&mut pacer), if pacing_live => match tick {
                Some(now) => {
                    engine.advance_to(now);
                }
                None => {
                    warn!("pacing source exhausted");
                    pacing_live = false;
                }
            },
        }
    }

    engine.close();
    debug!(stats = ?engine.stats(), "sync worker stopped");
}

async fn next_tick<P: PacingSource>(pacer: &mut Option<P>) -> Option<f64> {
    match pacer {
        Some(pacer) => pacer.next_tick().await,
        None => None,
    }
}

fn handle_command(engine: &mut SyncEngine, cmd: Command) {
    match cmd {
        // Rejections are counted and logged by the engine
        Command::Sample(sample) => {
            let _ = engine.push(sample);
        }
        Command::Subscribe {
            spec,
            capacity,
            reply,
        } => {
            let _ = reply.send(engine.add_live_cursor(spec, capacity));
        }
        Command::AttachRecording { spec, reply } => {
            let _ = reply.send(engine.add_recording_cursor(spec));
        }
        Command::SealRecording { id, end_time, reply } => {
            let _ = reply.send(engine.seal_recording(id, end_time));
        }
        Command::DetachRecording { id, reply } => {
            let _ = reply.send(engine.remove_cursor(id));
        }
        Command::Advance { now } => {
            engine.advance_to(now);
        }
        Command::Stats { reply } => {
            let _ = reply.send(Ok(engine.stats()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pacing::ManualPacer;
    use contracts::{LanguageData, SamplePayload, TrackKind, TrackSpec};

    fn external_config() -> SyncEngineConfig {
        SyncEngineConfig {
            pacing: PacingMode::External,
            ..SyncEngineConfig::with_tolerance_ms(100.0)
        }
    }

    fn registry_with(key: &InstanceKey) -> Arc<StreamRegistry> {
        let registry = Arc::new(StreamRegistry::new());
        registry.publish(
            key.robot_id.clone(),
            key.instance,
            TrackSpec::new(TrackKind::Language, "instructions", "mid-0", "producer-1"),
        );
        registry
    }

    fn language(ts: f64) -> SamplePoint {
        SamplePoint::new(
            ts,
            SamplePayload::Language(LanguageData {
                text: "pick".into(),
            }),
        )
    }

    #[tokio::test]
    async fn test_unknown_instance_is_not_found() {
        let key = InstanceKey::new("ghost", 0);
        let service = SyncService::new(external_config(), Arc::new(StreamRegistry::new()));
        let err = service.subscribe(&key, CursorSpec::new(10.0)).await.unwrap_err();
        assert_eq!(err, SyncError::InstanceNotFound(key.clone()));
        assert!(service.push_sample(&key, language(0.0)).is_err());
    }

    #[tokio::test]
    async fn test_external_pacing_drives_stream() {
        let key = InstanceKey::new("robot-7", 0);
        let service = SyncService::new(external_config(), registry_with(&key));

        let mut stream = service
            .subscribe(&key, CursorSpec::new(10.0).with_tolerance(0.1).starting_at(0.05))
            .await
            .unwrap();
        assert_eq!(service.push_sample(&key, language(0.0)).unwrap(), PushOutcome::Queued);
        service.advance(&key, 0.5).await.unwrap();

        let mut with_language = Vec::new();
        for _ in 0..4 {
            let point = stream.next().await.unwrap();
            with_language.push(point.language_data.is_some());
        }
        assert_eq!(with_language, vec![true, true, false, false]);
    }

    #[tokio::test]
    async fn test_remove_instance_ends_streams() {
        let key = InstanceKey::new("robot-7", 0);
        let service = SyncService::new(external_config(), registry_with(&key));
        let mut stream = service.subscribe(&key, CursorSpec::new(10.0)).await.unwrap();

        assert!(service.remove_instance(&key));
        assert_eq!(stream.next().await, None);
        assert!(!service.remove_instance(&key));
    }

    #[tokio::test]
    async fn test_recording_through_service() {
        let key = InstanceKey::new("robot-7", 0);
        let service = SyncService::new(external_config(), registry_with(&key));
        let cursor = service
            .attach_recording(&key, CursorSpec::new(10.0).starting_at(1.0))
            .await
            .unwrap();

        for i in 0..10 {
            service.push_sample(&key, language(1.0 + i as f64 * 0.05)).unwrap();
        }
        service.advance(&key, 1.2).await.unwrap();
        let data = service.seal_recording(&cursor, 1.35).await.unwrap();
        assert_eq!(data.frames.len(), 4);
        assert_eq!(data.robot_id, key.robot_id);

        // Sealing consumes the cursor
        assert!(matches!(
            service.seal_recording(&cursor, 1.35).await,
            Err(SyncError::CursorNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_manual_pacer_drives_worker() {
        let key = InstanceKey::new("robot-7", 0);
        let service = SyncService::new(external_config(), registry_with(&key));
        let (pacer, handle) = ManualPacer::channel(8);
        service.spawn_instance_with_pacer(&key, pacer).unwrap();

        let mut stream = service
            .subscribe(&key, CursorSpec::new(10.0).starting_at(0.0))
            .await
            .unwrap();
        assert!(handle.tick(0.1).await);

        let point = stream.next().await.unwrap();
        assert_eq!(point.timestamp, 0.0);
    }

    #[tokio::test]
    async fn test_registry_removal_stops_worker() {
        let key = InstanceKey::new("robot-7", 0);
        let registry = registry_with(&key);
        let service = Arc::new(SyncService::new(external_config(), registry.clone()));
        let watcher = service.watch_registry(registry.discovery_feed());

        let mut stream = service.subscribe(&key, CursorSpec::new(10.0)).await.unwrap();
        registry
            .unpublish(&key, TrackKind::Language, "instructions")
            .unwrap();

        assert_eq!(stream.next().await, None);
        assert!(service.instances().is_empty());
        drop(registry);
        drop(service);
        watcher.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_pushes_to_distinct_instances() {
        let keys: Vec<InstanceKey> = (0..8).map(|i| InstanceKey::new("robot-7", i)).collect();
        let registry = Arc::new(StreamRegistry::new());
        for key in &keys {
            registry.publish(
                key.robot_id.clone(),
                key.instance,
                TrackSpec::new(TrackKind::Language, "instructions", "mid-0", "producer-1"),
            );
        }
        let config = SyncEngineConfig {
            command_capacity: 512,
            ..external_config()
        };
        let service = Arc::new(SyncService::new(config, registry));

        let runtime = tokio::runtime::Handle::current();
        let threads: Vec<_> = keys
            .iter()
            .cloned()
            .map(|key| {
                let service = service.clone();
                let runtime = runtime.clone();
                std::thread::spawn(move || {
                    let _guard = runtime.enter();
                    for i in 0..200 {
                        let outcome = service.push_sample(&key, language(i as f64 * 0.01)).unwrap();
                        assert_eq!(outcome, PushOutcome::Queued);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        // One worker per instance, each saw its own samples in order
        assert_eq!(service.instances().len(), keys.len());
        for key in &keys {
            let stats = service.stats(key).await.unwrap();
            assert_eq!(stats.accepted, 200, "{key}");
            assert_eq!(stats.rejected_out_of_order, 0);
        }
        assert_eq!(service.dropped_samples(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_all_workers() {
        let key = InstanceKey::new("robot-7", 0);
        let service = SyncService::new(external_config(), registry_with(&key));
        service.push_sample(&key, language(0.0)).unwrap();
        assert_eq!(service.instances().len(), 1);
        service.shutdown().await;
        assert!(service.instances().is_empty());
    }
}
