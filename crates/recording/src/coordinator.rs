//! Recording lifecycle coordinator.
//!
//! `REQUESTED → STARTED → STOPPED → {SAVED | DISCARDED}`, with `EXPIRED`
//! when the grace period or the maximum duration runs out. Public operations
//! on one recording are serialised; timers race them through the
//! recording's [`StateGate`] and only fire if nothing moved it since they
//! were armed.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use contracts::{
    call_collaborator, ActiveRecording, DataType, InstanceKey, RecordingConfig,
    RecordingNotification, RecordingNotificationType, RecordingPayload,
    RecordingRequestedPayload, RecordingStartPayload, RecordingStorage, RecordingUpdatePayload,
    StateGate, SyncedData, Transition,
};
use parking_lot::{Mutex, RwLock};
use sync_engine::{CursorSpec, RecordingCursor, SyncService};
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::feed::NotificationFeed;
use crate::{RecordingError, RecordingState};

/// Parameters of a new recording
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingRequest {
    pub recording_id: String,
    pub key: InstanceKey,
    pub requested_by: String,
    /// Empty records every data type
    pub data_types: Vec<DataType>,
    pub dataset_ids: Vec<String>,
}

impl RecordingRequest {
    pub fn new(recording_id: impl Into<String>, key: InstanceKey) -> Self {
        Self {
            recording_id: recording_id.into(),
            key,
            requested_by: String::new(),
            data_types: Vec::new(),
            dataset_ids: Vec::new(),
        }
    }

    pub fn requested_by(mut self, user: impl Into<String>) -> Self {
        self.requested_by = user.into();
        self
    }

    pub fn data_types(mut self, data_types: impl IntoIterator<Item = DataType>) -> Self {
        self.data_types = data_types.into_iter().collect();
        self
    }

    pub fn dataset_ids(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.dataset_ids = ids.into_iter().collect();
        self
    }
}

/// Result of [`RecordingCoordinator::stop`]
#[derive(Debug, Clone, PartialEq)]
pub struct StopOutcome {
    pub state: RecordingState,
    pub frames: usize,
    /// Returned only when the coordinator has no storage; the caller then
    /// reports the outcome through `report_disposition`.
    pub data: Option<SyncedData>,
}

#[derive(Debug, Clone, PartialEq)]
struct Phase {
    state: RecordingState,
    start_time: Option<f64>,
    cursor: Option<RecordingCursor>,
}

impl Phase {
    fn with_state(&self, state: RecordingState) -> Self {
        Self {
            state,
            ..self.clone()
        }
    }
}

struct Recording {
    request: RecordingRequest,
    gate: StateGate<Phase>,
    /// Pending timer and the gate epoch it guards
    timer: Mutex<Option<(u64, AbortHandle)>>,
    /// Serialises public operations on this recording
    op: tokio::sync::Mutex<()>,
}

impl Recording {
    fn id(&self) -> &str {
        &self.request.recording_id
    }

    fn cancel_timer(&self) {
        if let Some((_, handle)) = self.timer.lock().take() {
            handle.abort();
        }
    }

    fn requested_payload(&self) -> RecordingRequestedPayload {
        let r = &self.request;
        RecordingRequestedPayload {
            recording_id: r.recording_id.clone(),
            robot_id: r.key.robot_id.clone(),
            instance: r.key.instance,
            created_by: r.requested_by.clone(),
            dataset_ids: r.dataset_ids.clone(),
            data_types: r.data_types.clone(),
        }
    }

    fn start_payload(&self, start_time: f64) -> RecordingStartPayload {
        let r = &self.request;
        RecordingStartPayload {
            recording_id: r.recording_id.clone(),
            robot_id: r.key.robot_id.clone(),
            instance: r.key.instance,
            created_by: r.requested_by.clone(),
            dataset_ids: r.dataset_ids.clone(),
            data_types: r.data_types.clone(),
            start_time,
        }
    }

    fn active_entry(&self) -> Option<ActiveRecording> {
        let phase = self.gate.state();
        match (phase.state, phase.start_time) {
            (RecordingState::Requested, _) => {
                Some(ActiveRecording::Requested(self.requested_payload()))
            }
            (RecordingState::Started, Some(start)) => {
                Some(ActiveRecording::Started(self.start_payload(start)))
            }
            _ => None,
        }
    }
}

pub struct RecordingCoordinator<S> {
    config: RecordingConfig,
    sync: Arc<SyncService>,
    storage: Option<S>,
    recordings: RwLock<HashMap<String, Arc<Recording>>>,
    notifications: broadcast::Sender<RecordingNotification>,
}

impl<S> RecordingCoordinator<S>
where
    S: RecordingStorage + Send + Sync + 'static,
{
    pub fn new(config: RecordingConfig, sync: Arc<SyncService>, storage: S) -> Arc<Self> {
        Self::build(config, sync, Some(storage))
    }

    /// Storage is committed out of process through
    /// [`Self::report_disposition`].
    pub fn without_storage(config: RecordingConfig, sync: Arc<SyncService>) -> Arc<Self> {
        Self::build(config, sync, None)
    }

    fn build(config: RecordingConfig, sync: Arc<SyncService>, storage: Option<S>) -> Arc<Self> {
        let (notifications, _) = broadcast::channel(config.notification_capacity.max(1));
        Arc::new(Self {
            config,
            sync,
            storage,
            recordings: RwLock::new(HashMap::new()),
            notifications,
        })
    }

    pub fn config(&self) -> &RecordingConfig {
        &self.config
    }

    /// Notifications, starting with an `INIT` snapshot of active recordings
    pub fn subscribe(self: &Arc<Self>) -> NotificationFeed<S> {
        NotificationFeed::new(self)
    }

    pub fn state(&self, recording_id: &str) -> Option<RecordingState> {
        self.get(recording_id).map(|r| r.gate.state().state)
    }

    /// Pending and running recordings
    pub fn active_recordings(&self) -> Vec<ActiveRecording> {
        let recordings: Vec<Arc<Recording>> = self.recordings.read().values().cloned().collect();
        recordings.iter().filter_map(|r| r.active_entry()).collect()
    }

    /// Drop finished recordings from memory. Returns how many were removed.
    pub fn purge_finished(&self) -> usize {
        let mut recordings = self.recordings.write();
        let before = recordings.len();
        recordings.retain(|_, r| !r.gate.state().state.is_terminal());
        before - recordings.len()
    }

    pub(crate) fn snapshot_notification(&self) -> RecordingNotification {
        RecordingNotification {
            notification_type: RecordingNotificationType::Init,
            payload: RecordingPayload::Snapshot(self.active_recordings()),
            id: Uuid::new_v4().to_string(),
        }
    }

    pub(crate) fn subscribe_raw(&self) -> broadcast::Receiver<RecordingNotification> {
        self.notifications.subscribe()
    }

    /// Announce a recording and start its grace period
    #[instrument(
        name = "recording_request",
        skip(self, request),
        fields(recording_id = %request.recording_id, key = %request.key)
    )]
    pub fn request(self: &Arc<Self>, request: RecordingRequest) -> Result<(), RecordingError> {
        let recording = {
            let mut recordings = self.recordings.write();
            if recordings.contains_key(&request.recording_id) {
                return Err(RecordingError::AlreadyExists(request.recording_id));
            }
            if !self.config.allow_concurrent_per_instance {
                let active = recordings.values().find(|r| {
                    r.request.key == request.key && r.gate.state().state.is_active()
                });
                if let Some(active) = active {
                    return Err(RecordingError::Conflict {
                        key: request.key,
                        active: active.id().to_string(),
                    });
                }
            }
            let recording = Arc::new(Recording {
                request,
                gate: StateGate::new(Phase {
                    state: RecordingState::Requested,
                    start_time: None,
                    cursor: None,
                }),
                timer: Mutex::new(None),
                op: tokio::sync::Mutex::new(()),
            });
            recordings.insert(recording.id().to_string(), recording.clone());
            recording
        };

        self.arm_timer(&recording, recording.gate.epoch(), self.config.grace_period());
        observability::record_recording_transition(RecordingState::Requested.as_str());
        self.notify(
            RecordingNotificationType::Requested,
            RecordingPayload::Requested(recording.requested_payload()),
        );
        info!("recording requested");
        Ok(())
    }

    /// Begin capturing at `start_time` (robot clock)
    #[instrument(name = "recording_start", skip(self))]
    pub async fn start(
        self: &Arc<Self>,
        recording_id: &str,
        start_time: f64,
    ) -> Result<(), RecordingError> {
        let recording = self.require(recording_id)?;
        let _op = recording.op.lock().await;

        recording.gate.transition(|phase| match phase.state {
            RecordingState::Requested => Ok(Phase {
                state: RecordingState::Started,
                start_time: Some(start_time),
                cursor: None,
            }),
            other => Err(RecordingError::invalid_transition(
                recording_id,
                other.as_str(),
                "start",
            )),
        })?;
        recording.cancel_timer();

        let spec = self.cursor_spec(&recording, start_time);
        let cursor = match self.sync.attach_recording(&recording.request.key, spec).await {
            Ok(cursor) => cursor,
            Err(e) => {
                error!(error = %e, "failed to attach recording cursor");
                let transition = recording
                    .gate
                    .transition(|phase| Ok::<_, ()>(phase.with_state(RecordingState::Discarded)));
                if let Ok(t) = transition {
                    self.finish(&recording, &t);
                }
                return Err(e.into());
            }
        };

        let transition = recording.gate.transition(|phase| {
            Ok::<_, ()>(Phase {
                cursor: Some(cursor),
                ..phase.clone()
            })
        });
        if let Ok(t) = transition {
            self.arm_timer(&recording, t.epoch, self.config.max_duration());
        }

        observability::record_recording_transition(RecordingState::Started.as_str());
        self.notify(
            RecordingNotificationType::Start,
            RecordingPayload::Start(recording.start_payload(start_time)),
        );
        info!("recording started");
        Ok(())
    }

    /// Seal the recording at `end_time` and hand it to storage
    #[instrument(name = "recording_stop", skip(self))]
    pub async fn stop(
        self: &Arc<Self>,
        recording_id: &str,
        end_time: f64,
    ) -> Result<StopOutcome, RecordingError> {
        let recording = self.require(recording_id)?;
        let _op = recording.op.lock().await;

        let stopped = recording.gate.transition(|phase| match phase.state {
            RecordingState::Started => Ok(phase.with_state(RecordingState::Stopped)),
            other => Err(RecordingError::invalid_transition(
                recording_id,
                other.as_str(),
                "stop",
            )),
        })?;
        recording.cancel_timer();

        let sealed = match &stopped.to.cursor {
            Some(cursor) => self.sync.seal_recording(cursor, end_time).await,
            None => Err(sync_engine::SyncError::invalid_cursor("recording has no cursor")),
        };
        let data = match sealed {
            Ok(data) => data,
            Err(e) => {
                error!(error = %e, "failed to seal recording");
                self.dispose(&recording, RecordingState::Discarded);
                return Err(e.into());
            }
        };

        observability::record_recording_transition(RecordingState::Stopped.as_str());
        self.notify_update(&recording, RecordingNotificationType::Stop);
        let frames = data.frames.len();
        info!(frames, duration = data.duration(), "recording stopped");

        let Some(storage) = &self.storage else {
            return Ok(StopOutcome {
                state: RecordingState::Stopped,
                frames,
                data: Some(data),
            });
        };

        let started = Instant::now();
        let saved = call_collaborator(storage.name(), self.config.storage_timeout(), || {
            storage.save_recording(recording_id, &data)
        })
        .await;
        observability::record_collaborator_call(
            storage.name(),
            saved.is_ok(),
            started.elapsed().as_secs_f64() * 1000.0,
        );

        match saved {
            Ok(()) => {
                self.dispose(&recording, RecordingState::Saved);
                Ok(StopOutcome {
                    state: RecordingState::Saved,
                    frames,
                    data: None,
                })
            }
            Err(source) => {
                warn!(storage = storage.name(), error = %source, "storage failed, recording discarded");
                self.dispose(&recording, RecordingState::Discarded);
                Err(RecordingError::Storage {
                    recording_id: recording_id.to_string(),
                    source,
                })
            }
        }
    }

    /// Outcome of out-of-process storage. Legal only from `STOPPED`.
    #[instrument(name = "recording_report_disposition", skip(self, outcome))]
    pub async fn report_disposition(
        &self,
        recording_id: &str,
        outcome: Result<(), String>,
    ) -> Result<RecordingState, RecordingError> {
        let recording = self.require(recording_id)?;
        let _op = recording.op.lock().await;

        let target = match &outcome {
            Ok(()) => RecordingState::Saved,
            Err(reason) => {
                warn!(reason = %reason, "recording storage reported failure");
                RecordingState::Discarded
            }
        };
        let transition = recording.gate.transition(|phase| match phase.state {
            RecordingState::Stopped => Ok(phase.with_state(target)),
            other => Err(RecordingError::invalid_transition(
                recording_id,
                other.as_str(),
                "report disposition of",
            )),
        })?;
        self.finish(&recording, &transition);
        Ok(target)
    }

    /// Abandon a pending or running recording
    #[instrument(name = "recording_cancel", skip(self))]
    pub async fn cancel(&self, recording_id: &str) -> Result<(), RecordingError> {
        let recording = self.require(recording_id)?;
        let _op = recording.op.lock().await;

        let transition = recording.gate.transition(|phase| {
            if phase.state.is_active() {
                Ok(phase.with_state(RecordingState::Discarded))
            } else {
                Err(RecordingError::invalid_transition(
                    recording_id,
                    phase.state.as_str(),
                    "cancel",
                ))
            }
        })?;
        recording.cancel_timer();
        self.detach(&transition).await;
        self.finish(&recording, &transition);
        Ok(())
    }

    fn cursor_spec(&self, recording: &Recording, start_time: f64) -> CursorSpec {
        let sync = self.sync.config();
        let frequency = self
            .config
            .frequency_hz
            .unwrap_or(sync.output_frequency_hz);
        CursorSpec::new(frequency)
            .with_tolerance(sync.tolerance_s())
            .starting_at(start_time)
            .only(recording.request.data_types.iter().copied())
    }

    /// Grace period in `REQUESTED`, maximum duration in `STARTED`
    fn arm_timer(self: &Arc<Self>, recording: &Arc<Recording>, epoch: u64, after: Duration) {
        let mut slot = recording.timer.lock();
        // A newer epoch's timer already owns the slot
        if matches!(&*slot, Some((armed, _)) if *armed > epoch) {
            return;
        }
        let coordinator: Weak<Self> = Arc::downgrade(self);
        let target = recording.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(coordinator) = coordinator.upgrade() {
                coordinator.expire(&target, epoch).await;
            }
        });
        if let Some((_, previous)) = slot.replace((epoch, task.abort_handle())) {
            previous.abort();
        }
    }

    async fn expire(&self, recording: &Arc<Recording>, armed_epoch: u64) {
        let transition = recording.gate.expire_if(armed_epoch, |phase| {
            phase
                .state
                .is_active()
                .then(|| phase.with_state(RecordingState::Expired))
        });
        let Some(transition) = transition else {
            return;
        };
        warn!(recording_id = recording.id(), from = %transition.from.state, "recording expired");
        self.detach(&transition).await;
        self.finish(recording, &transition);
    }

    async fn detach(&self, transition: &Transition<Phase>) {
        if let Some(cursor) = &transition.from.cursor {
            if let Err(e) = self.sync.detach_recording(cursor).await {
                warn!(error = %e, "failed to detach recording cursor");
            }
        }
    }

    /// `STOPPED → SAVED | DISCARDED` from within `stop`
    fn dispose(&self, recording: &Recording, target: RecordingState) {
        let transition = recording.gate.transition(|phase| {
            if phase.state == RecordingState::Stopped {
                Ok(phase.with_state(target))
            } else {
                Err(())
            }
        });
        if let Ok(t) = transition {
            self.finish(recording, &t);
        }
    }

    /// Emit the terminal notification
    fn finish(&self, recording: &Recording, transition: &Transition<Phase>) {
        let state = transition.to.state;
        observability::record_recording_transition(state.as_str());
        self.notify_update(recording, state.notification_type());
        info!(recording_id = recording.id(), %state, "recording finished");
    }

    fn notify_update(&self, recording: &Recording, notification_type: RecordingNotificationType) {
        self.notify(
            notification_type,
            RecordingPayload::Update(RecordingUpdatePayload::new(
                recording.id(),
                &recording.request.key,
            )),
        );
    }

    fn notify(&self, notification_type: RecordingNotificationType, payload: RecordingPayload) {
        let _ = self.notifications.send(RecordingNotification {
            notification_type,
            payload,
            id: Uuid::new_v4().to_string(),
        });
    }

    fn get(&self, recording_id: &str) -> Option<Arc<Recording>> {
        self.recordings.read().get(recording_id).cloned()
    }

    fn require(&self, recording_id: &str) -> Result<Arc<Recording>, RecordingError> {
        self.get(recording_id)
            .ok_or_else(|| RecordingError::NotFound(recording_id.to_string()))
    }
}
