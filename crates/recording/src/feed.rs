//! Notification subscription
//!
//! Mirrors the discovery feed: the first item is an `INIT` snapshot, and a
//! subscriber that falls behind gets a fresh snapshot instead of the missed
//! notifications.

use std::sync::{Arc, Weak};

use contracts::{RecordingNotification, RecordingStorage};
use tokio::sync::broadcast;
use tracing::warn;

use crate::RecordingCoordinator;

pub struct NotificationFeed<S> {
    coordinator: Weak<RecordingCoordinator<S>>,
    rx: broadcast::Receiver<RecordingNotification>,
    initial: Option<RecordingNotification>,
}

impl<S> NotificationFeed<S>
where
    S: RecordingStorage + Send + Sync + 'static,
{
    pub(crate) fn new(coordinator: &Arc<RecordingCoordinator<S>>) -> Self {
        let rx = coordinator.subscribe_raw();
        let initial = Some(coordinator.snapshot_notification());
        Self {
            coordinator: Arc::downgrade(coordinator),
            rx,
            initial,
        }
    }

    /// `None` once the coordinator is dropped
    pub async fn recv(&mut self) -> Option<RecordingNotification> {
        if let Some(initial) = self.initial.take() {
            return Some(initial);
        }
        match self.rx.recv().await {
            Ok(notification) => Some(notification),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "recording subscriber lagged, resending snapshot");
                let coordinator = self.coordinator.upgrade()?;
                Some(coordinator.snapshot_notification())
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Non-waiting variant of [`Self::recv`]
    pub fn try_recv(&mut self) -> Option<RecordingNotification> {
        if let Some(initial) = self.initial.take() {
            return Some(initial);
        }
        match self.rx.try_recv() {
            Ok(notification) => Some(notification),
            Err(broadcast::error::TryRecvError::Lagged(_)) => {
                let coordinator = self.coordinator.upgrade()?;
                Some(coordinator.snapshot_notification())
            }
            Err(_) => None,
        }
    }
}
