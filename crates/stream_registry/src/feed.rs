//! Discovery feed
//!
//! Every registry mutation is broadcast as a [`CapacityEvent`] carrying the
//! changed instance only. The full view is built once per subscriber at
//! subscription and again only when that subscriber lags.

use std::sync::{Arc, Weak};

use contracts::{AvailableRobotCapacityUpdate, AvailableRobotInstance, InstanceKey, TrackKind};
use tokio::sync::broadcast;
use tracing::warn;

use crate::StreamRegistry;

/// What changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryChange {
    TrackPublished {
        key: InstanceKey,
        kind: TrackKind,
        label: String,
    },
    TrackUnpublished {
        key: InstanceKey,
        kind: TrackKind,
        label: String,
    },
    Connected {
        key: InstanceKey,
        connections: u32,
    },
    Disconnected {
        key: InstanceKey,
        connections: u32,
    },
    Reserved {
        key: InstanceKey,
    },
    Released {
        key: InstanceKey,
    },
    InstanceRemoved {
        key: InstanceKey,
    },
}

impl RegistryChange {
    pub fn key(&self) -> &InstanceKey {
        match self {
            RegistryChange::TrackPublished { key, .. }
            | RegistryChange::TrackUnpublished { key, .. }
            | RegistryChange::Connected { key, .. }
            | RegistryChange::Disconnected { key, .. }
            | RegistryChange::Reserved { key }
            | RegistryChange::Released { key }
            | RegistryChange::InstanceRemoved { key } => key,
        }
    }
}

/// A mutation plus the changed instance as it stood right after it.
///
/// `instance` is `None` once the instance is removed.
#[derive(Debug, Clone)]
pub struct CapacityEvent {
    pub change: RegistryChange,
    pub instance: Option<AvailableRobotInstance>,
}

#[derive(Debug, Clone)]
pub enum DiscoveryUpdate {
    Change(CapacityEvent),
    /// The subscriber fell behind; this is the current full state
    Resync(AvailableRobotCapacityUpdate),
}

impl DiscoveryUpdate {
    /// View of one instance carried by this update, if any
    pub fn instance(&self, robot_id: &str, instance: u32) -> Option<&AvailableRobotInstance> {
        match self {
            DiscoveryUpdate::Change(event) => {
                let key = event.change.key();
                if key.robot_id != robot_id || key.instance != instance {
                    return None;
                }
                event.instance.as_ref()
            }
            DiscoveryUpdate::Resync(update) => update.instance(robot_id, instance),
        }
    }
}

/// Subscriber handle returned by [`StreamRegistry::discovery_feed`]
pub struct DiscoveryFeed {
    registry: Weak<StreamRegistry>,
    rx: broadcast::Receiver<CapacityEvent>,
    initial: Option<AvailableRobotCapacityUpdate>,
}

impl DiscoveryFeed {
    pub(crate) fn new(registry: &Arc<StreamRegistry>) -> Self {
        // Subscribe before the snapshot so nothing falls between them.
        let rx = registry.subscribe_events();
        let initial = Some(registry.snapshot());
        Self {
            registry: Arc::downgrade(registry),
            rx,
            initial,
        }
    }

    /// Next update. The first call yields the state at subscription time.
    /// Returns `None` once the registry is dropped.
    pub async fn recv(&mut self) -> Option<DiscoveryUpdate> {
        if let Some(initial) = self.initial.take() {
            return Some(DiscoveryUpdate::Resync(initial));
        }
        match self.rx.recv().await {
            Ok(event) => Some(DiscoveryUpdate::Change(event)),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "discovery subscriber lagged, resending snapshot");
                let registry = self.registry.upgrade()?;
                Some(DiscoveryUpdate::Resync(registry.snapshot()))
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}
