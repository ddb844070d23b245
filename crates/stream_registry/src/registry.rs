//! Stream registry implementation
//!
//! Single writer of robot-instance existence and advertised tracks, and the
//! authority on per-instance connection counts.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use contracts::{
    AvailableRobot, AvailableRobotCapacityUpdate, AvailableRobotInstance, InstanceKey,
    RegistryConfig, RobotId, StreamTrack, TrackKind, TrackSpec,
};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument};

use crate::{CapacityEvent, DiscoveryFeed, RegistryChange, RegistryError};

/// Per-instance state, guarded by its own lock
#[derive(Debug, Default)]
struct InstanceEntry {
    tracks: BTreeMap<TrackKind, Vec<StreamTrack>>,
    connections: u32,
    /// Slots held by in-flight handshakes
    reserved: u32,
    /// Set under the map write lock when the entry leaves the map
    removed: bool,
}

impl InstanceEntry {
    fn is_idle(&self) -> bool {
        self.tracks.is_empty() && self.connections == 0 && self.reserved == 0
    }

    fn view(&self, instance: u32) -> AvailableRobotInstance {
        AvailableRobotInstance {
            robot_instance: instance,
            tracks: self.tracks.clone(),
            connections: self.connections,
        }
    }
}

/// Central registry for all robot instances
///
/// Outer map behind a read-mostly lock; each instance has an exclusive
/// section so mutations on different instances never contend.
pub struct StreamRegistry {
    instances: RwLock<HashMap<InstanceKey, Arc<Mutex<InstanceEntry>>>>,
    events: broadcast::Sender<CapacityEvent>,
    config: RegistryConfig,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            instances: RwLock::new(HashMap::new()),
            events,
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Raw event stream. Prefer [`Self::discovery_feed`] for clients.
    pub fn subscribe_events(&self) -> broadcast::Receiver<CapacityEvent> {
        self.events.subscribe()
    }

    /// Snapshot followed by every subsequent change
    pub fn discovery_feed(self: &Arc<Self>) -> DiscoveryFeed {
        DiscoveryFeed::new(self)
    }

    /// Advertise a track. Idempotent on `(robot_id, instance, kind, label)`:
    /// republishing returns the existing track and emits nothing.
    #[instrument(name = "registry_publish", skip_all, fields(instance = instance, kind = %spec.kind, label = %spec.label))]
    pub fn publish(&self, robot_id: impl Into<RobotId>, instance: u32, spec: TrackSpec) -> StreamTrack {
        let key = InstanceKey::new(robot_id, instance);
        loop {
            let entry = self.get_or_create(&key);
            let mut guard = entry.lock();
            if guard.removed {
                // Lost a race with removal; fetch the fresh entry
                continue;
            }

            let tracks = guard.tracks.entry(spec.kind).or_default();
            if let Some(existing) = tracks.iter().find(|t| t.label == spec.label) {
                debug!(key = %key, "track already published");
                return existing.clone();
            }

            let track = StreamTrack {
                robot_id: key.robot_id.clone(),
                robot_instance: key.instance,
                stream_id: spec.stream_id.clone(),
                kind: spec.kind,
                label: spec.label.clone(),
                mid: spec.mid.clone(),
                id: uuid::Uuid::new_v4().to_string(),
                created_at: Utc::now(),
            };
            tracks.push(track.clone());
            self.emit(
                RegistryChange::TrackPublished {
                    key: key.clone(),
                    kind: spec.kind,
                    label: spec.label,
                },
                Some(&*guard),
            );
            drop(guard);

            info!(key = %key, track_id = %track.id, "track published");
            return track;
        }
    }

    /// Withdraw a track. Returns whether a track was removed.
    #[instrument(name = "registry_unpublish", skip(self), fields(key = %key))]
    pub fn unpublish(
        &self,
        key: &InstanceKey,
        kind: TrackKind,
        label: &str,
    ) -> Result<bool, RegistryError> {
        let entry = self.lookup(key)?;
        let (removed, idle) = {
            let mut guard = entry.lock();
            if guard.removed {
                return Err(RegistryError::InstanceNotFound(key.clone()));
            }
            let removed = match guard.tracks.get_mut(&kind) {
                Some(tracks) => {
                    let before = tracks.len();
                    tracks.retain(|t| t.label != label);
                    let removed = tracks.len() != before;
                    if tracks.is_empty() {
                        guard.tracks.remove(&kind);
                    }
                    removed
                }
                None => false,
            };
            if removed {
                self.emit(
                    RegistryChange::TrackUnpublished {
                        key: key.clone(),
                        kind,
                        label: label.to_string(),
                    },
                    Some(&*guard),
                );
            }
            (removed, guard.is_idle())
        };

        if removed {
            info!(%kind, label, "track unpublished");
        }
        if idle {
            self.remove_if_idle(key);
        }
        Ok(removed)
    }

    /// Attach a consumer directly (no handshake)
    pub fn connect(&self, key: &InstanceKey) -> Result<u32, RegistryError> {
        self.mutate(key, |entry| {
            self.check_capacity(key, entry)?;
            entry.connections += 1;
            let connections = entry.connections;
            Ok((
                connections,
                RegistryChange::Connected {
                    key: key.clone(),
                    connections,
                },
            ))
        })
    }

    /// Detach a consumer. Saturates at zero.
    pub fn disconnect(&self, key: &InstanceKey) -> Result<u32, RegistryError> {
        let (count, idle) = self.mutate(key, |entry| {
            entry.connections = entry.connections.saturating_sub(1);
            let connections = entry.connections;
            Ok((
                (connections, entry.is_idle()),
                RegistryChange::Disconnected {
                    key: key.clone(),
                    connections,
                },
            ))
        })?;
        if idle {
            self.remove_if_idle(key);
        }
        Ok(count)
    }

    /// Hold a slot for an in-flight handshake. Counts against capacity.
    pub fn reserve(&self, key: &InstanceKey) -> Result<(), RegistryError> {
        self.mutate(key, |entry| {
            self.check_capacity(key, entry)?;
            entry.reserved += 1;
            Ok(((), RegistryChange::Reserved { key: key.clone() }))
        })
    }

    /// Turn a reservation into a live connection
    pub fn commit(&self, key: &InstanceKey) -> Result<u32, RegistryError> {
        self.mutate(key, |entry| {
            if entry.reserved == 0 {
                return Err(RegistryError::NoReservation(key.clone()));
            }
            entry.reserved -= 1;
            entry.connections += 1;
            let connections = entry.connections;
            Ok((
                connections,
                RegistryChange::Connected {
                    key: key.clone(),
                    connections,
                },
            ))
        })
    }

    /// Roll back a reservation
    pub fn release_reservation(&self, key: &InstanceKey) -> Result<(), RegistryError> {
        let idle = self.mutate(key, |entry| {
            if entry.reserved == 0 {
                return Err(RegistryError::NoReservation(key.clone()));
            }
            entry.reserved -= 1;
            Ok((entry.is_idle(), RegistryChange::Released { key: key.clone() }))
        })?;
        if idle {
            self.remove_if_idle(key);
        }
        Ok(())
    }

    /// Peer id of the producer serving this instance
    pub fn producer_of(&self, key: &InstanceKey) -> Option<String> {
        let entry = self.instances.read().get(key).cloned()?;
        let guard = entry.lock();
        guard
            .tracks
            .values()
            .flatten()
            .next()
            .map(|t| t.stream_id.clone())
    }

    pub fn contains(&self, key: &InstanceKey) -> bool {
        self.instances.read().contains_key(key)
    }

    pub fn instance(&self, key: &InstanceKey) -> Option<AvailableRobotInstance> {
        let entry = self.instances.read().get(key).cloned()?;
        let guard = entry.lock();
        Some(guard.view(key.instance))
    }

    /// Slots currently held by in-flight handshakes
    pub fn reserved(&self, key: &InstanceKey) -> u32 {
        self.instances
            .read()
            .get(key)
            .map(|entry| entry.lock().reserved)
            .unwrap_or(0)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.read().len()
    }

    /// Full capacity view of every known instance
    pub fn snapshot(&self) -> AvailableRobotCapacityUpdate {
        let entries: Vec<(InstanceKey, Arc<Mutex<InstanceEntry>>)> = self
            .instances
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut robots: BTreeMap<RobotId, AvailableRobot> = BTreeMap::new();
        for (key, entry) in entries {
            let guard = entry.lock();
            if guard.removed {
                continue;
            }
            let robot = robots
                .entry(key.robot_id.clone())
                .or_insert_with(|| AvailableRobot {
                    robot_id: key.robot_id.clone(),
                    instances: BTreeMap::new(),
                });
            robot.instances.insert(key.instance, guard.view(key.instance));
        }

        AvailableRobotCapacityUpdate {
            robots: robots.into_values().collect(),
        }
    }

    fn lookup(&self, key: &InstanceKey) -> Result<Arc<Mutex<InstanceEntry>>, RegistryError> {
        self.instances
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| RegistryError::InstanceNotFound(key.clone()))
    }

    fn get_or_create(&self, key: &InstanceKey) -> Arc<Mutex<InstanceEntry>> {
        if let Some(entry) = self.instances.read().get(key) {
            return entry.clone();
        }
        self.instances
            .write()
            .entry(key.clone())
            .or_insert_with(|| {
                info!(key = %key, "robot instance created");
                Arc::new(Mutex::new(InstanceEntry::default()))
            })
            .clone()
    }

    /// Run `f` inside the instance's exclusive section and broadcast the
    /// change it reports before the section ends
    fn mutate<T>(
        &self,
        key: &InstanceKey,
        f: impl FnOnce(&mut InstanceEntry) -> Result<(T, RegistryChange), RegistryError>,
    ) -> Result<T, RegistryError> {
        let entry = self.lookup(key)?;
        let mut guard = entry.lock();
        if guard.removed {
            return Err(RegistryError::InstanceNotFound(key.clone()));
        }
        let result = f(&mut guard);
        observability::record_capacity(key, guard.connections, guard.reserved);
        let (value, change) = result?;
        self.emit(change, Some(&*guard));
        Ok(value)
    }

    fn check_capacity(&self, key: &InstanceKey, entry: &InstanceEntry) -> Result<(), RegistryError> {
        let max = self.config.max_connections_per_instance;
        if entry.connections + entry.reserved >= max {
            debug!(key = %key, connections = entry.connections, reserved = entry.reserved, "capacity exceeded");
            return Err(RegistryError::CapacityExceeded {
                key: key.clone(),
                max,
            });
        }
        Ok(())
    }

    /// Remove the instance if it is still idle once the map is write-locked
    fn remove_if_idle(&self, key: &InstanceKey) {
        let removed = {
            let mut instances = self.instances.write();
            let idle = instances.get(key).is_some_and(|entry| {
                let mut guard = entry.lock();
                if guard.is_idle() {
                    guard.removed = true;
                }
                guard.removed
            });
            let removed = idle && instances.remove(key).is_some();
            // Still under the map lock: a re-created entry cannot announce
            // itself before this
            if removed {
                self.emit(RegistryChange::InstanceRemoved { key: key.clone() }, None);
            }
            removed
        };
        if removed {
            info!(key = %key, "robot instance removed");
        }
    }

    /// Called with the changed instance still locked, so events of one
    /// instance go out in mutation order. Only that instance's view is built.
    fn emit(&self, change: RegistryChange, entry: Option<&InstanceEntry>) {
        if self.events.receiver_count() == 0 {
            return;
        }
        let instance = entry.map(|e| e.view(change.key().instance));
        // Receivers may drop between the check and the send
        let _ = self.events.send(CapacityEvent { change, instance });
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(kind: TrackKind, label: &str) -> TrackSpec {
        TrackSpec::new(kind, label, "0", "producer-1")
    }

    fn registry(max: u32) -> StreamRegistry {
        StreamRegistry::with_config(RegistryConfig {
            max_connections_per_instance: max,
            event_capacity: 64,
        })
    }

    #[test]
    fn test_publish_is_idempotent() {
        let registry = registry(2);
        let mut events = registry.subscribe_events();

        let first = registry.publish("robot-7", 0, spec(TrackKind::Rgb, "wrist"));
        let again = registry.publish("robot-7", 0, spec(TrackKind::Rgb, "wrist"));
        assert_eq!(first.id, again.id);

        let snapshot = registry.snapshot();
        let instance = snapshot.instance("robot-7", 0).unwrap();
        assert_eq!(instance.tracks[&TrackKind::Rgb].len(), 1);

        // Exactly one mutation event
        let event = events.try_recv().unwrap();
        assert!(matches!(event.change, RegistryChange::TrackPublished { .. }));
        assert_eq!(event.instance.unwrap().tracks[&TrackKind::Rgb].len(), 1);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_unpublish_last_track_removes_instance() {
        let registry = registry(2);
        let key = InstanceKey::new("robot-1", 3);
        registry.publish("robot-1", 3, spec(TrackKind::Joints, "arm"));

        assert!(registry.unpublish(&key, TrackKind::Joints, "arm").unwrap());
        assert!(!registry.contains(&key));
        assert_eq!(
            registry.unpublish(&key, TrackKind::Joints, "arm"),
            Err(RegistryError::InstanceNotFound(key))
        );
    }

    #[test]
    fn test_unpublish_unknown_label_is_noop() {
        let registry = registry(2);
        let key = InstanceKey::new("robot-1", 0);
        registry.publish("robot-1", 0, spec(TrackKind::Joints, "arm"));
        assert!(!registry.unpublish(&key, TrackKind::Joints, "leg").unwrap());
        assert!(registry.contains(&key));
    }

    #[test]
    fn test_connected_instance_survives_unpublish() {
        let registry = registry(2);
        let key = InstanceKey::new("robot-1", 0);
        registry.publish("robot-1", 0, spec(TrackKind::Language, "cmd"));
        registry.connect(&key).unwrap();

        registry.unpublish(&key, TrackKind::Language, "cmd").unwrap();
        assert!(registry.contains(&key));

        assert_eq!(registry.disconnect(&key).unwrap(), 0);
        assert!(!registry.contains(&key));
    }

    #[test]
    fn test_connect_unknown_instance() {
        let registry = registry(2);
        let key = InstanceKey::new("ghost", 0);
        assert_eq!(
            registry.connect(&key),
            Err(RegistryError::InstanceNotFound(key.clone()))
        );
        assert!(registry.disconnect(&key).is_err());
    }

    #[test]
    fn test_reservations_count_against_capacity() {
        let registry = registry(2);
        let key = InstanceKey::new("robot-7", 0);
        registry.publish("robot-7", 0, spec(TrackKind::Rgb, "wrist"));

        registry.connect(&key).unwrap();
        registry.reserve(&key).unwrap();
        assert!(matches!(
            registry.reserve(&key),
            Err(RegistryError::CapacityExceeded { max: 2, .. })
        ));

        registry.release_reservation(&key).unwrap();
        registry.reserve(&key).unwrap();
        assert_eq!(registry.commit(&key).unwrap(), 2);
        assert!(registry.commit(&key).is_err());
        assert!(registry.connect(&key).is_err());
    }

    #[test]
    fn test_concurrent_reserve_for_last_slot() {
        let registry = Arc::new(registry(2));
        let key = InstanceKey::new("robot-7", 0);
        registry.publish("robot-7", 0, spec(TrackKind::Rgb, "wrist"));
        registry.connect(&key).unwrap();

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let registry = registry.clone();
                let key = key.clone();
                std::thread::spawn(move || registry.reserve(&key).is_ok())
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(wins, 1);
    }

    #[test]
    fn test_producer_of() {
        let registry = registry(2);
        let key = InstanceKey::new("robot-7", 0);
        assert_eq!(registry.producer_of(&key), None);
        registry.publish("robot-7", 0, spec(TrackKind::Rgb, "wrist"));
        assert_eq!(registry.producer_of(&key).as_deref(), Some("producer-1"));
    }

    #[test]
    fn test_snapshot_serialises_track_kinds_as_keys() {
        let registry = registry(2);
        registry.publish("robot-7", 1, spec(TrackKind::Depth, "head"));
        let json = serde_json::to_value(registry.snapshot()).unwrap();
        let tracks = &json["robots"][0]["instances"]["1"]["tracks"]["DEPTH"];
        assert_eq!(tracks[0]["label"], "head");
    }

    #[tokio::test]
    async fn test_discovery_feed_starts_with_snapshot() {
        let registry = Arc::new(registry(2));
        registry.publish("robot-7", 0, spec(TrackKind::Rgb, "wrist"));

        let mut feed = registry.discovery_feed();
        let first = feed.recv().await.unwrap();
        let crate::DiscoveryUpdate::Resync(snapshot) = &first else {
            panic!("expected snapshot, got {first:?}");
        };
        assert_eq!(snapshot.robots.len(), 1);

        registry.connect(&InstanceKey::new("robot-7", 0)).unwrap();
        let next = feed.recv().await.unwrap();
        assert_eq!(next.instance("robot-7", 0).unwrap().connections, 1);
    }

    #[test]
    fn test_events_carry_only_the_changed_instance() {
        let registry = registry(4);
        registry.publish("robot-1", 0, spec(TrackKind::Rgb, "wrist"));
        registry.publish("robot-2", 0, spec(TrackKind::Rgb, "wrist"));
        let mut events = registry.subscribe_events();

        let key = InstanceKey::new("robot-2", 0);
        registry.reserve(&key).unwrap();
        registry.commit(&key).unwrap();
        let reserved = events.try_recv().unwrap();
        assert_eq!(reserved.change, RegistryChange::Reserved { key: key.clone() });
        assert_eq!(reserved.instance.unwrap().connections, 0);
        let connected = events.try_recv().unwrap();
        assert_eq!(connected.instance.unwrap().connections, 1);

        registry.disconnect(&key).unwrap();
        registry.unpublish(&key, TrackKind::Rgb, "wrist").unwrap();
        let changes: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        assert_eq!(changes.len(), 3);
        let removed = changes.last().unwrap();
        assert_eq!(removed.change, RegistryChange::InstanceRemoved { key });
        assert!(removed.instance.is_none());
    }

    #[test]
    fn test_instance_events_stay_ordered_under_contention() {
        let registry = Arc::new(registry(1_000));
        let key = InstanceKey::new("robot-7", 0);
        registry.publish("robot-7", 0, spec(TrackKind::Rgb, "wrist"));
        let mut events = registry.subscribe_events();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                let key = key.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        registry.connect(&key).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let counts: Vec<u32> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|e| e.instance.unwrap().connections)
            .collect();
        assert_eq!(counts, (1..=40).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_lagging_feed_resyncs() {
        let registry = Arc::new(StreamRegistry::with_config(RegistryConfig {
            max_connections_per_instance: 100,
            event_capacity: 2,
        }));
        let mut feed = registry.discovery_feed();
        let _ = feed.recv().await;

        for i in 0..10 {
            registry.publish("robot", 0, spec(TrackKind::Custom, &format!("c{i}")));
        }
        let update = feed.recv().await.unwrap();
        assert!(matches!(update, crate::DiscoveryUpdate::Resync(_)));
        let instance = update.instance("robot", 0).unwrap().clone();
        assert_eq!(instance.tracks[&TrackKind::Custom].len(), 10);
    }
}
