//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 配置到服务的装配测试
//! - 模拟机器人 e2e 测试（注册 → 同步 → 录制）
//! - 连接协商与容量竞争

#[cfg(test)]
mod contract_tests {
    use contracts::{Classify, ContractError, ErrorKind, PlatformBlueprint};

    #[test]
    fn test_blueprint_from_config_loader() {
        let blueprint: PlatformBlueprint = config_loader::ConfigLoader::load_from_str(
            r#"
[sync]
tolerance_ms = 50.0

[recording]
grace_period_s = 5.0
"#,
            config_loader::ConfigFormat::Toml,
        )
        .unwrap();
        assert_eq!(blueprint.sync.output_frequency_hz, 10.0);
        assert!(blueprint.robots.is_empty());
    }

    #[test]
    fn test_invalid_config_is_invalid_input() {
        let err: ContractError = config_loader::ConfigLoader::load_from_str(
            "[sync]\ntolerance_ms = -1.0\n\n[recording]\ngrace_period_s = 5.0\n",
            config_loader::ConfigFormat::Toml,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use contracts::{
        Classify, CollaboratorError, DataType, ErrorKind, InstanceKey, PacingMode,
        PlatformBlueprint, RecordingStorage, SyncedData,
    };
    use ingestion::{IngestionPipeline, MockSampleSource, RobotAdapter};
    use observability::TelemetryAggregator;
    use parking_lot::Mutex;
    use recording::{RecordingCoordinator, RecordingRequest, RecordingState};
    use stream_registry::{DiscoveryUpdate, RegistryChange, StreamRegistry};
    use sync_engine::{wall_clock_now, CursorSpec, SyncService};

    const PLATFORM: &str = r#"
[sync]
tolerance_ms = 50.0
output_frequency_hz = 10.0

[recording]
grace_period_s = 5.0

[[robots]]
robot_id = "robot-7"

[[robots.tracks]]
kind = "JOINTS"
label = "arm"
frequency_hz = 50.0

[[robots.tracks]]
kind = "LANGUAGE"
label = "instructions"
frequency_hz = 20.0
jitter_ms = 5.0
"#;

    fn blueprint(pacing: PacingMode) -> PlatformBlueprint {
        let mut blueprint = config_loader::ConfigLoader::load_from_str(
            PLATFORM,
            config_loader::ConfigFormat::Toml,
        )
        .unwrap();
        blueprint.sync.pacing = pacing;
        blueprint
    }

    fn key() -> InstanceKey {
        InstanceKey::new("robot-7", 0)
    }

    #[derive(Clone, Default)]
    struct MemoryStorage {
        saved: Arc<Mutex<Vec<(String, SyncedData)>>>,
    }

    impl RecordingStorage for MemoryStorage {
        fn name(&self) -> &str {
            "memory"
        }

        async fn save_recording(
            &self,
            recording_id: &str,
            data: &SyncedData,
        ) -> Result<(), CollaboratorError> {
            self.saved
                .lock()
                .push((recording_id.to_string(), data.clone()));
            Ok(())
        }
    }

    /// Simulated robot -> SyncService -> RecordingCoordinator -> storage
    #[tokio::test]
    async fn test_e2e_simulated_robot_recording() {
        let blueprint = blueprint(PacingMode::External);
        let registry = Arc::new(StreamRegistry::with_config(blueprint.registry.clone()));
        let sync = Arc::new(SyncService::new(blueprint.sync.clone(), registry.clone()));
        let storage = MemoryStorage::default();
        let coordinator =
            RecordingCoordinator::new(blueprint.recording.clone(), sync.clone(), storage.clone());

        let ingestion =
            IngestionPipeline::from_blueprints(&blueprint.robots, registry.clone(), sync.clone())
                .unwrap();
        assert_eq!(ingestion.start_all().unwrap(), 2);

        coordinator
            .request(RecordingRequest::new("rec-1", key()).requested_by("operator"))
            .unwrap();
        let start = wall_clock_now();
        coordinator.start("rec-1", start).await.unwrap();

        tokio::time::sleep(Duration::from_millis(350)).await;
        let outcome = coordinator.stop("rec-1", wall_clock_now()).await.unwrap();
        ingestion.stop_all();

        assert_eq!(outcome.state, RecordingState::Saved);
        assert!(outcome.frames >= 3, "only {} frames", outcome.frames);

        let saved = storage.saved.lock();
        let (id, data) = &saved[0];
        assert_eq!(id, "rec-1");
        assert_eq!(data.robot_id, "robot-7");
        assert_eq!(data.start_time, start);
        // Frames are on the 10 Hz grid, strictly ordered and inside the window
        for (i, frame) in data.frames.iter().enumerate() {
            assert!((frame.timestamp - (start + i as f64 * 0.1)).abs() < 1e-6);
            assert!(frame.timestamp <= data.end_time);
        }
        assert!(data
            .frames
            .iter()
            .any(|f| f.present().contains(&DataType::JointPositions)));

        let stats = sync.stats(&key()).await;
        // The instance left the registry with the last track; its worker may
        // already be gone
        if let Ok(stats) = stats {
            assert_eq!(stats.rejected_out_of_order, 0);
        }
    }

    /// Live cursor paced by the wall clock emits the 10 Hz grid
    #[tokio::test]
    async fn test_live_preview_wall_clock() {
        let blueprint = blueprint(PacingMode::WallClock);
        let registry = Arc::new(StreamRegistry::with_config(blueprint.registry.clone()));
        let sync = Arc::new(SyncService::new(blueprint.sync.clone(), registry.clone()));
        let ingestion =
            IngestionPipeline::from_blueprints(&blueprint.robots, registry.clone(), sync.clone())
                .unwrap();
        ingestion.start_all().unwrap();

        let mut stream = sync
            .subscribe(&key(), CursorSpec::from_config(&blueprint.sync))
            .await
            .unwrap();

        let mut aggregator = TelemetryAggregator::new();
        let mut timestamps = Vec::new();
        while timestamps.len() < 3 {
            let point = tokio::time::timeout(Duration::from_secs(2), stream.next())
                .await
                .expect("sync point within 2s")
                .expect("stream open");
            aggregator.update(&point);
            timestamps.push(point.timestamp);
        }
        stream.cancel();
        ingestion.stop_all();

        for pair in timestamps.windows(2) {
            assert!((pair[1] - pair[0] - 0.1).abs() < 1e-6);
        }
        assert_eq!(aggregator.summary().total_points, 3);
    }

    /// Withdrawing the last track removes the instance and its sync worker
    #[tokio::test]
    async fn test_discovery_and_worker_cleanup() {
        let registry = Arc::new(StreamRegistry::new());
        let sync = Arc::new(SyncService::new(
            contracts::SyncEngineConfig {
                pacing: PacingMode::External,
                ..contracts::SyncEngineConfig::with_tolerance_ms(50.0)
            },
            registry.clone(),
        ));
        let mut feed = registry.discovery_feed();
        let _watch = sync.watch_registry(registry.discovery_feed());

        match feed.recv().await.unwrap() {
            DiscoveryUpdate::Resync(snapshot) => assert!(snapshot.robots.is_empty()),
            other => panic!("expected initial snapshot, got {other:?}"),
        }

        let mut adapter = RobotAdapter::new(key(), "producer-1", registry.clone(), sync.clone());
        adapter
            .add_source(Box::new(MockSampleSource::language("instructions", 100.0)))
            .unwrap();
        adapter.start().unwrap();

        let DiscoveryUpdate::Change(event) = feed.recv().await.unwrap() else {
            panic!("expected change");
        };
        assert!(matches!(event.change, RegistryChange::TrackPublished { .. }));
        assert!(event.instance.is_some());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(sync.instances(), vec![key()]);

        adapter.stop();
        let mut removed = false;
        while let Ok(Some(update)) =
            tokio::time::timeout(Duration::from_secs(1), feed.recv()).await
        {
            if let DiscoveryUpdate::Change(event) = update {
                if matches!(event.change, RegistryChange::InstanceRemoved { .. }) {
                    removed = true;
                    break;
                }
            }
        }
        assert!(removed);

        for _ in 0..50 {
            if sync.instances().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(sync.instances().is_empty());
        let err = sync.stats(&key()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}

#[cfg(test)]
mod broker_tests {
    use std::sync::Arc;

    use contracts::{
        Classify, CollaboratorError, ErrorKind, HandshakeMessage, InstanceKey, MessageType,
        OpenConnectionDetails, RegistryConfig, RobotId, TokenValidator, TrackKind, TrackSpec,
        VideoFormat,
    };
    use session_broker::{ConnectionState, SessionBroker};
    use stream_registry::StreamRegistry;

    struct SharedToken;

    impl TokenValidator for SharedToken {
        async fn validate(
            &self,
            token: &str,
            _robot_id: &RobotId,
            _instance: u32,
        ) -> Result<bool, CollaboratorError> {
            Ok(token == "secret")
        }
    }

    const PRODUCER: &str = "robot-7-producer";

    fn details() -> OpenConnectionDetails {
        OpenConnectionDetails {
            connection_token: "secret".into(),
            robot_id: "robot-7".into(),
            robot_instance: 0,
            video_format: VideoFormat::WebRtcNegotiated,
        }
    }

    fn setup(max_connections: u32) -> (Arc<SessionBroker<SharedToken>>, Arc<StreamRegistry>) {
        let registry = Arc::new(StreamRegistry::with_config(RegistryConfig {
            max_connections_per_instance: max_connections,
            ..Default::default()
        }));
        registry.publish(
            "robot-7",
            0,
            TrackSpec::new(TrackKind::Rgb, "wrist", "0", PRODUCER),
        );
        let broker = SessionBroker::new(Default::default(), registry.clone(), SharedToken);
        (broker, registry)
    }

    fn relay(
        broker: &Arc<SessionBroker<SharedToken>>,
        t: MessageType,
        id: &str,
        from: &str,
        to: &str,
    ) {
        broker
            .relay(HandshakeMessage::new(t, id, from, to, "sdp"))
            .unwrap();
    }

    /// Two consumers race for the last slot of robot-7
    #[tokio::test]
    async fn test_capacity_race_admits_one() {
        let (broker, registry) = setup(1);
        let _producer = broker.attach_peer(PRODUCER);
        let _a = broker.attach_peer("consumer-a");
        let _b = broker.attach_peer("consumer-b");

        let (a, b) = tokio::join!(
            broker.request_connection("consumer-a", details()),
            broker.request_connection("consumer-b", details()),
        );
        let (winner, consumer, loser) = match (a, b) {
            (Ok(req), Err(err)) => (req, "consumer-a", err),
            (Err(err), Ok(req)) => (req, "consumer-b", err),
            other => panic!("expected exactly one admission, got {other:?}"),
        };
        assert_eq!(loser.kind(), ErrorKind::CapacityExceeded);

        let id = winner.id;
        relay(&broker, MessageType::SdpOffer, &id, PRODUCER, consumer);
        relay(&broker, MessageType::SdpAnswer, &id, consumer, PRODUCER);
        relay(&broker, MessageType::IceCandidate, &id, consumer, PRODUCER);
        broker.confirm_connected(&id).unwrap();

        let key = InstanceKey::new("robot-7", 0);
        assert_eq!(registry.instance(&key).unwrap().connections, 1);
        assert_eq!(registry.reserved(&key), 0);

        let err = broker
            .request_connection("consumer-b", details())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CapacityExceeded);

        // Closing frees the slot again
        broker.close(&id).unwrap();
        assert!(broker
            .request_connection("consumer-b", details())
            .await
            .is_ok());
    }

    /// Handshake messages reach the peers in order and drive the state
    #[tokio::test]
    async fn test_handshake_order_and_events() {
        let (broker, _registry) = setup(4);
        let mut producer = broker.attach_peer(PRODUCER);
        let mut consumer = broker.attach_peer("consumer-a");
        let mut events = broker.subscribe_events();

        let id = broker
            .request_connection("consumer-a", details())
            .await
            .unwrap()
            .id;
        relay(&broker, MessageType::SdpOffer, &id, PRODUCER, "consumer-a");
        relay(&broker, MessageType::SdpAnswer, &id, "consumer-a", PRODUCER);
        relay(&broker, MessageType::IceCandidate, &id, PRODUCER, "consumer-a");
        assert_eq!(
            broker.connection_state(&id),
            Some(ConnectionState::IceExchanging)
        );
        broker.confirm_connected(&id).unwrap();

        let to_producer: Vec<MessageType> = std::iter::from_fn(|| producer.try_recv())
            .map(|m| m.message_type)
            .collect();
        assert_eq!(
            to_producer,
            vec![MessageType::OpenConnection, MessageType::SdpAnswer]
        );
        let to_consumer: Vec<MessageType> = std::iter::from_fn(|| consumer.try_recv())
            .map(|m| m.message_type)
            .collect();
        assert_eq!(
            to_consumer,
            vec![MessageType::SdpOffer, MessageType::IceCandidate]
        );

        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            states.push(event.to);
        }
        assert_eq!(states.first(), Some(&ConnectionState::Requested));
        assert_eq!(states.last(), Some(&ConnectionState::Connected));
    }

    #[tokio::test]
    async fn test_wrong_token_is_unauthorized() {
        let (broker, registry) = setup(4);
        let _producer = broker.attach_peer(PRODUCER);
        let mut request = details();
        request.connection_token = "guess".into();
        let err = broker
            .request_connection("consumer-a", request)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert_eq!(registry.reserved(&InstanceKey::new("robot-7", 0)), 0);
    }
}
