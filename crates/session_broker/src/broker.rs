//! Session broker
//!
//! Relays handshake messages between a consumer and the producer of a robot
//! instance and tracks each attempt through its state machine. Every attempt
//! owns a [`StateGate`]; messages, deadlines and the liveness monitor all
//! claim it, so exactly one of two racing events takes effect.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Instant as StdInstant;

use chrono::Utc;
use contracts::{
    call_collaborator, BrokerConfig, HandshakeMessage, InstanceKey, MessageType,
    OpenConnectionDetails, OpenConnectionRequest, StateGate, StreamAliveResponse,
    TokenValidator, Transition,
};
use parking_lot::{Mutex, RwLock};
use stream_registry::StreamRegistry;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::mailbox::PeerMailbox;
use crate::state::{ConnectionState, FailureReason, Hold, Phase};
use crate::BrokerError;

/// Published on every state change. `from` is `None` for a new attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionEvent {
    pub connection_id: String,
    pub from: Option<ConnectionState>,
    pub to: ConnectionState,
}

/// Outcome of one liveness sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LivenessReport {
    pub marked_dead: usize,
    pub closed: usize,
}

struct Attempt {
    id: String,
    consumer_id: String,
    producer_id: String,
    key: InstanceKey,
    gate: StateGate<Phase>,
    /// Pending handshake timer and the gate epoch it was armed for
    deadline: Mutex<Option<(u64, AbortHandle)>>,
}

impl Attempt {
    fn is_peer_pair(&self, from: &str, to: &str) -> bool {
        (from == self.consumer_id && to == self.producer_id)
            || (from == self.producer_id && to == self.consumer_id)
    }

    fn cancel_deadline(&self) {
        if let Some((_, handle)) = self.deadline.lock().take() {
            handle.abort();
        }
    }
}

pub struct SessionBroker<V> {
    config: BrokerConfig,
    registry: Arc<StreamRegistry>,
    validator: V,
    attempts: RwLock<HashMap<String, Arc<Attempt>>>,
    peers: RwLock<HashMap<String, mpsc::UnboundedSender<HandshakeMessage>>>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl<V> SessionBroker<V>
where
    V: TokenValidator + Send + Sync + 'static,
{
    pub fn new(config: BrokerConfig, registry: Arc<StreamRegistry>, validator: V) -> Arc<Self> {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Arc::new(Self {
            config,
            registry,
            validator,
            attempts: RwLock::new(HashMap::new()),
            peers: RwLock::new(HashMap::new()),
            events,
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Register a peer. Re-attaching replaces the previous mailbox.
    pub fn attach_peer(&self, peer_id: impl Into<String>) -> PeerMailbox {
        let peer_id = peer_id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.write().insert(peer_id.clone(), tx);
        debug!(peer = %peer_id, "peer attached");
        PeerMailbox::new(peer_id, rx)
    }

    pub fn detach_peer(&self, peer_id: &str) -> bool {
        self.peers.write().remove(peer_id).is_some()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    pub fn connection_state(&self, connection_id: &str) -> Option<ConnectionState> {
        self.attempt(connection_id).map(|a| a.gate.state().state)
    }

    /// Attempts that have not reached a terminal state
    pub fn connection_count(&self) -> usize {
        self.attempts.read().len()
    }

    /// Open a connection attempt on behalf of `consumer_id`.
    ///
    /// Validates the token, reserves a registry slot and forwards an
    /// `OPEN_CONNECTION` message to the producer.
    #[instrument(
        name = "broker_request_connection",
        skip(self, details),
        fields(robot_id = %details.robot_id, instance = details.robot_instance)
    )]
    pub async fn request_connection(
        self: &Arc<Self>,
        consumer_id: &str,
        details: OpenConnectionDetails,
    ) -> Result<OpenConnectionRequest, BrokerError> {
        let key = InstanceKey::new(details.robot_id.clone(), details.robot_instance);

        let started = StdInstant::now();
        let validated = call_collaborator(
            "token_validator",
            self.config.collaborator_timeout(),
            || {
                self.validator.validate(
                    &details.connection_token,
                    &details.robot_id,
                    details.robot_instance,
                )
            },
        )
        .await;
        observability::record_collaborator_call(
            "token_validator",
            validated.is_ok(),
            started.elapsed().as_secs_f64() * 1000.0,
        );
        if !validated? {
            warn!(consumer = consumer_id, "connection token rejected");
            return Err(BrokerError::Unauthorized {
                robot_id: key.robot_id.clone(),
                instance: key.instance,
            });
        }

        self.registry.reserve(&key)?;

        let Some(producer_id) = self.registry.producer_of(&key) else {
            self.release(&key, Hold::Reservation);
            return Err(BrokerError::Registry(
                stream_registry::RegistryError::InstanceNotFound(key),
            ));
        };
        let Some(producer_tx) = self.peers.read().get(&producer_id).cloned() else {
            self.release(&key, Hold::Reservation);
            return Err(BrokerError::PeerNotFound(producer_id));
        };

        let request = OpenConnectionRequest {
            from_id: consumer_id.to_string(),
            to_id: producer_id.clone(),
            robot_id: key.robot_id.clone(),
            robot_instance: key.instance,
            video_format: details.video_format,
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
        };
        let data = match serde_json::to_string(&request) {
            Ok(data) => data,
            Err(e) => {
                self.release(&key, Hold::Reservation);
                return Err(e.into());
            }
        };

        let attempt = Arc::new(Attempt {
            id: request.id.clone(),
            consumer_id: consumer_id.to_string(),
            producer_id: producer_id.clone(),
            key,
            gate: StateGate::new(Phase::requested()),
            deadline: Mutex::new(None),
        });
        self.attempts
            .write()
            .insert(attempt.id.clone(), attempt.clone());
        self.arm_deadline(&attempt, attempt.gate.epoch());
        self.emit(&attempt.id, None, ConnectionState::Requested);

        let mut message = HandshakeMessage::new(
            MessageType::OpenConnection,
            &request.id,
            consumer_id,
            &producer_id,
            data,
        );
        message.id = Some(Uuid::new_v4().to_string());
        if producer_tx.send(message).is_err() {
            warn!(producer = %producer_id, "producer mailbox closed");
        }
        observability::record_relay("OPEN_CONNECTION", true);

        info!(connection_id = %request.id, consumer = consumer_id, producer = %producer_id, "connection requested");
        Ok(request)
    }

    /// Advance the attempt and forward the message to its recipient.
    ///
    /// An illegal message aborts the attempt. A missing recipient leaves it
    /// untouched.
    #[instrument(
        name = "broker_relay",
        skip(self, message),
        fields(connection_id = %message.connection_id, message_type = ?message.message_type)
    )]
    pub fn relay(self: &Arc<Self>, mut message: HandshakeMessage) -> Result<(), BrokerError> {
        let type_name = message_type_name(message.message_type);
        let attempt = self
            .attempt(&message.connection_id)
            .ok_or_else(|| BrokerError::ConnectionNotFound(message.connection_id.clone()))?;

        if !attempt.is_peer_pair(&message.from_id, &message.to_id) {
            observability::record_relay(type_name, false);
            let reason = format!(
                "{} -> {} is not a peer pair of this connection",
                message.from_id, message.to_id
            );
            self.abort(&attempt, FailureReason::ProtocolViolation(reason.clone()));
            return Err(BrokerError::protocol_violation(&attempt.id, reason));
        }

        let recipient = self
            .peers
            .read()
            .get(&message.to_id)
            .cloned()
            .ok_or_else(|| BrokerError::PeerNotFound(message.to_id.clone()))?;

        let transition = attempt.gate.transition(|phase| {
            if phase.state.is_terminal() {
                return Err(BrokerError::invalid_transition(
                    &attempt.id,
                    phase.state.as_str(),
                    "relay",
                ));
            }
            match phase.state.on_message(message.message_type) {
                Some(next) => Ok(phase.with_state(next)),
                None => Err(BrokerError::protocol_violation(
                    &attempt.id,
                    format!("{type_name} is illegal in state {}", phase.state),
                )),
            }
        });
        let transition = match transition {
            Ok(t) => t,
            Err(err) => {
                observability::record_relay(type_name, false);
                if let BrokerError::ProtocolViolation { message: reason, .. } = &err {
                    self.abort(&attempt, FailureReason::ProtocolViolation(reason.clone()));
                }
                return Err(err);
            }
        };

        self.arm_deadline(&attempt, transition.epoch);
        if transition.from.state != transition.to.state {
            self.record(&attempt, &transition);
        }

        if message.id.is_none() {
            message.id = Some(Uuid::new_v4().to_string());
        }
        if recipient.send(message).is_err() {
            warn!(connection_id = %attempt.id, "recipient mailbox closed");
        }
        observability::record_relay(type_name, true);
        Ok(())
    }

    /// Mark a fully negotiated attempt as connected
    #[instrument(name = "broker_confirm_connected", skip(self))]
    pub fn confirm_connected(&self, connection_id: &str) -> Result<(), BrokerError> {
        let attempt = self.require(connection_id)?;
        let transition = attempt.gate.transition(|phase| match phase.state {
            ConnectionState::IceExchanging => {
                self.registry.commit(&attempt.key)?;
                Ok(Phase {
                    state: ConnectionState::Connected,
                    last_heartbeat: Some(Instant::now()),
                    dead_since: None,
                })
            }
            _ => Err(BrokerError::invalid_transition(
                connection_id,
                phase.state.as_str(),
                "confirm",
            )),
        })?;
        attempt.cancel_deadline();
        self.record(&attempt, &transition);
        info!(connection_id, "connection established");
        Ok(())
    }

    /// Peer rejection
    #[instrument(name = "broker_reject", skip(self))]
    pub fn reject(&self, connection_id: &str, reason: &str) -> Result<(), BrokerError> {
        let attempt = self.require(connection_id)?;
        self.finish(
            &attempt,
            ConnectionState::Failed(FailureReason::Rejected(reason.to_string())),
            "reject",
        )
    }

    /// Tear down an attempt in any non-terminal state
    #[instrument(name = "broker_close", skip(self))]
    pub fn close(&self, connection_id: &str) -> Result<(), BrokerError> {
        let attempt = self.require(connection_id)?;
        self.finish(&attempt, ConnectionState::Closed, "close")
    }

    /// Heartbeat from a connected peer. A connection the monitor declared
    /// dead re-acquires its registry slot.
    #[instrument(name = "broker_keep_alive", skip(self))]
    pub fn keep_alive(&self, connection_id: &str) -> Result<StreamAliveResponse, BrokerError> {
        let attempt = self.require(connection_id)?;
        let now = Instant::now();
        let transition = attempt.gate.transition(|phase| {
            if phase.state != ConnectionState::Connected {
                return Err(BrokerError::invalid_transition(
                    connection_id,
                    phase.state.as_str(),
                    "keep alive",
                ));
            }
            if phase.dead_since.is_some() {
                self.registry.connect(&attempt.key)?;
            }
            Ok(Phase {
                state: ConnectionState::Connected,
                last_heartbeat: Some(now),
                dead_since: None,
            })
        })?;

        let resurrected = transition.from.dead_since.is_some();
        if resurrected {
            info!(connection_id, "connection resurrected");
        }
        Ok(StreamAliveResponse { resurrected })
    }

    /// Periodically run [`Self::check_liveness`]
    pub fn spawn_liveness_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        let broker: Weak<Self> = Arc::downgrade(self);
        let period = self.config.liveness_check_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(broker) = broker.upgrade() else {
                    break;
                };
                broker.check_liveness();
            }
        })
    }

    /// Declare silent connections dead and forget dead ones past retention
    pub fn check_liveness(&self) -> LivenessReport {
        let now = Instant::now();
        let heartbeat_timeout = self.config.heartbeat_timeout();
        let retention = self.config.dead_retention();
        let mut report = LivenessReport::default();

        let attempts: Vec<Arc<Attempt>> = self.attempts.read().values().cloned().collect();
        for attempt in attempts {
            let transition = attempt.gate.transition(|phase| {
                if phase.state != ConnectionState::Connected {
                    return Err(());
                }
                match (phase.dead_since, phase.last_heartbeat) {
                    (Some(since), _) if now.duration_since(since) >= retention => {
                        Ok(phase.with_state(ConnectionState::Closed))
                    }
                    (None, Some(beat)) if now.duration_since(beat) >= heartbeat_timeout => {
                        Ok(Phase {
                            dead_since: Some(now),
                            ..phase.clone()
                        })
                    }
                    _ => Err(()),
                }
            });
            let Ok(transition) = transition else {
                continue;
            };

            self.release(&attempt.key, transition.from.hold());
            if transition.to.state.is_terminal() {
                report.closed += 1;
                self.forget(&attempt);
                self.record(&attempt, &transition);
                info!(connection_id = %attempt.id, "dead connection closed");
            } else {
                report.marked_dead += 1;
                warn!(connection_id = %attempt.id, "heartbeat missed, connection marked dead");
            }
        }
        report
    }

    fn finish(
        &self,
        attempt: &Arc<Attempt>,
        terminal: ConnectionState,
        operation: &'static str,
    ) -> Result<(), BrokerError> {
        let transition = attempt.gate.transition(|phase| {
            if phase.state.is_terminal() {
                return Err(BrokerError::invalid_transition(
                    &attempt.id,
                    phase.state.as_str(),
                    operation,
                ));
            }
            Ok(phase.with_state(terminal))
        })?;
        self.conclude(attempt, &transition);
        Ok(())
    }

    /// Fail an attempt after a protocol violation. A no-op when it already
    /// reached a terminal state.
    fn abort(&self, attempt: &Arc<Attempt>, reason: FailureReason) {
        let transition = attempt.gate.transition(|phase| {
            if phase.state.is_terminal() {
                return Err(());
            }
            Ok(phase.with_state(ConnectionState::Failed(reason)))
        });
        if let Ok(transition) = transition {
            self.conclude(attempt, &transition);
        }
    }

    /// Release whatever the attempt held and drop it
    fn conclude(&self, attempt: &Arc<Attempt>, transition: &Transition<Phase>) {
        attempt.cancel_deadline();
        self.release(&attempt.key, transition.from.hold());
        self.forget(attempt);
        self.record(attempt, transition);
        info!(connection_id = %attempt.id, state = %transition.to.state, "connection ended");
    }

    /// Relays transition the gate and arm their timer in separate critical
    /// sections, so an older epoch may arrive here last. It must not displace
    /// the newer timer.
    fn arm_deadline(self: &Arc<Self>, attempt: &Arc<Attempt>, epoch: u64) {
        let mut slot = attempt.deadline.lock();
        if matches!(&*slot, Some((armed, _)) if *armed > epoch) {
            debug!(connection_id = %attempt.id, epoch, "stale deadline not armed");
            return;
        }

        let broker = Arc::downgrade(self);
        let target = attempt.clone();
        let timeout = self.config.handshake_timeout();
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(broker) = broker.upgrade() {
                broker.expire(&target, epoch);
            }
        });
        if let Some((_, previous)) = slot.replace((epoch, task.abort_handle())) {
            previous.abort();
        }
    }

    fn expire(&self, attempt: &Arc<Attempt>, armed_epoch: u64) {
        let transition = attempt.gate.expire_if(armed_epoch, |phase| {
            phase
                .state
                .is_handshaking()
                .then(|| phase.with_state(ConnectionState::Failed(FailureReason::HandshakeTimeout)))
        });
        if let Some(transition) = transition {
            warn!(connection_id = %attempt.id, state = %transition.from.state, "handshake timed out");
            self.release(&attempt.key, transition.from.hold());
            self.forget(attempt);
            self.record(attempt, &transition);
        }
    }

    fn release(&self, key: &InstanceKey, hold: Hold) {
        let result = match hold {
            Hold::Reservation => self.registry.release_reservation(key),
            Hold::Connection => self.registry.disconnect(key).map(|_| ()),
            Hold::Nothing => Ok(()),
        };
        if let Err(e) = result {
            warn!(%key, error = %e, "failed to release registry slot");
        }
    }

    fn forget(&self, attempt: &Attempt) {
        self.attempts.write().remove(&attempt.id);
    }

    fn record(&self, attempt: &Attempt, transition: &Transition<Phase>) {
        observability::record_connection_transition(
            transition.from.state.as_str(),
            transition.to.state.as_str(),
        );
        self.emit(
            &attempt.id,
            Some(transition.from.state.clone()),
            transition.to.state.clone(),
        );
    }

    fn emit(&self, connection_id: &str, from: Option<ConnectionState>, to: ConnectionState) {
        // No subscribers is fine
        let _ = self.events.send(ConnectionEvent {
            connection_id: connection_id.to_string(),
            from,
            to,
        });
    }

    fn attempt(&self, connection_id: &str) -> Option<Arc<Attempt>> {
        self.attempts.read().get(connection_id).cloned()
    }

    fn require(&self, connection_id: &str) -> Result<Arc<Attempt>, BrokerError> {
        self.attempt(connection_id)
            .ok_or_else(|| BrokerError::ConnectionNotFound(connection_id.to_string()))
    }
}

fn message_type_name(message_type: MessageType) -> &'static str {
    match message_type {
        MessageType::SdpOffer => "SDP_OFFER",
        MessageType::SdpAnswer => "SDP_ANSWER",
        MessageType::IceCandidate => "ICE_CANDIDATE",
        MessageType::OpenConnection => "OPEN_CONNECTION",
    }
}
