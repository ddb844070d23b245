//! Per-peer delivery of relayed handshake messages

use contracts::HandshakeMessage;
use tokio::sync::mpsc;

/// Receiving end for one peer.
///
/// Messages arrive in relay order. Ends when the peer is detached or the
/// broker is dropped.
#[derive(Debug)]
pub struct PeerMailbox {
    peer_id: String,
    rx: mpsc::UnboundedReceiver<HandshakeMessage>,
}

impl PeerMailbox {
    pub(crate) fn new(peer_id: String, rx: mpsc::UnboundedReceiver<HandshakeMessage>) -> Self {
        Self { peer_id, rx }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub async fn recv(&mut self) -> Option<HandshakeMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<HandshakeMessage> {
        self.rx.try_recv().ok()
    }
}
