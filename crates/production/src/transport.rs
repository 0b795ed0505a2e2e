//! In-process transport carrying wire-encoded envelopes over tokio channels.
//!
//! Every node registers an inbox with a shared [`ChannelHub`]. Sends go
//! through the same SBOR + LZ4 codec a socket transport would use, so the
//! receiving loop only ever sees bytes.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use treesig_messages::SigningMessage;
use treesig_network::{encode_message, Transport, TransportError};
use treesig_types::NodeId;

/// Receiving half of a node's inbox.
pub type Inbox = mpsc::UnboundedReceiver<Vec<u8>>;

/// Routing table shared by every node of an in-process cluster.
#[derive(Debug, Default)]
pub struct ChannelHub {
    peers: RwLock<HashMap<NodeId, mpsc::UnboundedSender<Vec<u8>>>>,
    bytes_sent: AtomicU64,
    messages_sent: AtomicU64,
}

impl ChannelHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `node` and return its inbox. Re-registering replaces the
    /// previous inbox.
    pub fn register(&self, node: NodeId) -> Inbox {
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.write().insert(node, tx);
        rx
    }

    /// Drop `node`'s route. Later sends to it fail as unreachable.
    pub fn unregister(&self, node: NodeId) {
        if self.peers.write().remove(&node).is_some() {
            debug!(node = %node, "Unregistered from hub");
        }
    }

    pub fn is_registered(&self, node: NodeId) -> bool {
        self.peers.read().contains_key(&node)
    }

    /// A transport sending on behalf of `node`.
    pub fn transport(self: &Arc<Self>, node: NodeId) -> ChannelTransport {
        ChannelTransport {
            local: node,
            hub: Arc::clone(self),
            closed: AtomicBool::new(false),
        }
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    fn deliver(&self, to: NodeId, bytes: Vec<u8>) -> Result<(), TransportError> {
        let len = bytes.len() as u64;
        let peers = self.peers.read();
        let tx = peers.get(&to).ok_or(TransportError::PeerUnreachable(to))?;
        tx.send(bytes)
            .map_err(|_| TransportError::PeerUnreachable(to))?;
        self.bytes_sent.fetch_add(len, Ordering::Relaxed);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// One node's handle on the hub.
#[derive(Debug)]
pub struct ChannelTransport {
    local: NodeId,
    hub: Arc<ChannelHub>,
    closed: AtomicBool,
}

impl ChannelTransport {
    pub fn local(&self) -> NodeId {
        self.local
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, to: NodeId, message: &SigningMessage) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let bytes = encode_message(message)?;
        trace!(from = %self.local, to = %to, kind = %message.kind(), bytes = bytes.len(), "Sending envelope");
        self.hub.deliver(to, bytes)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.hub.unregister(self.local);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use treesig_messages::{Payload, StatusConnections, StatusDirection};
    use treesig_network::decode_message;
    use treesig_types::{View, VoteIndex};

    fn status_message(from: NodeId) -> SigningMessage {
        SigningMessage::new(
            View(0),
            from,
            VoteIndex(0),
            Payload::StatusConnections(StatusConnections {
                sweep: 1,
                direction: StatusDirection::Request,
            }),
        )
    }

    #[test]
    fn test_send_delivers_encoded_bytes() {
        let hub = ChannelHub::new();
        let mut inbox = hub.register(NodeId(1));
        let transport = hub.transport(NodeId(0));

        transport.send(NodeId(1), &status_message(NodeId(0))).unwrap();

        let bytes = inbox.try_recv().unwrap();
        let decoded = decode_message(&bytes).unwrap();
        assert_eq!(decoded.from, NodeId(0));
        assert_eq!(hub.messages_sent(), 1);
        assert_eq!(hub.bytes_sent(), bytes.len() as u64);
    }

    #[test]
    fn test_unknown_peer_is_unreachable() {
        let hub = ChannelHub::new();
        let transport = hub.transport(NodeId(0));
        assert!(matches!(
            transport.send(NodeId(9), &status_message(NodeId(0))),
            Err(TransportError::PeerUnreachable(NodeId(9)))
        ));
    }

    #[test]
    fn test_close_unregisters_and_rejects_sends() {
        let hub = ChannelHub::new();
        let _inbox = hub.register(NodeId(0));
        let _peer = hub.register(NodeId(1));
        let transport = hub.transport(NodeId(0));

        transport.close();
        assert!(!hub.is_registered(NodeId(0)));
        assert!(matches!(
            transport.send(NodeId(1), &status_message(NodeId(0))),
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn test_dropped_inbox_is_unreachable() {
        let hub = ChannelHub::new();
        drop(hub.register(NodeId(1)));
        let transport = hub.transport(NodeId(0));
        assert!(transport.send(NodeId(1), &status_message(NodeId(0))).is_err());
    }
}
