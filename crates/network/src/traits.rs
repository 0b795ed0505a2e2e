//! Transport trait for envelope delivery.
//!
//! The engine only ever asks to deliver one envelope to one tree
//! neighbour. Implementations provide ordered delivery per peer; there is
//! no ordering guarantee across peers.

use crate::CodecError;
use treesig_messages::SigningMessage;
use treesig_types::NodeId;

/// Error returned when an envelope cannot be handed to the transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Peer unreachable: {0}")]
    PeerUnreachable(NodeId),

    #[error("Transport closed")]
    Closed,

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Point-to-point envelope delivery.
///
/// Sends are fire-and-forget: a successful return means the envelope was
/// queued for the peer, not that the peer processed it. Inbound envelopes
/// reach the node through the runner's own inbox, not through this trait.
pub trait Transport: Send + Sync {
    /// Deliver `message` to `to`.
    fn send(&self, to: NodeId, message: &SigningMessage) -> Result<(), TransportError>;

    /// Stop accepting sends. Later sends fail with [`TransportError::Closed`].
    fn close(&self);
}
