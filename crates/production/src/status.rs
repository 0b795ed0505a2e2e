//! Node status published for lock-free reads outside the node loop.

use treesig_cosi::NodeStatus;
use treesig_types::{FinalSignature, NodeId};

/// A signature handed to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub signature: FinalSignature,
    /// Merkle inclusion check of this node's leaf (proof scheme only).
    pub inclusion_verified: Option<bool>,
}

/// Point-in-time view of a running node.
///
/// Replaced wholesale after every event the loop handles, so readers always
/// see a consistent snapshot.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub protocol: NodeStatus,
    /// Root of the node's current view.
    pub root: NodeId,
    pub signatures_delivered: u64,
    pub rounds_failed: u64,
    pub last_failure: Option<String>,
    pub votes_applied: u64,
    /// Reachable count from the last status sweep this node rooted.
    pub last_reachable: Option<u32>,
    /// Envelopes the transport refused.
    pub send_failures: u64,
    /// The loop has exited.
    pub stopped: bool,
}

impl NodeSnapshot {
    pub fn new(protocol: NodeStatus, root: NodeId) -> Self {
        Self {
            protocol,
            root,
            signatures_delivered: 0,
            rounds_failed: 0,
            last_failure: None,
            votes_applied: 0,
            last_reachable: None,
            send_failures: 0,
            stopped: false,
        }
    }
}
