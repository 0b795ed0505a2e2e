//! Error reports, signature broadcast and administrative messages.

use sbor::prelude::BasicSbor;
use treesig_types::{FinalSignature, RoundNumber, Vote};

/// A failure reported from a child to its parent.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct ErrorReport {
    pub round: RoundNumber,
    pub reason: String,
}

/// The finished signature, pushed from the root to every node.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct SignatureBroadcast {
    pub signature: FinalSignature,

    /// The confirmed vote when the round was a voting round.
    pub vote: Option<Vote>,
}

/// Direction of a status sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub enum StatusDirection {
    /// Parent asks its subtree to report.
    Request,

    /// Child reports how many nodes of its subtree answered.
    Report { reachable: u32 },
}

/// Broadcast-and-collect connectivity sweep.
///
/// Downward requests also refresh each node's parent heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub struct StatusConnections {
    pub sweep: u64,
    pub direction: StatusDirection,
}
