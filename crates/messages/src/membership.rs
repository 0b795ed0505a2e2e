//! Vote propagation and catch-up payloads.

use sbor::prelude::BasicSbor;
use treesig_types::{Vote, VoteIndex};

/// A proposed membership or view change travelling up to the root.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct GroupChange {
    /// The proposed vote. Its index is assigned by the root.
    pub vote: Vote,
}

/// Ask a peer for the vote at `index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub struct CatchUpRequest {
    pub index: VoteIndex,
}

/// Reply to a `CatchUpRequest`; `None` when the peer does not have it.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct CatchUpResponse {
    pub index: VoteIndex,
    pub vote: Option<Vote>,
}
