//! Payloads of the four signing phases.
//!
//! Announcement and Challenge flow from parent to children; Commitment and
//! Response flow from children to parent.

use sbor::prelude::BasicSbor;
use treesig_types::{Hash, MerkleProof, Point, PublicKey, RoundNumber, Scalar, Vote};

/// Starts a round: the proposal every node is asked to co-sign.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Announcement {
    pub round: RoundNumber,

    /// Bytes that will be signed.
    pub message: Vec<u8>,

    /// Opaque context handed to each node's verification hook.
    pub data: Vec<u8>,

    /// Present when the round decides a vote.
    pub vote: Option<Vote>,
}

/// A subtree's aggregate commitment.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Commitment {
    pub round: RoundNumber,

    /// `V̂` of the sender's subtree.
    pub commitment: Point,

    /// `X̂` of the sender's subtree (excepted members already left out).
    pub aggregate_key: Point,

    /// Root of the sender's subtree Merkle tree (proof scheme only).
    pub merkle_root: Option<Hash>,

    /// Keys of members excluded during the commit phase.
    pub exceptions: Vec<PublicKey>,
}

/// The round challenge, pushed down the tree.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Challenge {
    pub round: RoundNumber,

    pub challenge: Scalar,

    /// Global Merkle root (proof scheme only).
    pub merkle_root: Option<Hash>,

    /// Path from the recipient's subtree root to the global root.
    pub proof: MerkleProof,
}

/// A subtree's aggregate response.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Response {
    pub round: RoundNumber,

    /// `r̂` of the sender's subtree.
    pub response: Scalar,

    /// Every key excluded anywhere in the sender's subtree, either phase.
    pub exceptions: Vec<PublicKey>,

    /// Commitments of subtree members that committed but did not respond.
    pub exception_commitment: Point,

    /// Keys of subtree members that committed but did not respond.
    pub exception_key: Point,
}
