//! Core types for tree-structured collective signing.
//!
//! - **Primitives**: `Hash`, Merkle roots and proofs, Ristretto group
//!   elements and key pairs
//! - **Identifiers**: `NodeId`, `View`, `RoundNumber`, `VoteIndex`
//! - **Membership**: `Roster`, per-view `TreeTopology`, `Vote`
//! - **Output**: `FinalSignature` and its external verification
//!
//! This crate does not depend on any other workspace crate.

mod crypto;
mod hash;
mod identifiers;
mod merkle;
mod network;
mod roster;
mod signature;
mod topology;
mod vote;

pub use crypto::{derive_challenge, KeyPair, Point, PublicKey, Scalar, CHALLENGE_CONTEXT};
pub use hash::{Hash, HexError};
pub use identifiers::{NodeId, RoundNumber, View, VoteIndex};
pub use merkle::{compute_merkle_root, MerkleProof, ProofStep};
pub use network::NetworkMessage;
pub use roster::{Member, Roster};
pub use signature::{FinalSignature, SignatureError};
pub use topology::{TopologyError, TreeTopology};
pub use vote::{Vote, VoteKind, DOMAIN_VOTE};
