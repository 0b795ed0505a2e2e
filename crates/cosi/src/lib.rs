//! Tree-structured collective signing engine.
//!
//! Implements the four-phase protocol as a synchronous state machine:
//!
//! ```text
//!            Announce ↓        Commit ↑          Challenge ↓        Respond ↑
//! root ──▶ children ──▶ … ──▶ leaves ──▶ … ──▶ root ──▶ … ──▶ leaves ──▶ … ──▶ root
//! ```
//!
//! Each node aggregates its subtree (`X̂`, `V̂`, `r̂`), turns unresponsive
//! children into exceptions once its wait budget elapses, and the root
//! verifies the result and broadcasts the `FinalSignature` down the tree.
//! Membership and view changes are decided by voting rounds and replayed
//! from an append-only vote log.
//!
//! # Usage
//!
//! ```ignore
//! let mut node = CosiNode::new(id, keys, roster, CosiConfig::default(), Arc::new(AcceptAll), rng)?;
//! let actions = node.handle(Event::SubmitProposal { message, data: vec![] });
//! ```

mod aggregate;
mod config;
mod error;
mod handlers;
mod liveness;
mod membership;
mod merkle;
mod round;
mod state;
mod transition;
mod verifier;
mod view_change;
mod vote_log;

pub use aggregate::{
    individual_response, reconstruct_commitment, round_challenge, verify_partial,
    SubtreeAggregate,
};
pub use config::{CosiConfig, MerkleScheme};
pub use error::CosiError;
pub use merkle::{local_leaf, SubtreeMerkle, DOMAIN_LEAF};
pub use round::{ChildSlot, Round};
pub use state::{CosiNode, NodeStatus, MAX_DEFERRED_PER_SENDER};
pub use transition::{
    advance, dispatch, expected_sender, Disposition, PhaseStep, RoundPhase, SenderRole,
};
pub use verifier::{AcceptAll, ProposalVerifier, SharedVerifier};
pub use view_change::ViewChangeManager;
pub use vote_log::{VoteCursor, VoteLog};
