//! Application hook deciding whether a node co-signs a proposal.
//!
//! The hook is injected into the node and captured by each round when the
//! round opens, so swapping it mid-round never changes that round.

use std::sync::Arc;
use treesig_types::RoundNumber;

/// Decides whether this node is willing to sign `message`.
///
/// A node whose verifier refuses still relays the round for its subtree,
/// but contributes neither key nor commitment and lists its own key as an
/// exception.
pub trait ProposalVerifier: Send + Sync {
    fn verify(&self, round: RoundNumber, message: &[u8], data: &[u8]) -> bool;
}

/// Signs everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl ProposalVerifier for AcceptAll {
    fn verify(&self, _round: RoundNumber, _message: &[u8], _data: &[u8]) -> bool {
        true
    }
}

impl<F> ProposalVerifier for F
where
    F: Fn(RoundNumber, &[u8], &[u8]) -> bool + Send + Sync,
{
    fn verify(&self, round: RoundNumber, message: &[u8], data: &[u8]) -> bool {
        self(round, message, data)
    }
}

/// Shared handle to a verifier.
pub type SharedVerifier = Arc<dyn ProposalVerifier>;
