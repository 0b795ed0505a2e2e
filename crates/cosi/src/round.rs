//! Per-round aggregation state at one node.
//!
//! # Exception bookkeeping
//!
//! At every node, after each phase:
//!
//! ```text
//! X̂ = Σ keys of subtree members that are still signing
//! V̂ = Σ commitments of subtree members that committed
//! exceptions ⊇ every subtree key missing from X̂
//! ```
//!
//! A child that misses the commit deadline contributes nothing and its
//! whole subtree is excepted. A child that committed but misses the
//! response deadline has its `X̂` subtracted and its `V̂` moved into the
//! exception commitment, which the verifier adds back.

use crate::aggregate::{self, SubtreeAggregate};
use crate::merkle::{local_leaf, SubtreeMerkle};
use crate::transition::{advance, PhaseStep, RoundPhase};
use crate::{CosiError, MerkleScheme};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use treesig_messages::{Challenge, Commitment, Response};
use treesig_types::{
    FinalSignature, Hash, MerkleProof, NodeId, Point, PublicKey, RoundNumber, Scalar,
    TreeTopology, View, Vote,
};

/// A child's standing in one phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildSlot<T> {
    Pending,
    Received(T),
    Excepted,
}

impl<T> ChildSlot<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, ChildSlot::Pending)
    }
}

/// Everything one node knows about one round.
#[derive(Debug, Clone)]
pub struct Round {
    number: RoundNumber,
    topology: Arc<TreeTopology>,
    node_id: NodeId,
    public_key: PublicKey,
    message: Vec<u8>,
    data: Vec<u8>,
    vote: Option<Vote>,
    phase: RoundPhase,

    /// Own nonce `v`; `None` when this node refused to sign.
    nonce: Option<Scalar>,

    /// `X̂`, net of response-phase exceptions once responses are in.
    aggregate_key: Point,
    /// `V̂`.
    aggregate_commitment: Point,
    challenge: Option<Scalar>,
    /// `r̂`.
    response: Scalar,
    exceptions: BTreeSet<PublicKey>,
    exception_commitment: Point,
    exception_key: Point,

    local_leaf: Option<Hash>,
    /// Children's subtree roots in arrival order.
    child_leaves: Vec<(NodeId, Hash)>,
    merkle: Option<SubtreeMerkle>,
    /// Global root received with the challenge.
    merkle_root: Option<Hash>,
    /// Path from our subtree root to the global root.
    upper_proof: MerkleProof,

    pending_commits: BTreeMap<NodeId, ChildSlot<Commitment>>,
    pending_responses: BTreeMap<NodeId, ChildSlot<Response>>,
    commitment_sent: bool,
    opened_at: Duration,
}

impl Round {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        number: RoundNumber,
        topology: Arc<TreeTopology>,
        node_id: NodeId,
        public_key: PublicKey,
        message: Vec<u8>,
        data: Vec<u8>,
        vote: Option<Vote>,
        nonce: Option<Scalar>,
        opened_at: Duration,
    ) -> Self {
        let pending_commits = topology
            .children(node_id)
            .iter()
            .map(|child| (*child, ChildSlot::Pending))
            .collect();

        let mut exceptions = BTreeSet::new();
        if nonce.is_none() {
            exceptions.insert(public_key);
        }

        Self {
            number,
            topology,
            node_id,
            public_key,
            message,
            data,
            vote,
            phase: RoundPhase::Announced,
            nonce,
            aggregate_key: Point::identity(),
            aggregate_commitment: Point::identity(),
            challenge: None,
            response: Scalar::ZERO,
            exceptions,
            exception_commitment: Point::identity(),
            exception_key: Point::identity(),
            local_leaf: None,
            child_leaves: Vec::new(),
            merkle: None,
            merkle_root: None,
            upper_proof: MerkleProof::empty(),
            pending_commits,
            pending_responses: BTreeMap::new(),
            commitment_sent: false,
            opened_at,
        }
    }

    pub fn number(&self) -> RoundNumber {
        self.number
    }

    pub fn view(&self) -> View {
        self.topology.view()
    }

    pub fn topology(&self) -> &Arc<TreeTopology> {
        &self.topology
    }

    pub fn message(&self) -> &[u8] {
        &self.message
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn vote(&self) -> Option<&Vote> {
        self.vote.as_ref()
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn is_root(&self) -> bool {
        self.topology.is_root(self.node_id)
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.topology.parent(self.node_id)
    }

    pub fn children(&self) -> &[NodeId] {
        self.topology.children(self.node_id)
    }

    /// Whether this node contributes its own key and commitment.
    pub fn is_participating(&self) -> bool {
        self.nonce.is_some()
    }

    pub fn challenge(&self) -> Option<Scalar> {
        self.challenge
    }

    pub fn aggregate_key(&self) -> Point {
        self.aggregate_key
    }

    pub fn aggregate_commitment(&self) -> Point {
        self.aggregate_commitment
    }

    pub fn response(&self) -> Scalar {
        self.response
    }

    pub fn exceptions(&self) -> &BTreeSet<PublicKey> {
        &self.exceptions
    }

    pub fn exception_commitment(&self) -> Point {
        self.exception_commitment
    }

    pub fn merkle_root(&self) -> Option<Hash> {
        self.merkle_root
    }

    /// Root of this node's own subtree Merkle tree.
    pub fn subtree_root(&self) -> Option<Hash> {
        self.merkle.as_ref().map(|m| m.root())
    }

    pub fn commitment_sent(&self) -> bool {
        self.commitment_sent
    }

    pub fn opened_at(&self) -> Duration {
        self.opened_at
    }

    /// Apply a phase step through the transition table.
    pub fn advance(&mut self, step: PhaseStep) -> Result<RoundPhase, CosiError> {
        let next = advance(self.phase, step).ok_or(CosiError::InvalidTransition {
            from: self.phase,
            step,
        })?;
        self.phase = next;
        Ok(next)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Commit phase
    // ═══════════════════════════════════════════════════════════════════════

    /// Record a child's commitment. Returns `false` if the child is not
    /// pending (unknown, duplicate, or already excepted).
    pub fn record_commitment(&mut self, from: NodeId, commitment: Commitment) -> bool {
        match self.pending_commits.get_mut(&from) {
            Some(slot) if slot.is_pending() => {
                if let Some(root) = commitment.merkle_root {
                    self.child_leaves.push((from, root));
                }
                *slot = ChildSlot::Received(commitment);
                true
            }
            _ => false,
        }
    }

    pub fn commits_complete(&self) -> bool {
        !self.pending_commits.values().any(ChildSlot::is_pending)
    }

    /// Except every child that has not committed, along with its subtree.
    pub fn except_pending_commits(&mut self) -> Vec<NodeId> {
        let missing: Vec<NodeId> = self
            .pending_commits
            .iter()
            .filter(|(_, slot)| slot.is_pending())
            .map(|(child, _)| *child)
            .collect();

        for child in &missing {
            self.pending_commits.insert(*child, ChildSlot::Excepted);
            self.exceptions.extend(self.topology.subtree_keys(*child));
        }
        missing
    }

    /// Fold the children's commitments into `X̂` and `V̂` and build the
    /// local Merkle tree. Call once every child is accounted for.
    pub fn finalize_commitments(&mut self, scheme: MerkleScheme) {
        let (own_commitment, own_key) = match self.nonce {
            Some(nonce) => (Point::base_mul(&nonce), self.public_key.point()),
            None => (Point::identity(), Point::identity()),
        };

        let mut child_exceptions = Vec::new();
        let own = SubtreeAggregate::new(own_commitment, own_key);
        let total = own.with_children(self.pending_commits.values().filter_map(|slot| {
            match slot {
                ChildSlot::Received(c) => {
                    child_exceptions.extend(c.exceptions.iter().copied());
                    Some(SubtreeAggregate::new(c.commitment, c.aggregate_key))
                }
                _ => None,
            }
        }));
        self.exceptions.extend(child_exceptions);
        self.aggregate_commitment = total.commitment;
        self.aggregate_key = total.key;

        let leaf = local_leaf(self.number, &self.message, &self.public_key, &own_commitment);
        self.local_leaf = Some(leaf);
        if scheme == MerkleScheme::Proof {
            self.merkle = Some(SubtreeMerkle::build(leaf, &self.child_leaves));
        }

        self.pending_responses = self
            .pending_commits
            .iter()
            .map(|(child, slot)| {
                let response_slot = match slot {
                    ChildSlot::Received(_) => ChildSlot::Pending,
                    _ => ChildSlot::Excepted,
                };
                (*child, response_slot)
            })
            .collect();
    }

    /// The commitment to send upward. Marks it as sent.
    pub fn commitment_payload(&mut self) -> Commitment {
        self.commitment_sent = true;
        Commitment {
            round: self.number,
            commitment: self.aggregate_commitment,
            aggregate_key: self.aggregate_key,
            merkle_root: self.subtree_root(),
            exceptions: self.sorted_exceptions(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Challenge phase
    // ═══════════════════════════════════════════════════════════════════════

    /// Store the challenge and, in the proof scheme, check that our leaf
    /// is under the global root. Returns the check result (`None` in the
    /// key scheme).
    pub fn store_challenge(
        &mut self,
        challenge: Scalar,
        merkle_root: Option<Hash>,
        upper_proof: MerkleProof,
    ) -> Option<bool> {
        self.challenge = Some(challenge);
        self.merkle_root = merkle_root;
        self.upper_proof = upper_proof;
        self.inclusion_proof()
            .zip(self.local_leaf)
            .zip(merkle_root)
            .map(|((proof, leaf), root)| proof.verify(leaf, root))
    }

    /// Path from our local leaf to the global root (proof scheme only).
    pub fn inclusion_proof(&self) -> Option<MerkleProof> {
        self.merkle
            .as_ref()
            .map(|m| m.local_proof().then(&self.upper_proof))
    }

    pub fn local_leaf(&self) -> Option<Hash> {
        self.local_leaf
    }

    /// Challenges for every child that committed.
    pub fn child_challenges(&self) -> Vec<(NodeId, Challenge)> {
        let Some(challenge) = self.challenge else {
            return Vec::new();
        };

        self.pending_commits
            .iter()
            .filter(|(_, slot)| matches!(slot, ChildSlot::Received(_)))
            .map(|(child, _)| {
                let proof = self
                    .merkle
                    .as_ref()
                    .and_then(|m| m.child_proof(*child))
                    .map(|p| p.then(&self.upper_proof))
                    .unwrap_or_default();
                (
                    *child,
                    Challenge {
                        round: self.number,
                        challenge,
                        merkle_root: self.merkle_root,
                        proof,
                    },
                )
            })
            .collect()
    }

    /// Fold our own `r = v − x·c` into `r̂`.
    pub fn compute_own_response(&mut self, secret: &Scalar) {
        if let (Some(nonce), Some(challenge)) = (self.nonce, self.challenge) {
            self.response = aggregate::individual_response(&nonce, secret, &challenge);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Response phase
    // ═══════════════════════════════════════════════════════════════════════

    /// Record a child's response. Returns `false` if the child is not
    /// pending.
    pub fn record_response(&mut self, from: NodeId, response: Response) -> bool {
        match self.pending_responses.get_mut(&from) {
            Some(slot) if slot.is_pending() => {
                self.response += response.response;
                self.exceptions.extend(response.exceptions.iter().copied());
                self.exception_commitment += response.exception_commitment;
                self.exception_key += response.exception_key;
                self.aggregate_key -= response.exception_key;
                *slot = ChildSlot::Received(response);
                true
            }
            _ => false,
        }
    }

    pub fn responses_complete(&self) -> bool {
        !self.pending_responses.values().any(ChildSlot::is_pending)
    }

    /// Except every committed child that has not responded.
    pub fn except_pending_responses(&mut self) -> Vec<NodeId> {
        let missing: Vec<NodeId> = self
            .pending_responses
            .iter()
            .filter(|(_, slot)| slot.is_pending())
            .map(|(child, _)| *child)
            .collect();

        for child in &missing {
            if let Some(ChildSlot::Received(c)) = self.pending_commits.get(child) {
                self.aggregate_key -= c.aggregate_key;
                self.exception_key += c.aggregate_key;
                self.exception_commitment += c.commitment;
            }
            self.pending_responses.insert(*child, ChildSlot::Excepted);
            self.exceptions.extend(self.topology.subtree_keys(*child));
        }
        missing
    }

    /// The response to send upward.
    pub fn response_payload(&self) -> Response {
        Response {
            round: self.number,
            response: self.response,
            exceptions: self.sorted_exceptions(),
            exception_commitment: self.exception_commitment,
            exception_key: self.exception_key,
        }
    }

    /// Check `r̂·G + c·X̂ + V̂_exc == V̂` for our subtree.
    pub fn partial_check(&self) -> bool {
        match self.challenge {
            Some(challenge) => aggregate::verify_partial(
                &SubtreeAggregate::new(self.aggregate_commitment, self.aggregate_key),
                &self.response,
                &challenge,
                &self.exception_commitment,
            ),
            None => false,
        }
    }

    /// The signature implied by a completed round (root only).
    pub fn final_signature(&self) -> Option<FinalSignature> {
        Some(FinalSignature {
            message: self.message.clone(),
            round: self.number,
            view: self.view(),
            challenge: self.challenge?,
            response: self.response,
            commitment: self.aggregate_commitment,
            exception_commitment: self.exception_commitment,
            exceptions: self.sorted_exceptions(),
            merkle_root: self.merkle_root,
        })
    }

    fn sorted_exceptions(&self) -> Vec<PublicKey> {
        self.exceptions.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use treesig_types::{KeyPair, Member, Roster};

    struct Fixture {
        keys: Vec<KeyPair>,
        roster: Roster,
    }

    impl Fixture {
        fn new(n: u64) -> Self {
            let keys: Vec<KeyPair> = (0..n).map(|i| KeyPair::from_seed(&[i as u8 + 1; 32])).collect();
            let roster = Roster::new(
                keys.iter()
                    .enumerate()
                    .map(|(i, k)| Member {
                        node_id: NodeId(i as u64),
                        public_key: k.public_key(),
                    })
                    .collect(),
            );
            Self { keys, roster }
        }

        fn keypair(&self, id: NodeId) -> &KeyPair {
            &self.keys[id.0 as usize]
        }

        fn public_keys(&self) -> Vec<PublicKey> {
            self.roster.public_keys()
        }
    }

    fn round_at(roster: &Fixture, node: u64, nonce: Option<u64>) -> Round {
        let topology = Arc::new(TreeTopology::build(&roster.roster, View(0), 2).unwrap());
        let id = NodeId(node);
        Round::new(
            RoundNumber(1),
            topology,
            id,
            roster.keypair(id).public_key(),
            b"msg".to_vec(),
            Vec::new(),
            None,
            nonce.map(Scalar::from_u64),
            Duration::ZERO,
        )
    }

    fn commitment_from(roster: &Fixture, node: u64, nonce: u64) -> Commitment {
        Commitment {
            round: RoundNumber(1),
            commitment: Point::base_mul(&Scalar::from_u64(nonce)),
            aggregate_key: roster.keypair(NodeId(node)).public_key().point(),
            merkle_root: None,
            exceptions: Vec::new(),
        }
    }

    #[test]
    fn test_commit_waits_for_every_child() {
        let roster = Fixture::new(3);
        let mut round = round_at(&roster, 0, Some(10));
        assert!(!round.commits_complete());

        assert!(round.record_commitment(NodeId(1), commitment_from(&roster, 1, 11)));
        assert!(!round.record_commitment(NodeId(1), commitment_from(&roster, 1, 11)));
        assert!(!round.record_commitment(NodeId(7), commitment_from(&roster, 1, 11)));
        assert!(!round.commits_complete());

        assert!(round.record_commitment(NodeId(2), commitment_from(&roster, 2, 12)));
        assert!(round.commits_complete());
    }

    #[test]
    fn test_missing_commit_excepts_subtree() {
        let roster = Fixture::new(7);
        let mut round = round_at(&roster, 0, Some(10));
        round.record_commitment(NodeId(2), commitment_from(&roster, 2, 12));

        assert_eq!(round.except_pending_commits(), vec![NodeId(1)]);
        round.finalize_commitments(MerkleScheme::PublicKey);

        // Node 1's subtree is {1, 3, 4}.
        let expected: BTreeSet<_> = [1, 3, 4]
            .iter()
            .map(|&i| roster.keypair(NodeId(i)).public_key())
            .collect();
        assert_eq!(round.exceptions(), &expected);
        assert_eq!(
            round.aggregate_key(),
            roster.keypair(NodeId(0)).public_key().point()
                + roster.keypair(NodeId(2)).public_key().point()
        );
        assert!(round.child_challenges().is_empty(), "no challenge before it is stored");
    }

    #[test]
    fn test_refusing_node_excludes_itself() {
        let roster = Fixture::new(1);
        let mut round = round_at(&roster, 0, None);
        assert!(!round.is_participating());
        round.finalize_commitments(MerkleScheme::PublicKey);
        assert!(round.aggregate_key().is_identity());
        assert!(round.aggregate_commitment().is_identity());
        assert!(round.exceptions().contains(&roster.keypair(NodeId(0)).public_key()));
    }

    #[test]
    fn test_missing_response_moves_commitment_to_exceptions() {
        let roster = Fixture::new(3);
        let mut round = round_at(&roster, 0, Some(10));
        round.record_commitment(NodeId(1), commitment_from(&roster, 1, 11));
        round.record_commitment(NodeId(2), commitment_from(&roster, 2, 12));
        round.finalize_commitments(MerkleScheme::PublicKey);

        let challenge = aggregate::round_challenge(&round.aggregate_commitment(), b"msg", None);
        round.store_challenge(challenge, None, MerkleProof::empty());
        round.compute_own_response(roster.keypair(NodeId(0)).secret());

        let r1 = aggregate::individual_response(
            &Scalar::from_u64(11),
            roster.keypair(NodeId(1)).secret(),
            &challenge,
        );
        round.record_response(
            NodeId(1),
            Response {
                round: RoundNumber(1),
                response: r1,
                exceptions: Vec::new(),
                exception_commitment: Point::identity(),
                exception_key: Point::identity(),
            },
        );
        assert!(!round.responses_complete());
        assert_eq!(round.except_pending_responses(), vec![NodeId(2)]);
        assert!(round.responses_complete());
        assert!(round.partial_check());

        let signature = round.final_signature().unwrap();
        assert_eq!(signature.exceptions, vec![roster.keypair(NodeId(2)).public_key()]);
        assert_eq!(signature.verify(&roster.public_keys()), Ok(()));
    }

    #[test]
    fn test_proof_scheme_builds_local_tree() {
        let roster = Fixture::new(3);
        let mut round = round_at(&roster, 1, Some(5));
        round.finalize_commitments(MerkleScheme::Proof);
        let payload = round.commitment_payload();
        assert!(round.commitment_sent());
        assert_eq!(payload.merkle_root, round.local_leaf());
    }
}
