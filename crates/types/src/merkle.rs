//! Binary Merkle trees over Blake3 hashes.
//!
//! Both the root computation and the proofs promote the last node of an
//! odd-length level unchanged, so a proof for that node has no step at
//! that level.

use crate::Hash;
use sbor::prelude::*;

/// Compute a binary merkle root from a list of hashes.
///
/// Returns `Hash::ZERO` for an empty list.
///
/// ```text
/// Level 0 (leaves): [H0, H1, H2, H3, H4]
/// Level 1:          [hash(H0||H1), hash(H2||H3), H4]
/// Level 2:          [hash(L1_0||L1_1), H4]
/// Level 3 (root):   [hash(L2_0||L2_1)]
/// ```
pub fn compute_merkle_root(hashes: &[Hash]) -> Hash {
    if hashes.is_empty() {
        return Hash::ZERO;
    }

    let mut level: Vec<Hash> = hashes.to_vec();
    while level.len() > 1 {
        level = next_level(&level);
    }
    level[0]
}

fn next_level(level: &[Hash]) -> Vec<Hash> {
    level
        .chunks(2)
        .map(|chunk| match chunk {
            [left, right] => hash_pair(left, right),
            // Odd node promotes up unchanged
            [single] => *single,
            _ => unreachable!("chunks(2) yields one or two elements"),
        })
        .collect()
}

fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    Hash::from_parts(&[left.as_bytes(), right.as_bytes()])
}

/// One level of an authentication path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub struct ProofStep {
    /// The sibling hash at this level.
    pub sibling: Hash,
    /// Whether the sibling sits to the left of the running hash.
    pub sibling_on_left: bool,
}

/// Authentication path from a leaf to a Merkle root.
///
/// Paths compose: a path from a leaf to a subtree root followed by a path
/// from that subtree root to the global root proves the leaf against the
/// global root.
#[derive(Debug, Clone, Default, PartialEq, Eq, BasicSbor)]
pub struct MerkleProof {
    /// Steps ordered from the leaf upward.
    pub steps: Vec<ProofStep>,
}

impl MerkleProof {
    /// The empty path (the leaf is the root).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build the path for `leaves[index]`, or `None` if out of range.
    pub fn for_leaf(leaves: &[Hash], index: usize) -> Option<Self> {
        if index >= leaves.len() {
            return None;
        }

        let mut steps = Vec::new();
        let mut level: Vec<Hash> = leaves.to_vec();
        let mut position = index;

        while level.len() > 1 {
            if position % 2 == 1 {
                steps.push(ProofStep {
                    sibling: level[position - 1],
                    sibling_on_left: true,
                });
            } else if position + 1 < level.len() {
                steps.push(ProofStep {
                    sibling: level[position + 1],
                    sibling_on_left: false,
                });
            }
            level = next_level(&level);
            position /= 2;
        }

        Some(Self { steps })
    }

    /// Recompute the root implied by this path for `leaf`.
    pub fn root_from(&self, leaf: Hash) -> Hash {
        self.steps.iter().fold(leaf, |acc, step| {
            if step.sibling_on_left {
                hash_pair(&step.sibling, &acc)
            } else {
                hash_pair(&acc, &step.sibling)
            }
        })
    }

    /// Check that `leaf` is included under `root`.
    pub fn verify(&self, leaf: Hash, root: Hash) -> bool {
        self.root_from(leaf) == root
    }

    /// Append a path that continues from this path's root.
    pub fn then(&self, upper: &MerkleProof) -> MerkleProof {
        let mut steps = self.steps.clone();
        steps.extend_from_slice(&upper.steps);
        MerkleProof { steps }
    }

    /// Number of steps in the path.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the path has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
