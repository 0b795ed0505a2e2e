//! Per-node Merkle trees for the proof scheme.
//!
//! Each node's tree has its local leaf first, followed by the subtree roots
//! reported by its children in the order their commitments arrived. Paths
//! compose downward: a child's proof is its path within its own tree
//! followed by the path its parent hands it with the challenge.

use treesig_types::{compute_merkle_root, Hash, MerkleProof, NodeId, Point, PublicKey, RoundNumber};

/// Domain tag of a node's local leaf.
pub const DOMAIN_LEAF: &[u8] = b"TREESIG_LEAF";

/// Leaf binding a node's identity and commitment to a round.
///
/// Format: `TREESIG_LEAF` || round || H(message) || public key || commitment
pub fn local_leaf(round: RoundNumber, message: &[u8], key: &PublicKey, commitment: &Point) -> Hash {
    Hash::from_parts(&[
        DOMAIN_LEAF,
        &round.0.to_le_bytes(),
        Hash::from_bytes(message).as_bytes(),
        key.as_bytes(),
        &commitment.to_bytes(),
    ])
}

/// One node's Merkle tree for one round.
#[derive(Debug, Clone)]
pub struct SubtreeMerkle {
    leaves: Vec<Hash>,
    children: Vec<NodeId>,
    root: Hash,
}

impl SubtreeMerkle {
    /// Build from the local leaf and `(child, child root)` pairs in
    /// arrival order.
    pub fn build(local: Hash, child_roots: &[(NodeId, Hash)]) -> Self {
        let mut leaves = Vec::with_capacity(child_roots.len() + 1);
        leaves.push(local);
        leaves.extend(child_roots.iter().map(|(_, root)| *root));
        let root = compute_merkle_root(&leaves);
        Self {
            children: child_roots.iter().map(|(child, _)| *child).collect(),
            leaves,
            root,
        }
    }

    pub fn root(&self) -> Hash {
        self.root
    }

    pub fn local_leaf(&self) -> Hash {
        self.leaves[0]
    }

    /// Path from the local leaf to this tree's root.
    pub fn local_proof(&self) -> MerkleProof {
        MerkleProof::for_leaf(&self.leaves, 0).unwrap_or_default()
    }

    /// Path from `child`'s subtree root to this tree's root.
    pub fn child_proof(&self, child: NodeId) -> Option<MerkleProof> {
        let position = self.children.iter().position(|c| *c == child)?;
        MerkleProof::for_leaf(&self.leaves, position + 1)
    }
}
