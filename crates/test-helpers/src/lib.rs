//! Test helpers for treesig: deterministic rosters, signed fixtures and
//! verification-hook doubles.
//!
//! # Example
//!
//! ```rust
//! use treesig_test_helpers::{fixtures, TestRoster};
//!
//! let roster = TestRoster::new(4, 42);
//! let signature = fixtures::make_signature(&roster, &[0, 1, 2], b"hello world");
//! assert!(signature.verify(&roster.public_keys()).is_ok());
//! ```

pub mod byzantine;
pub mod fixtures;
pub mod verifiers;

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use treesig_types::{KeyPair, Member, NodeId, Point, PublicKey, Roster, TreeTopology, View};

/// A signing set with deterministic key pairs.
///
/// Node ids are `0..size`, so `NodeId(i)` owns `keypair(i)`.
pub struct TestRoster {
    keypairs: Vec<KeyPair>,
    roster: Roster,
    seed: u64,
}

impl std::fmt::Debug for TestRoster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestRoster")
            .field("size", &self.keypairs.len())
            .field("seed", &self.seed)
            .finish()
    }
}

impl TestRoster {
    /// Create `size` members from `seed`. Different seeds give different
    /// keys; the same seed always gives the same keys.
    pub fn new(size: usize, seed: u64) -> Self {
        let keypairs: Vec<KeyPair> = (0..size)
            .map(|i| {
                let mut seed_bytes = [0u8; 32];
                let key_seed = seed.wrapping_add(i as u64).wrapping_mul(0x517cc1b727220a95);
                seed_bytes[..8].copy_from_slice(&key_seed.to_le_bytes());
                seed_bytes[8..16].copy_from_slice(&(i as u64).to_le_bytes());
                seed_bytes[16..24].copy_from_slice(&seed.to_le_bytes());
                KeyPair::from_seed(&seed_bytes)
            })
            .collect();

        let roster = Roster::new(
            keypairs
                .iter()
                .enumerate()
                .map(|(i, kp)| Member {
                    node_id: NodeId(i as u64),
                    public_key: kp.public_key(),
                })
                .collect(),
        );

        Self {
            keypairs,
            roster,
            seed,
        }
    }

    pub fn size(&self) -> usize {
        self.keypairs.len()
    }

    /// # Panics
    ///
    /// Panics if `node` is not in the roster.
    pub fn keypair(&self, node: NodeId) -> &KeyPair {
        &self.keypairs[node.0 as usize]
    }

    pub fn public_key(&self, node: NodeId) -> PublicKey {
        self.keypair(node).public_key()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        (0..self.keypairs.len() as u64).map(NodeId).collect()
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn public_keys(&self) -> Vec<PublicKey> {
        self.roster.public_keys()
    }

    /// Sum of every member's key.
    pub fn aggregate_key(&self) -> Point {
        self.roster.aggregate_key()
    }

    /// # Panics
    ///
    /// Panics on an invalid branching factor.
    pub fn topology(&self, view: View, branching: usize) -> TreeTopology {
        TreeTopology::build(&self.roster, view, branching).expect("valid test topology")
    }

    /// A nonce source for `node`, stable for a given roster seed.
    pub fn rng_for(&self, node: NodeId) -> ChaCha20Rng {
        ChaCha20Rng::seed_from_u64(self.seed ^ node.0.wrapping_mul(0x9e3779b97f4a7c15))
    }

    /// A key pair outside the roster, for membership tests.
    pub fn outsider(&self, index: u64) -> Member {
        let mut seed_bytes = [0xee; 32];
        seed_bytes[..8].copy_from_slice(&index.to_le_bytes());
        seed_bytes[8..16].copy_from_slice(&self.seed.to_le_bytes());
        Member {
            node_id: NodeId(self.keypairs.len() as u64 + index),
            public_key: KeyPair::from_seed(&seed_bytes).public_key(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roster_is_deterministic() {
        let a = TestRoster::new(4, 42);
        let b = TestRoster::new(4, 42);
        let c = TestRoster::new(4, 43);
        assert_eq!(a.public_keys(), b.public_keys());
        assert_ne!(a.public_keys(), c.public_keys());
        assert_eq!(a.size(), 4);
        assert_eq!(a.node_ids(), vec![NodeId(0), NodeId(1), NodeId(2), NodeId(3)]);
    }

    #[test]
    fn test_outsider_not_in_roster() {
        let roster = TestRoster::new(3, 1);
        let outsider = roster.outsider(0);
        assert!(!roster.roster().contains(outsider.node_id));
        assert!(!roster.public_keys().contains(&outsider.public_key));
    }
}
