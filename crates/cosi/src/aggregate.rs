//! Commitment, key and response aggregation.
//!
//! All sums are group additions, so the order in which children report
//! never changes the result.

use treesig_types::{derive_challenge, Hash, Point, Scalar};

/// Running `(V̂, X̂)` sums of a subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubtreeAggregate {
    /// Sum of commitments `vᵢ·G`.
    pub commitment: Point,
    /// Sum of public keys `xᵢ·G`.
    pub key: Point,
}

impl SubtreeAggregate {
    pub fn new(commitment: Point, key: Point) -> Self {
        Self { commitment, key }
    }

    pub fn absorb(&mut self, other: SubtreeAggregate) {
        self.commitment += other.commitment;
        self.key += other.key;
    }

    /// Fold any number of contributions onto `self`.
    pub fn with_children(mut self, children: impl IntoIterator<Item = SubtreeAggregate>) -> Self {
        for child in children {
            self.absorb(child);
        }
        self
    }
}

/// Round challenge over the aggregate commitment.
pub fn round_challenge(commitment: &Point, message: &[u8], merkle_root: Option<&Hash>) -> Scalar {
    derive_challenge(commitment, message, merkle_root)
}

/// A node's own response `r = v − x·c`.
pub fn individual_response(nonce: &Scalar, secret: &Scalar, challenge: &Scalar) -> Scalar {
    *nonce - *secret * *challenge
}

/// `T = r̂·G + c·X̂ + V̂_exc`, which equals `V̂` for an honest subtree.
pub fn reconstruct_commitment(
    response: &Scalar,
    aggregate_key: &Point,
    challenge: &Scalar,
    exception_commitment: &Point,
) -> Point {
    Point::base_mul(response) + *aggregate_key * *challenge + *exception_commitment
}

/// Partial check of one subtree's aggregate, usable at any node.
pub fn verify_partial(
    aggregate: &SubtreeAggregate,
    response: &Scalar,
    challenge: &Scalar,
    exception_commitment: &Point,
) -> bool {
    reconstruct_commitment(response, &aggregate.key, challenge, exception_commitment)
        == aggregate.commitment
}
