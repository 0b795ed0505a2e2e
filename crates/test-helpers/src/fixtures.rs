//! Signed fixture builders.
//!
//! These produce signatures with the same algebra the tree computes, but
//! flat (no tree), so tests can check verification paths in isolation.

use crate::TestRoster;
use treesig_cosi::{individual_response, round_challenge};
use treesig_types::{FinalSignature, Hash, NodeId, Point, PublicKey, RoundNumber, Scalar, View};

/// Deterministic nonce of a member for fixtures.
pub fn fixture_nonce(index: usize) -> Scalar {
    Scalar::from_u64(1_000 + index as u64 * 7)
}

/// A valid signature over `message` by the members at `signers`; every
/// other member is an exception.
///
/// # Example
///
/// ```rust
/// use treesig_test_helpers::{fixtures, TestRoster};
///
/// let roster = TestRoster::new(5, 7);
/// let signature = fixtures::make_signature(&roster, &[0, 2, 4], b"msg");
/// assert_eq!(signature.exceptions.len(), 2);
/// assert!(signature.verify(&roster.public_keys()).is_ok());
/// ```
pub fn make_signature(roster: &TestRoster, signers: &[usize], message: &[u8]) -> FinalSignature {
    make_signature_with_root(roster, signers, message, None)
}

/// Like [`make_signature`], binding a Merkle root into the challenge.
pub fn make_signature_with_root(
    roster: &TestRoster,
    signers: &[usize],
    message: &[u8],
    merkle_root: Option<Hash>,
) -> FinalSignature {
    let commitment = Point::sum(
        &signers
            .iter()
            .map(|&i| Point::base_mul(&fixture_nonce(i)))
            .collect::<Vec<_>>(),
    );
    let challenge = round_challenge(&commitment, message, merkle_root.as_ref());
    let response = signers.iter().fold(Scalar::ZERO, |acc, &i| {
        acc + individual_response(
            &fixture_nonce(i),
            roster.keypair(NodeId(i as u64)).secret(),
            &challenge,
        )
    });

    let mut exceptions: Vec<PublicKey> = (0..roster.size())
        .filter(|i| !signers.contains(i))
        .map(|i| roster.public_key(NodeId(i as u64)))
        .collect();
    exceptions.sort();

    FinalSignature {
        message: message.to_vec(),
        round: RoundNumber(1),
        view: View(0),
        challenge,
        response,
        commitment,
        exception_commitment: Point::identity(),
        exceptions,
        merkle_root,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_signature_verifies() {
        let roster = TestRoster::new(4, 42);
        let all = make_signature(&roster, &[0, 1, 2, 3], b"hello world");
        assert!(all.exceptions.is_empty());
        assert!(all.verify(&roster.public_keys()).is_ok());

        let rooted = make_signature_with_root(&roster, &[1, 3], b"m", Some(Hash::from_bytes(b"root")));
        assert!(rooted.verify(&roster.public_keys()).is_ok());
    }
}
