//! The collective signature released at the end of a round.

use crate::{derive_challenge, Hash, Point, PublicKey, RoundNumber, Scalar, View};
use sbor::prelude::*;
use std::collections::BTreeSet;

/// Why a `FinalSignature` failed to verify.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("exception {0} is not a member of the signing set")]
    UnknownException(PublicKey),

    #[error("exception list is not sorted and duplicate-free")]
    MalformedExceptions,

    #[error("reconstructed commitment does not match the aggregate commitment")]
    CommitmentMismatch,

    #[error("recomputed challenge does not match the signature challenge")]
    ChallengeMismatch,
}

/// Aggregate Schnorr signature produced by one completed round.
///
/// Immutable once built. Verifies against the signing set minus
/// `exceptions`:
///
/// ```text
/// X' = Σ keys − Σ exceptions
/// T  = r̂·G + c·X' + V̂_exc
/// ok ⇔ T == V̂  ∧  c == H(T ‖ message ‖ merkle_root?)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct FinalSignature {
    /// The signed proposal.
    pub message: Vec<u8>,

    pub round: RoundNumber,

    pub view: View,

    /// Aggregate challenge `c`.
    pub challenge: Scalar,

    /// Aggregate response `r̂`.
    pub response: Scalar,

    /// Aggregate commitment `V̂` of every node that committed.
    pub commitment: Point,

    /// Commitments of nodes that committed but did not respond.
    pub exception_commitment: Point,

    /// Excluded public keys, sorted.
    pub exceptions: Vec<PublicKey>,

    /// Merkle root bound into the challenge (proof scheme only).
    pub merkle_root: Option<Hash>,
}

impl FinalSignature {
    /// Verify against the full signing set.
    pub fn verify(&self, public_keys: &[PublicKey]) -> Result<(), SignatureError> {
        if !self.exceptions.windows(2).all(|w| w[0] < w[1]) {
            return Err(SignatureError::MalformedExceptions);
        }

        let keys: BTreeSet<&PublicKey> = public_keys.iter().collect();
        if let Some(unknown) = self.exceptions.iter().find(|e| !keys.contains(e)) {
            return Err(SignatureError::UnknownException(*unknown));
        }

        let excepted: BTreeSet<&PublicKey> = self.exceptions.iter().collect();
        let effective = PublicKey::aggregate(keys.into_iter().filter(|k| !excepted.contains(k)));
        self.verify_with_aggregate(effective)
    }

    /// Verify against an already-reduced aggregate key `X'`.
    pub fn verify_with_aggregate(&self, aggregate_key: Point) -> Result<(), SignatureError> {
        let reconstructed = Point::base_mul(&self.response)
            + aggregate_key * self.challenge
            + self.exception_commitment;

        if reconstructed != self.commitment {
            return Err(SignatureError::CommitmentMismatch);
        }

        let recomputed = derive_challenge(&reconstructed, &self.message, self.merkle_root.as_ref());
        if recomputed != self.challenge {
            return Err(SignatureError::ChallengeMismatch);
        }

        Ok(())
    }

    /// Number of signers out of a set of `total`.
    pub fn signer_count(&self, total: usize) -> usize {
        total.saturating_sub(self.exceptions.len())
    }
}
