//! Negative fixtures: signatures that verification must reject.

use crate::fixtures::make_signature;
use crate::TestRoster;
use treesig_types::{FinalSignature, Point, Scalar};

/// A signature whose response was altered after signing.
pub fn make_tampered_response(roster: &TestRoster, message: &[u8]) -> FinalSignature {
    let mut signature = make_signature(roster, &all(roster), message);
    signature.response += Scalar::from_u64(1);
    signature
}

/// A signature that claims to sign a message it did not.
pub fn make_wrong_message(roster: &TestRoster, signed: &[u8], claimed: &[u8]) -> FinalSignature {
    let mut signature = make_signature(roster, &all(roster), signed);
    signature.message = claimed.to_vec();
    signature
}

/// A signature that hides a signer's absence: the member at `absent` did
/// not sign, but the exception list does not say so.
pub fn make_hidden_exception(roster: &TestRoster, absent: usize, message: &[u8]) -> FinalSignature {
    let signers: Vec<usize> = all(roster).into_iter().filter(|i| *i != absent).collect();
    let mut signature = make_signature(roster, &signers, message);
    signature.exceptions.clear();
    signature
}

/// A signature that lists a key outside the roster as an exception.
pub fn make_foreign_exception(roster: &TestRoster, message: &[u8]) -> FinalSignature {
    let mut signature = make_signature(roster, &all(roster), message);
    signature.exceptions = vec![roster.outsider(0).public_key];
    signature
}

/// A signature whose exception commitment was inflated, which would let a
/// forger cover for missing responses.
pub fn make_inflated_exception_commitment(roster: &TestRoster, message: &[u8]) -> FinalSignature {
    let mut signature = make_signature(roster, &all(roster), message);
    signature.exception_commitment += Point::base_mul(&Scalar::from_u64(5));
    signature
}

/// A full signature by a different set of keys of the same size.
pub fn make_wrong_key_signature(roster: &TestRoster, message: &[u8]) -> FinalSignature {
    let impostor = TestRoster::new(roster.size(), 0xbad);
    make_signature(&impostor, &all(&impostor), message)
}

fn all(roster: &TestRoster) -> Vec<usize> {
    (0..roster.size()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_fixtures_fail_verification() {
        let roster = TestRoster::new(4, 42);
        let keys = roster.public_keys();

        assert!(make_tampered_response(&roster, b"m").verify(&keys).is_err());
        assert!(make_wrong_message(&roster, b"m", b"other").verify(&keys).is_err());
        assert!(make_hidden_exception(&roster, 2, b"m").verify(&keys).is_err());
        assert!(make_foreign_exception(&roster, b"m").verify(&keys).is_err());
        assert!(make_inflated_exception_commitment(&roster, b"m").verify(&keys).is_err());
        assert!(make_wrong_key_signature(&roster, b"m").verify(&keys).is_err());
    }
}
