//! Verification-hook doubles.
//!
//! Each double is injected per node, so tests never share global counters.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use treesig_cosi::ProposalVerifier;
use treesig_types::RoundNumber;

/// Accepts everything and counts calls.
#[derive(Debug, Clone, Default)]
pub struct CountingVerifier {
    calls: Arc<AtomicUsize>,
}

impl CountingVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ProposalVerifier for CountingVerifier {
    fn verify(&self, _round: RoundNumber, _message: &[u8], _data: &[u8]) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        true
    }
}

/// Refuses exactly on its `nth` call (1-based) and accepts every other.
#[derive(Debug, Clone)]
pub struct RefuseNth {
    nth: usize,
    calls: Arc<AtomicUsize>,
    accepted: Arc<AtomicUsize>,
}

impl RefuseNth {
    pub fn new(nth: usize) -> Self {
        Self {
            nth,
            calls: Arc::new(AtomicUsize::new(0)),
            accepted: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl ProposalVerifier for RefuseNth {
    fn verify(&self, _round: RoundNumber, _message: &[u8], _data: &[u8]) -> bool {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let accept = call != self.nth;
        if accept {
            self.accepted.fetch_add(1, Ordering::SeqCst);
        }
        accept
    }
}

/// Refuses everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct RefuseAll;

impl ProposalVerifier for RefuseAll {
    fn verify(&self, _round: RoundNumber, _message: &[u8], _data: &[u8]) -> bool {
        false
    }
}

/// Accepts only proposals equal to `expected`.
#[derive(Debug, Clone)]
pub struct ExpectMessage {
    expected: Vec<u8>,
}

impl ExpectMessage {
    pub fn new(expected: impl Into<Vec<u8>>) -> Self {
        Self {
            expected: expected.into(),
        }
    }
}

impl ProposalVerifier for ExpectMessage {
    fn verify(&self, _round: RoundNumber, message: &[u8], _data: &[u8]) -> bool {
        message == self.expected.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refuse_nth() {
        let verifier = RefuseNth::new(2);
        let shared = verifier.clone();
        assert!(verifier.verify(RoundNumber(1), b"m", b""));
        assert!(!verifier.verify(RoundNumber(2), b"m", b""));
        assert!(verifier.verify(RoundNumber(3), b"m", b""));
        assert_eq!(shared.calls(), 3);
        assert_eq!(shared.accepted(), 2);
    }

    #[test]
    fn test_counting() {
        let verifier = CountingVerifier::new();
        verifier.verify(RoundNumber(1), b"m", b"");
        assert_eq!(verifier.calls(), 1);
        assert!(!RefuseAll.verify(RoundNumber(1), b"m", b""));
        assert!(ExpectMessage::new("hello").verify(RoundNumber(1), b"hello", b""));
    }
}
