//! Append-only vote log and its replay cursor.
//!
//! The log only ever grows, one index at a time from the cursor's point of
//! view: votes may be stored out of order (catch-up can deliver them in any
//! order), but the cursor applies them strictly by index, and an index is
//! applied at most once.

use std::collections::BTreeMap;
use treesig_types::{Vote, VoteIndex};

/// Confirmed votes keyed by index.
#[derive(Debug, Clone, Default)]
pub struct VoteLog {
    entries: BTreeMap<VoteIndex, Vote>,
}

impl VoteLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a vote. Returns `false` if the index is 0 or already taken;
    /// an existing entry is never overwritten.
    pub fn put(&mut self, vote: Vote) -> bool {
        if vote.index == VoteIndex(0) || self.entries.contains_key(&vote.index) {
            return false;
        }
        self.entries.insert(vote.index, vote);
        true
    }

    pub fn get(&self, index: VoteIndex) -> Option<&Vote> {
        self.entries.get(&index)
    }

    pub fn contains(&self, index: VoteIndex) -> bool {
        self.entries.contains_key(&index)
    }

    /// Highest stored index, `VoteIndex(0)` when empty.
    pub fn last_index(&self) -> VoteIndex {
        self.entries
            .keys()
            .next_back()
            .copied()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Replay progress over a [`VoteLog`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoteCursor {
    last_applied: VoteIndex,
    last_seen: VoteIndex,
}

impl VoteCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_applied(&self) -> VoteIndex {
        self.last_applied
    }

    pub fn last_seen(&self) -> VoteIndex {
        self.last_seen
    }

    /// Note that some peer (or our own log) knows about `index`.
    pub fn observe(&mut self, index: VoteIndex) {
        self.last_seen = self.last_seen.max(index);
    }

    /// Note a peer's claimed `last_seen_vote`. A claim reaches at most one
    /// index past `held`, the highest vote this node has in hand, so a
    /// forged claim can never put the node more than one vote behind.
    pub fn observe_claim(&mut self, claim: VoteIndex, held: VoteIndex) {
        self.observe(claim.min(held.max(self.last_applied).next()));
    }

    /// Forget claims nobody backed with a vote.
    pub fn retract(&mut self, log: &VoteLog) {
        self.last_seen = self.last_applied.max(log.last_index());
    }

    pub fn is_caught_up(&self) -> bool {
        self.last_seen == self.last_applied
    }

    /// The next index that must be fetched, if any.
    pub fn next_missing(&self, log: &VoteLog) -> Option<VoteIndex> {
        let next = self.last_applied.next();
        (next <= self.last_seen && !log.contains(next)).then_some(next)
    }

    /// Advance past the next vote if the log has it.
    pub fn apply_next<'a>(&mut self, log: &'a VoteLog) -> Option<&'a Vote> {
        let next = self.last_applied.next();
        let vote = log.get(next)?;
        self.last_applied = next;
        self.last_seen = self.last_seen.max(next);
        Some(vote)
    }
}
