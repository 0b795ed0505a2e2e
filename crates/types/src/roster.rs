//! The set of nodes taking part in signing.

use crate::{NodeId, Point, PublicKey, View};
use sbor::prelude::*;

/// A roster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub struct Member {
    /// Unique identifier for this node.
    pub node_id: NodeId,

    /// Long-term public key used in aggregation.
    pub public_key: PublicKey,
}

/// The ordered set of members.
///
/// Members are kept sorted by `NodeId`; every node derives the same tree
/// from the same roster.
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct Roster {
    members: Vec<Member>,
}

impl Roster {
    /// Create a roster, sorting by id and dropping duplicate ids.
    pub fn new(mut members: Vec<Member>) -> Self {
        members.sort_by_key(|m| m.node_id);
        members.dedup_by_key(|m| m.node_id);
        Self { members }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn get(&self, node_id: NodeId) -> Option<&Member> {
        self.members
            .binary_search_by_key(&node_id, |m| m.node_id)
            .ok()
            .map(|i| &self.members[i])
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.get(node_id).is_some()
    }

    pub fn index_of(&self, node_id: NodeId) -> Option<usize> {
        self.members
            .binary_search_by_key(&node_id, |m| m.node_id)
            .ok()
    }

    pub fn public_keys(&self) -> Vec<PublicKey> {
        self.members.iter().map(|m| m.public_key).collect()
    }

    /// Sum of every member's public key.
    pub fn aggregate_key(&self) -> Point {
        PublicKey::aggregate(self.members.iter().map(|m| &m.public_key))
    }

    /// The member that roots the tree in `view`.
    pub fn root_for(&self, view: View) -> Option<NodeId> {
        if self.members.is_empty() {
            return None;
        }
        let index = (view.0 % self.members.len() as u64) as usize;
        Some(self.members[index].node_id)
    }

    /// A copy with `member` added, replacing any member with the same id.
    pub fn with_member(&self, member: Member) -> Self {
        let mut members: Vec<Member> = self
            .members
            .iter()
            .filter(|m| m.node_id != member.node_id)
            .copied()
            .collect();
        members.push(member);
        Self::new(members)
    }

    /// A copy without `node_id`.
    pub fn without_member(&self, node_id: NodeId) -> Self {
        Self {
            members: self
                .members
                .iter()
                .filter(|m| m.node_id != node_id)
                .copied()
                .collect(),
        }
    }
}
