//! Per-view spanning tree over the roster.
//!
//! A `TreeTopology` is an immutable snapshot: an arena of node records
//! indexed by `NodeId`. A new snapshot is built for every view and replaces
//! the old one wholesale; nothing mutates a topology in place.
//!
//! # Layout
//!
//! The roster (sorted by id) is rotated so the member at `view mod n` comes
//! first, then laid out breadth-first as a `branching`-ary tree:
//!
//! ```text
//! position:   0
//!           / | \            branching = 3
//!          1  2  3
//!         /|\
//!        4 5 6 ...
//! ```

use crate::{Member, NodeId, PublicKey, Roster, View};
use std::collections::HashMap;

/// Errors building a topology.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    #[error("cannot build a tree over an empty roster")]
    EmptyRoster,

    #[error("branching factor must be at least 1, got {0}")]
    InvalidBranching(usize),
}

#[derive(Debug, Clone)]
struct TreeSlot {
    member: Member,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    depth: u32,
    /// Levels below this node; 0 for a leaf.
    height: u32,
}

/// Immutable parent/children mapping for one view.
#[derive(Debug, Clone)]
pub struct TreeTopology {
    view: View,
    branching: usize,
    roster: Roster,
    slots: Vec<TreeSlot>,
    positions: HashMap<NodeId, usize>,
}

impl TreeTopology {
    /// Build the tree for `view` over `roster`.
    pub fn build(roster: &Roster, view: View, branching: usize) -> Result<Self, TopologyError> {
        if roster.is_empty() {
            return Err(TopologyError::EmptyRoster);
        }
        if branching == 0 {
            return Err(TopologyError::InvalidBranching(branching));
        }

        let n = roster.len();
        let start = (view.0 % n as u64) as usize;
        let ordered: Vec<Member> = (0..n)
            .map(|i| roster.members()[(start + i) % n])
            .collect();

        let mut slots: Vec<TreeSlot> = ordered
            .iter()
            .enumerate()
            .map(|(pos, member)| {
                let parent = (pos > 0).then(|| ordered[(pos - 1) / branching].node_id);
                let first_child = pos * branching + 1;
                let children = (first_child..(first_child + branching).min(n))
                    .map(|c| ordered[c].node_id)
                    .collect();
                TreeSlot {
                    member: *member,
                    parent,
                    children,
                    depth: 0,
                    height: 0,
                }
            })
            .collect();

        // Parents precede children in breadth-first order.
        for pos in 1..n {
            slots[pos].depth = slots[(pos - 1) / branching].depth + 1;
        }
        for pos in (1..n).rev() {
            let parent = (pos - 1) / branching;
            slots[parent].height = slots[parent].height.max(slots[pos].height + 1);
        }

        let positions = ordered
            .iter()
            .enumerate()
            .map(|(pos, m)| (m.node_id, pos))
            .collect();

        Ok(Self {
            view,
            branching,
            roster: roster.clone(),
            slots,
            positions,
        })
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn branching(&self) -> usize {
        self.branching
    }

    /// The roster this tree was built from.
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn root(&self) -> NodeId {
        self.slots[0].member.node_id
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.positions.contains_key(&node)
    }

    fn slot(&self, node: NodeId) -> Option<&TreeSlot> {
        self.positions.get(&node).map(|&pos| &self.slots[pos])
    }

    pub fn is_root(&self, node: NodeId) -> bool {
        self.root() == node
    }

    pub fn is_leaf(&self, node: NodeId) -> bool {
        self.slot(node).is_some_and(|s| s.children.is_empty())
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.slot(node).and_then(|s| s.parent)
    }

    /// Children of `node` in layout order; empty for leaves and strangers.
    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.slot(node).map(|s| s.children.as_slice()).unwrap_or(&[])
    }

    /// Whether `child` is a declared child of `node`.
    pub fn is_child_of(&self, child: NodeId, node: NodeId) -> bool {
        self.parent(child) == Some(node)
    }

    pub fn public_key(&self, node: NodeId) -> Option<PublicKey> {
        self.slot(node).map(|s| s.member.public_key)
    }

    pub fn depth(&self, node: NodeId) -> Option<u32> {
        self.slot(node).map(|s| s.depth)
    }

    /// Levels between `node` and its deepest descendant.
    pub fn height(&self, node: NodeId) -> Option<u32> {
        self.slot(node).map(|s| s.height)
    }

    /// Every member in the subtree rooted at `node`, `node` first.
    pub fn subtree(&self, node: NodeId) -> Vec<Member> {
        let mut out = Vec::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if let Some(slot) = self.slot(current) {
                out.push(slot.member);
                stack.extend(slot.children.iter().rev());
            }
        }
        out
    }

    /// Public keys of every member in the subtree rooted at `node`.
    pub fn subtree_keys(&self, node: NodeId) -> Vec<PublicKey> {
        self.subtree(node).iter().map(|m| m.public_key).collect()
    }

    /// All members in layout order (root first).
    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.slots.iter().map(|s| &s.member)
    }
}
