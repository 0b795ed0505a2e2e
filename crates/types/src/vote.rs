//! Membership and view-change votes.

use crate::{Member, NodeId, View, VoteIndex};
use sbor::prelude::*;

/// Domain tag prefixed to a vote's signing bytes.
pub const DOMAIN_VOTE: &[u8] = b"TREESIG_VOTE";

/// What a vote decides.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub enum VoteKind {
    /// Add `member` to the roster.
    AddMember { member: Member },

    /// Remove `node` from the roster.
    RemoveMember { node: NodeId },

    /// Move to the vote's view, rooted at `root`.
    ViewChange { root: NodeId },
}

impl VoteKind {
    /// The node the vote is about.
    pub fn target(&self) -> NodeId {
        match self {
            VoteKind::AddMember { member } => member.node_id,
            VoteKind::RemoveMember { node } => *node,
            VoteKind::ViewChange { root } => *root,
        }
    }

    pub fn is_view_change(&self) -> bool {
        matches!(self, VoteKind::ViewChange { .. })
    }
}

/// One entry in the vote log.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Vote {
    /// Log position; assigned by the root that runs the voting round.
    pub index: VoteIndex,

    /// View the vote was decided in (for view changes, the new view).
    pub view: View,

    pub kind: VoteKind,

    /// Set once a signing round over this vote has completed.
    pub confirmed: bool,
}

impl Vote {
    pub fn new(index: VoteIndex, view: View, kind: VoteKind) -> Self {
        Self {
            index,
            view,
            kind,
            confirmed: false,
        }
    }

    /// Bytes a voting round signs.
    ///
    /// Format: `TREESIG_VOTE` || index || view || kind tag || target [|| key]
    ///
    /// `confirmed` is excluded so the signed bytes are the same before and
    /// after confirmation.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut msg = Vec::with_capacity(DOMAIN_VOTE.len() + 57);
        msg.extend_from_slice(DOMAIN_VOTE);
        msg.extend_from_slice(&self.index.0.to_le_bytes());
        msg.extend_from_slice(&self.view.0.to_le_bytes());
        match &self.kind {
            VoteKind::AddMember { member } => {
                msg.push(0);
                msg.extend_from_slice(&member.node_id.0.to_le_bytes());
                msg.extend_from_slice(member.public_key.as_bytes());
            }
            VoteKind::RemoveMember { node } => {
                msg.push(1);
                msg.extend_from_slice(&node.0.to_le_bytes());
            }
            VoteKind::ViewChange { root } => {
                msg.push(2);
                msg.extend_from_slice(&root.0.to_le_bytes());
            }
        }
        msg
    }
}
