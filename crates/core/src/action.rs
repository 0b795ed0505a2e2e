//! Action types for the deterministic state machine.

use crate::TimerId;
use std::time::Duration;
use treesig_messages::SigningMessage;
use treesig_types::{FinalSignature, NodeId, RoundNumber, Vote};

/// Actions the state machine asks the runner to perform.
///
/// Actions are **commands** - they describe something to do. The runner
/// executes them and may feed results back as events.
#[derive(Debug, Clone)]
pub enum Action {
    // ═══════════════════════════════════════════════════════════════════════
    // Network
    // ═══════════════════════════════════════════════════════════════════════
    /// Deliver an envelope to one tree neighbour.
    Send { to: NodeId, message: SigningMessage },

    // ═══════════════════════════════════════════════════════════════════════
    // Timers
    // ═══════════════════════════════════════════════════════════════════════
    SetTimer { id: TimerId, duration: Duration },

    CancelTimer { id: TimerId },

    // ═══════════════════════════════════════════════════════════════════════
    // Background work
    // ═══════════════════════════════════════════════════════════════════════
    /// Run a voting round off the receive loop. The runner feeds
    /// `Event::StartVotingRound` back when the task gets to it, unless the
    /// node shut down first.
    SpawnVotingRound { vote: Vote },

    // ═══════════════════════════════════════════════════════════════════════
    // Notifications
    // ═══════════════════════════════════════════════════════════════════════
    /// A round finished. At non-root nodes `inclusion_verified` reports
    /// whether the local Merkle leaf is under the signature's root (proof
    /// scheme only).
    EmitSignature {
        signature: FinalSignature,
        inclusion_verified: Option<bool>,
    },

    /// A round was discarded without a signature.
    RoundFailed { round: RoundNumber, reason: String },

    /// A confirmed vote was applied to local state.
    VoteApplied { vote: Vote },

    /// A status sweep finished at the root.
    StatusCollected { sweep: u64, reachable: u32 },

    /// The node is closed; the runner should release its resources.
    Shutdown,
}

impl Action {
    /// Get the action type name for telemetry.
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::Send { .. } => "Send",
            Action::SetTimer { .. } => "SetTimer",
            Action::CancelTimer { .. } => "CancelTimer",
            Action::SpawnVotingRound { .. } => "SpawnVotingRound",
            Action::EmitSignature { .. } => "EmitSignature",
            Action::RoundFailed { .. } => "RoundFailed",
            Action::VoteApplied { .. } => "VoteApplied",
            Action::StatusCollected { .. } => "StatusCollected",
            Action::Shutdown => "Shutdown",
        }
    }
}
