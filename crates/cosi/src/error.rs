//! Protocol error taxonomy.
//!
//! None of these ever escape `StateMachine::handle`: the engine logs them
//! and turns them into actions (dropped messages, catch-up requests, failed
//! rounds, error reports to the parent, shutdown).

use crate::transition::{PhaseStep, RoundPhase, SenderRole};
use treesig_messages::MessageKind;
use treesig_types::{NodeId, RoundNumber, TopologyError, View, VoteIndex};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CosiError {
    /// Sender is not the declared parent/child for the stated view.
    #[error("{kind} from {from} in {view}: sender is not a declared {expected}")]
    ProtocolViolation {
        from: NodeId,
        kind: MessageKind,
        view: View,
        expected: SenderRole,
    },

    /// A future-view message arrived before pending votes were applied.
    #[error("not caught up: seen vote {last_seen}, applied {last_applied}")]
    NotCaughtUp {
        last_seen: VoteIndex,
        last_applied: VoteIndex,
    },

    /// Another view change is already running; retry once it resolves.
    #[error("view change to {target} already in progress")]
    ViewChangeInProgress { target: View },

    /// Root verification (or a partial check) rejected the aggregate.
    #[error("verification failed for {round}: {reason}")]
    VerificationFailure { round: RoundNumber, reason: String },

    /// The transport hit EOF.
    #[error("transport closed")]
    TransportClosed,

    #[error("message for {message_view} is older than current {current_view}")]
    StaleView {
        message_view: View,
        current_view: View,
    },

    #[error("no active round {0}")]
    UnknownRound(RoundNumber),

    #[error("illegal step {step:?} from phase {from:?}")]
    InvalidTransition { from: RoundPhase, step: PhaseStep },

    #[error("{0} is not a roster member")]
    NotAMember(NodeId),

    #[error(transparent)]
    Topology(#[from] TopologyError),
}

impl CosiError {
    /// Transient errors resolve on their own; the rest end a round or
    /// the node.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CosiError::NotCaughtUp { .. } | CosiError::ViewChangeInProgress { .. }
        )
    }
}
