//! Event types for the deterministic state machine.

use crate::TimerId;
use treesig_messages::SigningMessage;
use treesig_types::{RoundNumber, Vote, VoteKind};

/// Priority levels for event ordering within the same timestamp.
///
/// Events at the same simulation time are processed in priority order.
/// Lower values = higher priority (processed first).
///
/// This ensures causality is preserved: internal events (consequences of
/// processing an event) are handled before new external inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum EventPriority {
    /// Internal events: consequences of prior event processing.
    /// Processed first to maintain causality.
    Internal = 0,

    /// Timer events: scheduled by the node itself.
    Timer = 1,

    /// Network events: external inputs from other nodes.
    Network = 2,

    /// Client events: external inputs from users.
    Client = 3,
}

/// All possible events a node can receive.
///
/// Events are **passive data** - they describe something that happened.
/// The state machine processes events and returns actions.
#[derive(Debug, Clone)]
pub enum Event {
    // ═══════════════════════════════════════════════════════════════════════
    // Client Events
    // ═══════════════════════════════════════════════════════════════════════
    /// Sign `message`. Only meaningful at the current root.
    SubmitProposal { message: Vec<u8>, data: Vec<u8> },

    /// Propose a membership change; travels up to the root.
    ProposeChange { kind: VoteKind },

    /// Sweep the tree for reachable nodes. Root only.
    QueryStatus,

    /// Tear the tree down from this node.
    CloseAll,

    // ═══════════════════════════════════════════════════════════════════════
    // Network Events
    // ═══════════════════════════════════════════════════════════════════════
    /// An envelope arrived from a neighbour.
    MessageReceived { message: SigningMessage },

    // ═══════════════════════════════════════════════════════════════════════
    // Timer Events
    // ═══════════════════════════════════════════════════════════════════════
    /// Commit-phase wait budget for `round` elapsed.
    CommitTimer { round: RoundNumber },

    /// Response-phase wait budget for `round` elapsed.
    ResponseTimer { round: RoundNumber },

    /// Periodic liveness check (and root status sweep).
    HeartbeatTimer,

    /// Collection window for a status sweep elapsed.
    StatusTimer { sweep: u64 },

    // ═══════════════════════════════════════════════════════════════════════
    // Internal Events
    // ═══════════════════════════════════════════════════════════════════════
    /// A background view-change task asks this node to run a voting round.
    StartVotingRound { vote: Vote },

    /// The transport reported EOF; no further messages will arrive.
    TransportClosed,
}

impl Event {
    /// Get the priority for this event type.
    pub fn priority(&self) -> EventPriority {
        match self {
            Event::StartVotingRound { .. } | Event::TransportClosed => EventPriority::Internal,

            Event::CommitTimer { .. }
            | Event::ResponseTimer { .. }
            | Event::HeartbeatTimer
            | Event::StatusTimer { .. } => EventPriority::Timer,

            Event::MessageReceived { .. } => EventPriority::Network,

            Event::SubmitProposal { .. }
            | Event::ProposeChange { .. }
            | Event::QueryStatus
            | Event::CloseAll => EventPriority::Client,
        }
    }

    /// Get the event type name for telemetry.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::SubmitProposal { .. } => "SubmitProposal",
            Event::ProposeChange { .. } => "ProposeChange",
            Event::QueryStatus => "QueryStatus",
            Event::CloseAll => "CloseAll",
            Event::MessageReceived { .. } => "MessageReceived",
            Event::CommitTimer { .. } => "CommitTimer",
            Event::ResponseTimer { .. } => "ResponseTimer",
            Event::HeartbeatTimer => "HeartbeatTimer",
            Event::StatusTimer { .. } => "StatusTimer",
            Event::StartVotingRound { .. } => "StartVotingRound",
            Event::TransportClosed => "TransportClosed",
        }
    }
}

impl From<TimerId> for Event {
    fn from(id: TimerId) -> Self {
        match id {
            TimerId::CommitWait(round) => Event::CommitTimer { round },
            TimerId::ResponseWait(round) => Event::ResponseTimer { round },
            TimerId::Heartbeat => Event::HeartbeatTimer,
            TimerId::StatusWait(sweep) => Event::StatusTimer { sweep },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(EventPriority::Internal < EventPriority::Timer);
        assert!(EventPriority::Timer < EventPriority::Network);
        assert!(EventPriority::Network < EventPriority::Client);
    }

    #[test]
    fn test_timer_events_have_timer_priority() {
        for id in [
            TimerId::CommitWait(RoundNumber(1)),
            TimerId::ResponseWait(RoundNumber(1)),
            TimerId::Heartbeat,
            TimerId::StatusWait(3),
        ] {
            assert_eq!(Event::from(id).priority(), EventPriority::Timer);
        }
    }
}
