//! Round phase transitions and message dispatch rules.
//!
//! Two tables drive the engine:
//!
//! - [`dispatch`]: given the phase of the round a message refers to (or
//!   `None` if the node has no such round) and the message kind, decide
//!   whether the message opens a round, applies to it, or is dropped.
//! - [`advance`]: the legal phase changes of a round.
//!
//! ```text
//! Announced ─forwarded─▶ Committing ─challenge─▶ Challenged ─own response─▶ Responding ─all in─▶ Done
//!     └──────────────────────┴──────────abandon───────┴────────────────────────┴──────▶ Failed
//! ```

use std::fmt;
use treesig_messages::MessageKind;

/// Lifecycle of one round at one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoundPhase {
    /// Round created from an announcement, not yet forwarded.
    Announced,
    /// Waiting for children's commitments, or for the parent's challenge
    /// once our own commitment went up.
    Committing,
    /// Challenge stored and pushed to children.
    Challenged,
    /// Own response computed; waiting for children's responses.
    Responding,
    Done,
    Failed,
}

impl RoundPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RoundPhase::Done | RoundPhase::Failed)
    }
}

/// Inputs that move a round between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseStep {
    /// The announcement went out to every child.
    Forwarded,
    /// A challenge was received (or computed, at the root).
    ChallengeStored,
    /// The local response was folded into `r̂`.
    ResponseComputed,
    /// Every child's response is accounted for.
    ResponsesComplete,
    /// Timeout, view change, verification failure or a child's error.
    Abandon,
}

/// The phase that follows `from` on `step`, if the step is legal.
pub fn advance(from: RoundPhase, step: PhaseStep) -> Option<RoundPhase> {
    use PhaseStep::*;
    use RoundPhase::*;

    match (from, step) {
        (Announced, Forwarded) => Some(Committing),
        (Committing, ChallengeStored) => Some(Challenged),
        (Challenged, ResponseComputed) => Some(Responding),
        (Responding, ResponsesComplete) => Some(Done),
        (phase, Abandon) if !phase.is_terminal() => Some(Failed),
        _ => None,
    }
}

/// What to do with an incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Create a new round from this message.
    Open,
    /// Hand the message to its handler.
    Apply,
    /// Log and drop.
    Ignore(&'static str),
}

/// Decide how a message of `kind` interacts with a round in `phase`.
///
/// Kinds that are not scoped to a round always apply.
pub fn dispatch(phase: Option<RoundPhase>, kind: MessageKind) -> Disposition {
    use Disposition::*;
    use RoundPhase::*;

    match (kind, phase) {
        (MessageKind::Announcement, None) => Open,
        (MessageKind::Announcement, Some(_)) => Ignore("duplicate announcement"),

        (MessageKind::Commitment, Some(Committing)) => Apply,
        (MessageKind::Commitment, Some(Announced)) => Ignore("commitment before announcement"),
        (MessageKind::Commitment, Some(Challenged | Responding)) => Ignore("late commitment"),

        (MessageKind::Challenge, Some(Committing)) => Apply,
        (MessageKind::Challenge, Some(Announced)) => Ignore("challenge before commitment"),
        (MessageKind::Challenge, Some(Challenged | Responding)) => Ignore("duplicate challenge"),

        (MessageKind::Response, Some(Challenged | Responding)) => Apply,
        (MessageKind::Response, Some(Announced | Committing)) => Ignore("response before challenge"),

        (MessageKind::Error, Some(Announced | Committing | Challenged | Responding)) => Apply,

        (
            MessageKind::Commitment
            | MessageKind::Challenge
            | MessageKind::Response
            | MessageKind::Error,
            Some(Done | Failed),
        ) => Ignore("round finished"),
        (
            MessageKind::Commitment
            | MessageKind::Challenge
            | MessageKind::Response
            | MessageKind::Error,
            None,
        ) => Ignore("unknown round"),

        (
            MessageKind::GroupChange
            | MessageKind::CatchUpRequest
            | MessageKind::CatchUpResponse
            | MessageKind::StatusConnections
            | MessageKind::SignatureBroadcast
            | MessageKind::CloseAll,
            _,
        ) => Apply,
    }
}

/// Who may legitimately send a message kind, relative to the receiver, in
/// the tree of the message's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderRole {
    Parent,
    Child,
    /// Parent or child (status sweeps travel both ways).
    Neighbour,
    /// Any roster member (catch-up is point to point).
    Any,
}

impl fmt::Display for SenderRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SenderRole::Parent => "parent",
            SenderRole::Child => "child",
            SenderRole::Neighbour => "neighbour",
            SenderRole::Any => "member",
        })
    }
}

pub fn expected_sender(kind: MessageKind) -> SenderRole {
    match kind {
        MessageKind::Announcement
        | MessageKind::Challenge
        | MessageKind::SignatureBroadcast
        | MessageKind::CloseAll => SenderRole::Parent,

        MessageKind::Commitment
        | MessageKind::Response
        | MessageKind::Error
        | MessageKind::GroupChange => SenderRole::Child,

        MessageKind::StatusConnections => SenderRole::Neighbour,

        MessageKind::CatchUpRequest | MessageKind::CatchUpResponse => SenderRole::Any,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_PHASES: [RoundPhase; 6] = [
        RoundPhase::Announced,
        RoundPhase::Committing,
        RoundPhase::Challenged,
        RoundPhase::Responding,
        RoundPhase::Done,
        RoundPhase::Failed,
    ];

    #[test]
    fn test_happy_path() {
        let mut phase = RoundPhase::Announced;
        for step in [
            PhaseStep::Forwarded,
            PhaseStep::ChallengeStored,
            PhaseStep::ResponseComputed,
            PhaseStep::ResponsesComplete,
        ] {
            phase = advance(phase, step).unwrap();
        }
        assert_eq!(phase, RoundPhase::Done);
    }

    #[test]
    fn test_abandon_only_from_live_phases() {
        for phase in ALL_PHASES {
            let next = advance(phase, PhaseStep::Abandon);
            if phase.is_terminal() {
                assert_eq!(next, None, "{phase:?} is terminal");
            } else {
                assert_eq!(next, Some(RoundPhase::Failed));
            }
        }
    }

    #[test]
    fn test_no_skipping_phases() {
        assert_eq!(advance(RoundPhase::Announced, PhaseStep::ChallengeStored), None);
        assert_eq!(advance(RoundPhase::Committing, PhaseStep::ResponsesComplete), None);
        assert_eq!(advance(RoundPhase::Done, PhaseStep::Forwarded), None);
    }

    #[test]
    fn test_dispatch_opens_only_on_announcement() {
        for kind in MessageKind::ALL {
            let opens = dispatch(None, kind) == Disposition::Open;
            assert_eq!(opens, kind == MessageKind::Announcement, "{kind}");
        }
    }

    #[test]
    fn test_dispatch_phase_messages() {
        use RoundPhase::*;
        assert_eq!(dispatch(Some(Committing), MessageKind::Commitment), Disposition::Apply);
        assert_eq!(dispatch(Some(Committing), MessageKind::Challenge), Disposition::Apply);
        assert_eq!(dispatch(Some(Responding), MessageKind::Response), Disposition::Apply);
        assert!(matches!(
            dispatch(Some(Responding), MessageKind::Commitment),
            Disposition::Ignore(_)
        ));
        assert!(matches!(
            dispatch(Some(Committing), MessageKind::Response),
            Disposition::Ignore(_)
        ));
        assert!(matches!(
            dispatch(Some(Done), MessageKind::Error),
            Disposition::Ignore(_)
        ));
    }

    #[test]
    fn test_terminal_rounds_drop_round_messages() {
        for kind in [
            MessageKind::Commitment,
            MessageKind::Challenge,
            MessageKind::Response,
            MessageKind::Error,
        ] {
            assert_eq!(
                dispatch(Some(RoundPhase::Failed), kind),
                Disposition::Ignore("round finished")
            );
        }
    }

    #[test]
    fn test_expected_senders() {
        assert_eq!(expected_sender(MessageKind::Announcement), SenderRole::Parent);
        assert_eq!(expected_sender(MessageKind::Response), SenderRole::Child);
        assert_eq!(expected_sender(MessageKind::CatchUpRequest), SenderRole::Any);
        assert_eq!(expected_sender(MessageKind::StatusConnections), SenderRole::Neighbour);
    }
}
