//! The `SigningMessage` envelope.

use crate::{
    Announcement, CatchUpRequest, CatchUpResponse, Challenge, Commitment, ErrorReport,
    GroupChange, Response, SignatureBroadcast, StatusConnections,
};
use sbor::prelude::BasicSbor;
use std::fmt;
use treesig_types::{NetworkMessage, NodeId, RoundNumber, View, VoteIndex};

/// Exactly one payload per message.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub enum Payload {
    Announcement(Announcement),
    Commitment(Commitment),
    Challenge(Challenge),
    Response(Response),
    Error(ErrorReport),
    GroupChange(GroupChange),
    CatchUpRequest(CatchUpRequest),
    CatchUpResponse(CatchUpResponse),
    StatusConnections(StatusConnections),
    SignatureBroadcast(SignatureBroadcast),
    CloseAll,
}

/// Payload discriminant, used as the dispatch key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    Announcement,
    Commitment,
    Challenge,
    Response,
    Error,
    GroupChange,
    CatchUpRequest,
    CatchUpResponse,
    StatusConnections,
    SignatureBroadcast,
    CloseAll,
}

impl MessageKind {
    /// Every kind, in declaration order.
    pub const ALL: [MessageKind; 11] = [
        MessageKind::Announcement,
        MessageKind::Commitment,
        MessageKind::Challenge,
        MessageKind::Response,
        MessageKind::Error,
        MessageKind::GroupChange,
        MessageKind::CatchUpRequest,
        MessageKind::CatchUpResponse,
        MessageKind::StatusConnections,
        MessageKind::SignatureBroadcast,
        MessageKind::CloseAll,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Announcement => "announcement",
            MessageKind::Commitment => "commitment",
            MessageKind::Challenge => "challenge",
            MessageKind::Response => "response",
            MessageKind::Error => "error",
            MessageKind::GroupChange => "group_change",
            MessageKind::CatchUpRequest => "catch_up_request",
            MessageKind::CatchUpResponse => "catch_up_response",
            MessageKind::StatusConnections => "status_connections",
            MessageKind::SignatureBroadcast => "signature_broadcast",
            MessageKind::CloseAll => "close_all",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope carried between tree neighbours.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct SigningMessage {
    /// View the sender was in when it sent this message.
    pub view: View,

    pub from: NodeId,

    /// Highest vote index the sender has seen.
    pub last_seen_vote: VoteIndex,

    pub payload: Payload,
}

impl SigningMessage {
    pub fn new(view: View, from: NodeId, last_seen_vote: VoteIndex, payload: Payload) -> Self {
        Self {
            view,
            from,
            last_seen_vote,
            payload,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match &self.payload {
            Payload::Announcement(_) => MessageKind::Announcement,
            Payload::Commitment(_) => MessageKind::Commitment,
            Payload::Challenge(_) => MessageKind::Challenge,
            Payload::Response(_) => MessageKind::Response,
            Payload::Error(_) => MessageKind::Error,
            Payload::GroupChange(_) => MessageKind::GroupChange,
            Payload::CatchUpRequest(_) => MessageKind::CatchUpRequest,
            Payload::CatchUpResponse(_) => MessageKind::CatchUpResponse,
            Payload::StatusConnections(_) => MessageKind::StatusConnections,
            Payload::SignatureBroadcast(_) => MessageKind::SignatureBroadcast,
            Payload::CloseAll => MessageKind::CloseAll,
        }
    }

    /// The round this message belongs to, for round-scoped payloads.
    pub fn round(&self) -> Option<RoundNumber> {
        match &self.payload {
            Payload::Announcement(a) => Some(a.round),
            Payload::Commitment(c) => Some(c.round),
            Payload::Challenge(c) => Some(c.round),
            Payload::Response(r) => Some(r.round),
            Payload::Error(e) => Some(e.round),
            Payload::SignatureBroadcast(b) => Some(b.signature.round),
            _ => None,
        }
    }
}

impl NetworkMessage for SigningMessage {
    fn message_type_id() -> &'static str {
        "cosi.signing"
    }
}
