//! Messages exchanged between tree nodes.
//!
//! Every message travels inside a [`SigningMessage`] envelope carrying the
//! sender's view, identity and vote-log progress.

mod control;
mod envelope;
mod membership;
mod phase;

pub use control::{ErrorReport, SignatureBroadcast, StatusConnections, StatusDirection};
pub use envelope::{MessageKind, Payload, SigningMessage};
pub use membership::{CatchUpRequest, CatchUpResponse, GroupChange};
pub use phase::{Announcement, Challenge, Commitment, Response};
