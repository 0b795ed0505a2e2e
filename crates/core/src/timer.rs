//! Timer scheduling abstraction.
//!
//! The state machine emits `Action::SetTimer` and `Action::CancelTimer`.
//! This trait abstracts the runtime side:
//! - Production: `TimerManager` spawns tokio tasks
//! - Simulation: inserts into a deterministic event queue

use std::time::Duration;
use treesig_types::RoundNumber;

/// Timer identification for scheduled events.
///
/// Setting a timer that is already pending replaces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    /// Wait for children's commitments in a round.
    CommitWait(RoundNumber),
    /// Wait for children's responses in a round.
    ResponseWait(RoundNumber),
    /// Periodic liveness check.
    Heartbeat,
    /// Collection window of a status sweep.
    StatusWait(u64),
}

/// Abstraction for scheduling and cancelling timers.
///
/// Implementations convert timer requests into runtime-specific mechanisms:
/// - `TimerManager` (production) uses `tokio::spawn` + `tokio::time::sleep`
/// - Simulation inserts into a seeded deterministic event queue
pub trait TimerScheduler {
    fn set_timer(&mut self, id: TimerId, duration: Duration);
    fn cancel_timer(&mut self, id: TimerId);
}
