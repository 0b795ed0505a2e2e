//! View change bookkeeping for liveness.
//!
//! Two triggers start a view change:
//!
//! - **Heartbeat loss**: nothing heard from the parent within the timeout.
//!   Repeated loss escalates the target view (`v+1`, `v+2`, ...) so a dead
//!   next root cannot stall the change forever.
//! - **Round quota**: a round whose number is a multiple of
//!   `rounds_per_view` completed.
//!
//! Only the node that roots the target view initiates; it does so by
//! running a voting round over a `ViewChange` vote on a background task.
//! The view only moves when that vote is confirmed and applied.

use crate::CosiError;
use std::time::Duration;
use tracing::{debug, info};
use treesig_types::{RoundNumber, View};

/// View change state for one node.
#[derive(Debug, Clone)]
pub struct ViewChangeManager {
    /// View whose topology the node currently follows.
    current_view: View,

    /// Target of the view change this node is running, if any.
    in_progress: Option<View>,

    /// Highest target aimed at since the last successful change.
    attempted: Option<View>,

    /// Parent heartbeat timeout; `None` disables the trigger.
    heartbeat_timeout: Option<Duration>,

    /// Time we last heard from the parent.
    last_heartbeat: Duration,

    /// Rounds per view; 0 disables the trigger.
    rounds_per_view: u64,
}

impl ViewChangeManager {
    pub fn new(
        current_view: View,
        heartbeat_timeout: Option<Duration>,
        rounds_per_view: u64,
    ) -> Self {
        Self {
            current_view,
            in_progress: None,
            attempted: None,
            heartbeat_timeout,
            last_heartbeat: Duration::ZERO,
            rounds_per_view,
        }
    }

    pub fn current_view(&self) -> View {
        self.current_view
    }

    pub fn is_changing(&self) -> bool {
        self.in_progress.is_some()
    }

    pub fn in_progress(&self) -> Option<View> {
        self.in_progress
    }

    pub fn record_heartbeat(&mut self, now: Duration) {
        self.last_heartbeat = self.last_heartbeat.max(now);
    }

    pub fn heartbeat_expired(&self, now: Duration) -> bool {
        match self.heartbeat_timeout {
            Some(timeout) => now.saturating_sub(self.last_heartbeat) > timeout,
            None => false,
        }
    }

    /// Whether completing `round` exhausts the current view's quota.
    pub fn round_quota_reached(&self, round: RoundNumber) -> bool {
        self.rounds_per_view > 0 && round.0 > 0 && round.0 % self.rounds_per_view == 0
    }

    /// Next view to aim for after a heartbeat loss, escalating past
    /// earlier attempts. Restarts the heartbeat clock so the next
    /// escalation waits a full timeout.
    pub fn escalate(&mut self, now: Duration) -> View {
        let target = match self.attempted {
            Some(previous) if previous > self.current_view => previous.next(),
            _ => self.current_view.next(),
        };
        self.attempted = Some(target);
        self.last_heartbeat = now;
        debug!(current = %self.current_view, target = %target, "Heartbeat lost, escalating view change");
        target
    }

    /// Start a view change this node will drive.
    pub fn try_begin(&mut self, target: View) -> Result<(), CosiError> {
        if target <= self.current_view {
            return Err(CosiError::StaleView {
                message_view: target,
                current_view: self.current_view,
            });
        }
        if let Some(running) = self.in_progress {
            return Err(CosiError::ViewChangeInProgress { target: running });
        }
        self.in_progress = Some(target);
        info!(current = %self.current_view, target = %target, "Initiating view change");
        Ok(())
    }

    /// Give up on the running view change (its voting round failed).
    pub fn abort(&mut self) {
        if let Some(target) = self.in_progress.take() {
            info!(target = %target, "View change aborted");
        }
    }

    /// Install a confirmed view. Returns `false` if `view` is not newer.
    pub fn complete(&mut self, view: View, now: Duration) -> bool {
        if view <= self.current_view {
            return false;
        }
        info!(from = %self.current_view, to = %view, "View changed");
        self.current_view = view;
        if self.in_progress.is_some_and(|target| target <= view) {
            self.in_progress = None;
        }
        self.attempted = None;
        self.last_heartbeat = now;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_expiry() {
        let mut vc = ViewChangeManager::new(View(0), Some(Duration::from_secs(1)), 0);
        vc.record_heartbeat(Duration::from_millis(500));
        assert!(!vc.heartbeat_expired(Duration::from_millis(1400)));
        assert!(vc.heartbeat_expired(Duration::from_millis(1600)));

        let disabled = ViewChangeManager::new(View(0), None, 0);
        assert!(!disabled.heartbeat_expired(Duration::from_secs(1000)));
    }

    #[test]
    fn test_round_quota() {
        let vc = ViewChangeManager::new(View(0), None, 3);
        assert!(!vc.round_quota_reached(RoundNumber(2)));
        assert!(vc.round_quota_reached(RoundNumber(3)));
        assert!(vc.round_quota_reached(RoundNumber(6)));
        assert!(!ViewChangeManager::new(View(0), None, 0).round_quota_reached(RoundNumber(3)));
    }

    #[test]
    fn test_concurrent_change_rejected() {
        let mut vc = ViewChangeManager::new(View(0), None, 0);
        vc.try_begin(View(1)).unwrap();
        assert!(vc.is_changing());
        assert_eq!(
            vc.try_begin(View(2)),
            Err(CosiError::ViewChangeInProgress { target: View(1) })
        );
    }

    #[test]
    fn test_stale_target_rejected() {
        let mut vc = ViewChangeManager::new(View(3), None, 0);
        assert!(matches!(vc.try_begin(View(3)), Err(CosiError::StaleView { .. })));
    }

    #[test]
    fn test_views_strictly_increase() {
        let mut vc = ViewChangeManager::new(View(0), None, 0);
        vc.try_begin(View(1)).unwrap();
        assert!(vc.complete(View(1), Duration::ZERO));
        assert!(!vc.is_changing());
        assert!(!vc.complete(View(1), Duration::ZERO));
        assert!(!vc.complete(View(0), Duration::ZERO));
        assert_eq!(vc.current_view(), View(1));
    }

    #[test]
    fn test_escalation() {
        let mut vc = ViewChangeManager::new(View(4), Some(Duration::from_secs(1)), 0);
        assert_eq!(vc.escalate(Duration::from_secs(2)), View(5));
        assert_eq!(vc.escalate(Duration::from_secs(4)), View(6));
        assert!(!vc.heartbeat_expired(Duration::from_millis(4500)));

        vc.complete(View(5), Duration::from_secs(5));
        assert_eq!(vc.escalate(Duration::from_secs(7)), View(6));
    }

    #[test]
    fn test_abort_allows_retry() {
        let mut vc = ViewChangeManager::new(View(0), None, 0);
        vc.try_begin(View(1)).unwrap();
        vc.abort();
        assert!(vc.try_begin(View(1)).is_ok());
    }
}
