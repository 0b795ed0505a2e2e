//! Tokio-backed protocol timers.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;
use treesig_core::{TimerId, TimerScheduler};

/// Manages one sleep task per active timer.
///
/// A fired timer sends its id on the timer channel, which the node loop
/// polls ahead of network traffic. Setting a timer that is already running
/// replaces it.
pub struct TimerManager {
    timer_tx: mpsc::UnboundedSender<TimerId>,
    active: HashMap<TimerId, JoinHandle<()>>,
}

impl TimerManager {
    pub fn new(timer_tx: mpsc::UnboundedSender<TimerId>) -> Self {
        Self {
            timer_tx,
            active: HashMap::new(),
        }
    }

    /// Number of timers currently armed (fired timers are pruned lazily).
    pub fn active_count(&mut self) -> usize {
        self.active.retain(|_, handle| !handle.is_finished());
        self.active.len()
    }

    /// Abort every armed timer.
    pub fn cancel_all(&mut self) {
        for (_, handle) in self.active.drain() {
            handle.abort();
        }
    }
}

impl TimerScheduler for TimerManager {
    fn set_timer(&mut self, id: TimerId, duration: Duration) {
        if let Some(handle) = self.active.remove(&id) {
            handle.abort();
        }
        let timer_tx = self.timer_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            trace!(timer = ?id, "Timer fired");
            let _ = timer_tx.send(id);
        });
        self.active.insert(id, handle);
    }

    fn cancel_timer(&mut self, id: TimerId) {
        if let Some(handle) = self.active.remove(&id) {
            handle.abort();
        }
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
