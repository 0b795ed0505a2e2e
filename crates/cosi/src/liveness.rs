//! Heartbeats, status sweeps and shutdown.

use crate::state::{CosiNode, StatusSweep};
use tracing::{debug, info, warn};
use treesig_core::{Action, TimerId};
use treesig_messages::{Payload, StatusConnections, StatusDirection};
use treesig_types::NodeId;

impl CosiNode {
    /// Root: sweep the tree, which doubles as the heartbeat. Others: check
    /// the parent is still alive and escalate a view change if not.
    pub(crate) fn on_heartbeat_timer(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        // A catch-up request unanswered for a whole interval backs nothing.
        if let (Some(index), Some(interval)) =
            (self.catch_up_outstanding, self.config.heartbeat_interval())
        {
            if self.now.saturating_sub(self.catch_up_requested_at) >= interval {
                debug!(node = %self.node_id, index = %index, "Catch-up request went unanswered");
                self.catch_up_outstanding = None;
                actions.extend(self.retract_vote_claims());
            }
        }

        if self.is_root() {
            actions.extend(self.start_sweep());
        } else if self.view_change.heartbeat_expired(self.now) {
            let target = self.view_change.escalate(self.now);
            warn!(
                node = %self.node_id,
                view = %self.view(),
                target = %target,
                "Parent heartbeat lost"
            );
            actions.extend(self.initiate_view_change(target));
        }

        if let Some(interval) = self.config.heartbeat_interval() {
            actions.push(Action::SetTimer {
                id: TimerId::Heartbeat,
                duration: interval,
            });
        }
        actions
    }

    pub(crate) fn on_query_status(&mut self) -> Vec<Action> {
        if !self.is_root() {
            debug!(node = %self.node_id, "Status query at a non-root node");
            return vec![];
        }
        self.start_sweep()
    }

    fn start_sweep(&mut self) -> Vec<Action> {
        let sweep = self.next_sweep;
        self.next_sweep += 1;
        self.begin_sweep(sweep, None)
    }

    fn begin_sweep(&mut self, sweep: u64, report_to: Option<NodeId>) -> Vec<Action> {
        let children = self.topology.children(self.node_id).to_vec();
        let view = self.view();
        let request = StatusConnections {
            sweep,
            direction: StatusDirection::Request,
        };
        let mut actions: Vec<Action> = children
            .iter()
            .map(|child| self.send(*child, view, Payload::StatusConnections(request)))
            .collect();

        let leaf = children.is_empty();
        self.sweeps.insert(
            sweep,
            StatusSweep {
                pending: children,
                reachable: 1,
                report_to,
            },
        );

        if leaf {
            actions.extend(self.finish_sweep(sweep));
        } else {
            let height = self.topology.height(self.node_id).unwrap_or(0);
            actions.push(Action::SetTimer {
                id: TimerId::StatusWait(sweep),
                duration: self.config.wait_budget(height),
            });
        }
        actions
    }

    pub(crate) fn on_status(&mut self, from: NodeId, status: StatusConnections) -> Vec<Action> {
        match status.direction {
            StatusDirection::Request => {
                if self.topology.parent(self.node_id) != Some(from) {
                    debug!(from = %from, "Status request from a non-parent");
                    return vec![];
                }
                self.begin_sweep(status.sweep, Some(from))
            }
            StatusDirection::Report { reachable } => {
                let Some(sweep) = self.sweeps.get_mut(&status.sweep) else {
                    return vec![];
                };
                let Some(position) = sweep.pending.iter().position(|c| *c == from) else {
                    return vec![];
                };
                sweep.pending.swap_remove(position);
                sweep.reachable += reachable;
                if sweep.pending.is_empty() {
                    self.finish_sweep(status.sweep)
                } else {
                    vec![]
                }
            }
        }
    }

    pub(crate) fn on_status_timer(&mut self, sweep: u64) -> Vec<Action> {
        if let Some(state) = self.sweeps.get(&sweep) {
            debug!(sweep, silent = ?state.pending, "Status wait elapsed");
        }
        self.finish_sweep(sweep)
    }

    fn finish_sweep(&mut self, sweep: u64) -> Vec<Action> {
        let Some(state) = self.sweeps.remove(&sweep) else {
            return vec![];
        };
        let mut actions = vec![Action::CancelTimer {
            id: TimerId::StatusWait(sweep),
        }];
        match state.report_to {
            Some(parent) => {
                let report = StatusConnections {
                    sweep,
                    direction: StatusDirection::Report {
                        reachable: state.reachable,
                    },
                };
                actions.push(self.send(parent, self.view(), Payload::StatusConnections(report)));
            }
            None => {
                debug!(sweep, reachable = state.reachable, "Status sweep collected");
                actions.push(Action::StatusCollected {
                    sweep,
                    reachable: state.reachable,
                });
            }
        }
        actions
    }

    /// Tear the node down, children first.
    pub(crate) fn close(&mut self, reason: &str) -> Vec<Action> {
        if self.closed {
            return vec![];
        }
        info!(node = %self.node_id, reason, "Closing node");

        let view = self.view();
        let mut actions: Vec<Action> = self
            .topology
            .children(self.node_id)
            .iter()
            .map(|child| self.send(*child, view, Payload::CloseAll))
            .collect();

        for number in self.rounds.keys() {
            actions.push(Action::CancelTimer {
                id: TimerId::CommitWait(*number),
            });
            actions.push(Action::CancelTimer {
                id: TimerId::ResponseWait(*number),
            });
        }
        for sweep in self.sweeps.keys() {
            actions.push(Action::CancelTimer {
                id: TimerId::StatusWait(*sweep),
            });
        }
        actions.push(Action::CancelTimer {
            id: TimerId::Heartbeat,
        });

        self.rounds.clear();
        self.sweeps.clear();
        self.deferred.clear();
        self.closed = true;
        actions.push(Action::Shutdown);
        actions
    }
}
