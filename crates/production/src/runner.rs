//! Per-node tokio event loop.
//!
//! # Architecture
//!
//! ```text
//!  ┌───────────────────────────────────────────────────────────────┐
//!  │  Node task (one per node)                                     │
//!  │    loop {                                                     │
//!  │      event = select!(biased; cancel, timers, local, inbox);   │
//!  │      actions = node.handle(event);                            │
//!  │      execute(actions);                                        │
//!  │    }                                                          │
//!  └───────────────────────────────────────────────────────────────┘
//!        ↑ timers (TimerManager sleep tasks)
//!        ↑ local  (client commands, background voting tasks)
//!        ↑ inbox  (wire bytes from the ChannelHub)
//! ```
//!
//! The loop is the only owner of the [`CosiNode`], so protocol state is
//! never shared. Voting rounds are started from a background task that
//! feeds `StartVotingRound` back through the local channel; the task is
//! cancelled with the node.

use crate::status::{Delivered, NodeSnapshot};
use crate::timers::TimerManager;
use crate::transport::{ChannelTransport, Inbox};
use arc_swap::ArcSwap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use treesig_core::{Action, Event, StateMachine, TimerId, TimerScheduler};
use treesig_cosi::{CosiError, CosiNode};
use treesig_network::{decode_message, Transport};
use treesig_types::{NodeId, VoteKind};

/// Errors from the production runner.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Node {0} has stopped")]
    NodeStopped(NodeId),

    #[error("Unknown node {0}")]
    UnknownNode(NodeId),

    #[error("No running node")]
    NoLiveNode,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Cosi(#[from] CosiError),
}

/// Why a node loop exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeExit {
    /// The protocol shut the node down (CloseAll or transport closure).
    Closed,
    /// The node was cancelled from outside.
    Cancelled,
}

// ═══════════════════════════════════════════════════════════════════════════
// Handle
// ═══════════════════════════════════════════════════════════════════════════

/// Caller-side handle on a running node.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    id: NodeId,
    local_tx: mpsc::UnboundedSender<Event>,
    signatures: watch::Receiver<Option<Delivered>>,
    status: Arc<ArcSwap<NodeSnapshot>>,
    cancel: CancellationToken,
}

impl NodeHandle {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Ask this node to start a round. Only the root of the current view
    /// accepts proposals.
    pub fn submit(&self, message: impl Into<Vec<u8>>, data: impl Into<Vec<u8>>) -> Result<(), RunnerError> {
        self.send(Event::SubmitProposal {
            message: message.into(),
            data: data.into(),
        })
    }

    /// Propose a membership or view change.
    pub fn propose(&self, kind: VoteKind) -> Result<(), RunnerError> {
        self.send(Event::ProposeChange { kind })
    }

    /// Start a status sweep (root only).
    pub fn query_status(&self) -> Result<(), RunnerError> {
        self.send(Event::QueryStatus)
    }

    /// Shut this node and its subtree down.
    pub fn close_all(&self) -> Result<(), RunnerError> {
        self.send(Event::CloseAll)
    }

    /// Stop the node abruptly, as if the process died. Nothing is sent to
    /// its neighbours.
    pub fn kill(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.status.load().stopped
    }

    pub fn status(&self) -> Arc<NodeSnapshot> {
        self.status.load_full()
    }

    /// The last signature this node delivered.
    pub fn latest_signature(&self) -> Option<Delivered> {
        self.signatures.borrow().clone()
    }

    /// A watcher that only reports signatures delivered from now on.
    pub fn signatures(&self) -> SignatureWatch {
        let mut rx = self.signatures.clone();
        rx.borrow_and_update();
        SignatureWatch { node: self.id, rx }
    }

    fn send(&self, event: Event) -> Result<(), RunnerError> {
        self.local_tx
            .send(event)
            .map_err(|_| RunnerError::NodeStopped(self.id))
    }
}

/// Single-slot signature notification.
///
/// Only the newest signature is kept; a slow reader skips intermediate ones.
#[derive(Debug)]
pub struct SignatureWatch {
    node: NodeId,
    rx: watch::Receiver<Option<Delivered>>,
}

impl SignatureWatch {
    /// Wait for the next delivered signature.
    pub async fn next(&mut self, timeout: Duration) -> Result<Delivered, RunnerError> {
        let deadline = Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.rx.changed()).await {
                Err(_) => return Err(RunnerError::Timeout(timeout)),
                Ok(Err(_)) => return Err(RunnerError::NodeStopped(self.node)),
                Ok(Ok(())) => {
                    if let Some(delivered) = self.rx.borrow_and_update().clone() {
                        return Ok(delivered);
                    }
                }
            }
        }
    }

    /// Wait for a signature over `message`, skipping others (such as the
    /// signatures of voting rounds).
    pub async fn next_for(
        &mut self,
        message: &[u8],
        timeout: Duration,
    ) -> Result<Delivered, RunnerError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let delivered = self.next(remaining).await.map_err(|e| match e {
                RunnerError::Timeout(_) => RunnerError::Timeout(timeout),
                other => other,
            })?;
            if delivered.signature.message == message {
                return Ok(delivered);
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Loop
// ═══════════════════════════════════════════════════════════════════════════

/// Start `node`'s loop on the current runtime.
pub fn spawn_node(
    node: CosiNode,
    transport: ChannelTransport,
    inbox: Inbox,
) -> (NodeHandle, JoinHandle<NodeExit>) {
    let id = node.node_id();
    let (timer_tx, timer_rx) = mpsc::unbounded_channel();
    let (local_tx, local_rx) = mpsc::unbounded_channel();
    let (signature_tx, signature_rx) = watch::channel(None);
    let snapshot = NodeSnapshot::new(node.status(), node.topology().root());
    let status = Arc::new(ArcSwap::from_pointee(snapshot.clone()));
    let cancel = CancellationToken::new();

    let handle = NodeHandle {
        id,
        local_tx: local_tx.clone(),
        signatures: signature_rx,
        status: Arc::clone(&status),
        cancel: cancel.clone(),
    };

    let node_loop = NodeLoop {
        node,
        transport,
        timers: TimerManager::new(timer_tx),
        timer_rx,
        local_tx,
        local_rx,
        inbox,
        signature_tx,
        snapshot,
        status,
        cancel,
        voting_tasks: Vec::new(),
        started: Instant::now(),
    };
    let task = tokio::spawn(node_loop.run());
    (handle, task)
}

struct NodeLoop {
    node: CosiNode,
    transport: ChannelTransport,
    timers: TimerManager,
    timer_rx: mpsc::UnboundedReceiver<TimerId>,
    local_tx: mpsc::UnboundedSender<Event>,
    local_rx: mpsc::UnboundedReceiver<Event>,
    inbox: Inbox,
    signature_tx: watch::Sender<Option<Delivered>>,
    /// Loop-local copy of the published snapshot.
    snapshot: NodeSnapshot,
    status: Arc<ArcSwap<NodeSnapshot>>,
    cancel: CancellationToken,
    voting_tasks: Vec<JoinHandle<()>>,
    started: Instant,
}

impl NodeLoop {
    async fn run(mut self) -> NodeExit {
        let id = self.node.node_id();
        info!(node = %id, view = %self.node.view(), root = %self.node.topology().root(), "Node started");

        let startup = self.node.startup_actions();
        self.execute(startup);
        self.publish();

        let exit = loop {
            let event = tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break NodeExit::Cancelled,

                Some(timer) = self.timer_rx.recv() => Event::from(timer),

                Some(event) = self.local_rx.recv() => event,

                bytes = self.inbox.recv() => match bytes {
                    Some(bytes) => match decode_message(&bytes) {
                        Ok(message) => Event::MessageReceived { message },
                        Err(e) => {
                            warn!(node = %id, error = %e, "Dropping undecodable envelope");
                            continue;
                        }
                    },
                    None => Event::TransportClosed,
                },
            };

            self.step(event);
            if self.node.is_closed() {
                break NodeExit::Closed;
            }
        };

        self.shutdown(exit);
        exit
    }

    fn step(&mut self, event: Event) {
        trace!(node = %self.node.node_id(), event = event.type_name(), "Handling event");
        self.node.set_time(self.started.elapsed());
        let actions = self.node.handle(event);
        self.execute(actions);
        self.publish();
    }

    fn execute(&mut self, actions: Vec<Action>) {
        for action in actions {
            self.execute_one(action);
        }
    }

    fn execute_one(&mut self, action: Action) {
        let id = self.node.node_id();
        match action {
            Action::Send { to, message } => {
                if let Err(e) = self.transport.send(to, &message) {
                    // An unreachable child becomes an exception once its
                    // wait budget runs out.
                    debug!(node = %id, to = %to, kind = %message.kind(), error = %e, "Send failed");
                    self.snapshot.send_failures += 1;
                }
            }

            Action::SetTimer { id: timer, duration } => self.timers.set_timer(timer, duration),

            Action::CancelTimer { id: timer } => self.timers.cancel_timer(timer),

            Action::SpawnVotingRound { vote } => {
                self.voting_tasks.retain(|task| !task.is_finished());
                let local_tx = self.local_tx.clone();
                let cancel = self.cancel.child_token();
                debug!(node = %id, index = %vote.index, "Spawning voting task");
                self.voting_tasks.push(tokio::spawn(async move {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            debug!(index = %vote.index, "Voting task cancelled");
                        }
                        _ = tokio::task::yield_now() => {
                            let _ = local_tx.send(Event::StartVotingRound { vote });
                        }
                    }
                }));
            }

            Action::EmitSignature {
                signature,
                inclusion_verified,
            } => {
                info!(
                    node = %id,
                    round = %signature.round,
                    view = %signature.view,
                    exceptions = signature.exceptions.len(),
                    "Signature delivered"
                );
                self.snapshot.signatures_delivered += 1;
                self.signature_tx.send_replace(Some(Delivered {
                    signature,
                    inclusion_verified,
                }));
            }

            Action::RoundFailed { round, reason } => {
                warn!(node = %id, round = %round, reason = %reason, "Round failed");
                self.snapshot.rounds_failed += 1;
                self.snapshot.last_failure = Some(reason);
            }

            Action::VoteApplied { vote } => {
                info!(node = %id, index = %vote.index, target = %vote.kind.target(), "Vote applied");
                self.snapshot.votes_applied += 1;
            }

            Action::StatusCollected { sweep, reachable } => {
                debug!(node = %id, sweep, reachable, "Status sweep collected");
                self.snapshot.last_reachable = Some(reachable);
            }

            Action::Shutdown => {
                // Children were already told; the loop exits after this step.
                self.transport.close();
            }
        }
    }

    fn publish(&mut self) {
        self.snapshot.protocol = self.node.status();
        self.snapshot.root = self.node.topology().root();
        self.status.store(Arc::new(self.snapshot.clone()));
    }

    fn shutdown(&mut self, exit: NodeExit) {
        self.cancel.cancel();
        self.timers.cancel_all();
        for task in self.voting_tasks.drain(..) {
            task.abort();
        }
        self.transport.close();
        self.snapshot.stopped = true;
        self.publish();
        info!(node = %self.node.node_id(), exit = ?exit, "Node stopped");
    }
}
