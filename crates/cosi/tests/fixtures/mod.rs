//! Synchronous in-memory cluster for engine tests.
//!
//! Delivers every message instantly. Time only moves when the next timer
//! is fired, so wait budgets elapse in deadline order.

#![allow(dead_code)]

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use treesig_core::{Action, Event, StateMachine, TimerId};
use treesig_cosi::{AcceptAll, CosiConfig, CosiNode, SharedVerifier};
use treesig_messages::MessageKind;
use treesig_types::{FinalSignature, NodeId, RoundNumber, Vote};
use treesig_test_helpers::TestRoster;

pub struct Cluster {
    pub roster: TestRoster,
    pub nodes: BTreeMap<NodeId, CosiNode>,
    events: VecDeque<(NodeId, Event)>,
    timers: Vec<(Duration, NodeId, TimerId)>,
    now: Duration,
    paused: BTreeSet<NodeId>,
    /// Messages dropped on the way to these nodes.
    deaf: BTreeSet<NodeId>,
    /// Message kinds dropped on the way to one node.
    filtered: BTreeSet<(NodeId, MessageKind)>,
    pub signatures: BTreeMap<NodeId, Vec<(FinalSignature, Option<bool>)>>,
    pub failures: BTreeMap<NodeId, Vec<(RoundNumber, String)>>,
    pub applied: BTreeMap<NodeId, Vec<Vote>>,
    pub shutdowns: BTreeSet<NodeId>,
    pub status: Vec<(u64, u32)>,
    pub sent: usize,
}

impl Cluster {
    pub fn new(size: usize, config: CosiConfig) -> Self {
        Self::with_verifiers(size, config, |_| Arc::new(AcceptAll))
    }

    pub fn with_verifiers(
        size: usize,
        config: CosiConfig,
        verifier_for: impl Fn(NodeId) -> SharedVerifier,
    ) -> Self {
        let roster = TestRoster::new(size, 42);
        let nodes = roster
            .node_ids()
            .into_iter()
            .map(|id| {
                let node = CosiNode::new(
                    id,
                    roster.keypair(id).clone(),
                    roster.roster().clone(),
                    config.clone(),
                    verifier_for(id),
                    roster.rng_for(id),
                )
                .expect("member of the roster");
                (id, node)
            })
            .collect();

        Self {
            roster,
            nodes,
            events: VecDeque::new(),
            timers: Vec::new(),
            now: Duration::ZERO,
            paused: BTreeSet::new(),
            deaf: BTreeSet::new(),
            filtered: BTreeSet::new(),
            signatures: BTreeMap::new(),
            failures: BTreeMap::new(),
            applied: BTreeMap::new(),
            shutdowns: BTreeSet::new(),
            status: Vec::new(),
            sent: 0,
        }
    }

    pub fn node(&self, id: u64) -> &CosiNode {
        &self.nodes[&NodeId(id)]
    }

    pub fn pause(&mut self, id: u64) {
        self.paused.insert(NodeId(id));
    }

    pub fn deafen(&mut self, id: u64) {
        self.deaf.insert(NodeId(id));
    }

    pub fn undeafen(&mut self, id: u64) {
        self.deaf.remove(&NodeId(id));
    }

    pub fn drop_kind(&mut self, to: u64, kind: MessageKind) {
        self.filtered.insert((NodeId(to), kind));
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn node_mut(&mut self, id: u64) -> &mut CosiNode {
        self.nodes.get_mut(&NodeId(id)).expect("node exists")
    }

    /// Root of the current view as seen by the first live node.
    pub fn root(&self) -> NodeId {
        let live = self
            .nodes
            .keys()
            .find(|id| !self.paused.contains(id))
            .copied()
            .unwrap_or(NodeId(0));
        self.nodes[&live].topology().root()
    }

    pub fn submit(&mut self, message: &[u8]) {
        let root = self.root();
        self.push(
            root,
            Event::SubmitProposal {
                message: message.to_vec(),
                data: Vec::new(),
            },
        );
    }

    pub fn push(&mut self, to: NodeId, event: Event) {
        self.events.push_back((to, event));
    }

    /// Deliver until no events remain (FIFO).
    pub fn run(&mut self) {
        while let Some((id, event)) = self.events.pop_front() {
            self.step(id, event);
        }
    }

    /// Deliver until no events remain, in a random order.
    pub fn run_shuffled(&mut self, rng: &mut ChaCha8Rng) {
        while !self.events.is_empty() {
            let index = rng.gen_range(0..self.events.len());
            if let Some((id, event)) = self.events.remove(index) {
                self.step(id, event);
            }
        }
    }

    /// Jump to the earliest timer deadline, fire every timer due then,
    /// and deliver. Returns `false` if no timer is pending.
    pub fn fire_next_timer(&mut self) -> bool {
        let Some(deadline) = self.timers.iter().map(|(at, _, _)| *at).min() else {
            return false;
        };
        self.now = self.now.max(deadline);
        let (due, rest): (Vec<_>, Vec<_>) =
            self.timers.drain(..).partition(|(at, _, _)| *at <= deadline);
        self.timers = rest;
        for (_, id, timer) in due {
            self.events.push_back((id, Event::from(timer)));
        }
        self.run();
        true
    }

    /// Run, firing timers until the cluster is quiet.
    pub fn settle(&mut self) {
        self.run();
        for _ in 0..64 {
            if !self.fire_next_timer() {
                return;
            }
        }
    }

    fn step(&mut self, id: NodeId, event: Event) {
        if self.paused.contains(&id) {
            return;
        }
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        node.set_time(self.now);
        let actions = node.handle(event);
        self.process(id, actions);
    }

    fn process(&mut self, id: NodeId, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Send { to, message } => {
                    self.sent += 1;
                    if !self.deaf.contains(&to) && !self.filtered.contains(&(to, message.kind())) {
                        self.events
                            .push_back((to, Event::MessageReceived { message }));
                    }
                }
                Action::SetTimer {
                    id: timer,
                    duration,
                } => {
                    self.timers.retain(|(_, n, t)| !(*n == id && *t == timer));
                    self.timers.push((self.now + duration, id, timer));
                }
                Action::CancelTimer { id: timer } => {
                    self.timers.retain(|(_, n, t)| !(*n == id && *t == timer));
                }
                Action::SpawnVotingRound { vote } => {
                    self.events
                        .push_back((id, Event::StartVotingRound { vote }));
                }
                Action::EmitSignature {
                    signature,
                    inclusion_verified,
                } => {
                    self.signatures
                        .entry(id)
                        .or_default()
                        .push((signature, inclusion_verified));
                }
                Action::RoundFailed { round, reason } => {
                    self.failures.entry(id).or_default().push((round, reason));
                }
                Action::VoteApplied { vote } => {
                    self.applied.entry(id).or_default().push(vote);
                }
                Action::StatusCollected { sweep, reachable } => {
                    self.status.push((sweep, reachable));
                }
                Action::Shutdown => {
                    self.shutdowns.insert(id);
                }
            }
        }
    }

    /// The last signature emitted at `id`.
    pub fn last_signature(&self, id: u64) -> Option<&FinalSignature> {
        self.signatures
            .get(&NodeId(id))
            .and_then(|s| s.last())
            .map(|(sig, _)| sig)
    }
}
