//! Deterministic simulation runner.
//!
//! Every node is a [`CosiNode`] driven by one global event queue. Network
//! sends are scheduled with sampled latency, timers are queue entries that
//! can be cancelled, and background voting tasks are modelled as a short
//! internal delay before `StartVotingRound` reaches the node.

use crate::event_queue::EventKey;
use crate::network::{NetworkConfig, SimulatedNetwork};
use rand::SeedableRng;
use rand_chacha::{ChaCha20Rng, ChaCha8Rng};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use treesig_core::{Action, Event, StateMachine, TimerId};
use treesig_cosi::{AcceptAll, CosiConfig, CosiError, CosiNode, SharedVerifier};
use treesig_messages::SigningMessage;
use treesig_types::{FinalSignature, KeyPair, Member, NodeId, PublicKey, Roster, RoundNumber, Vote};

/// Delay between a node asking for a voting round and the background task
/// feeding it back.
const VOTING_TASK_DELAY: Duration = Duration::from_millis(1);

/// A signature as seen by one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredSignature {
    /// Simulated time of delivery.
    pub at: Duration,
    pub signature: FinalSignature,
    pub inclusion_verified: Option<bool>,
}

/// Statistics collected during simulation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SimulationStats {
    /// Total events processed.
    pub events_processed: u64,
    /// Events processed by priority.
    pub events_by_priority: [u64; 4],
    /// Total actions generated.
    pub actions_generated: u64,
    /// Messages sent (successfully scheduled for delivery).
    pub messages_sent: u64,
    /// Encoded envelope bytes, when the codec roundtrip is enabled.
    pub bytes_sent: u64,
    /// Messages dropped due to network partition.
    pub messages_dropped_partition: u64,
    /// Messages dropped due to packet loss.
    pub messages_dropped_loss: u64,
    /// Events discarded because their node was paused or shut down.
    pub events_dropped_paused: u64,
    /// Timers set.
    pub timers_set: u64,
    /// Timers cancelled.
    pub timers_cancelled: u64,
    /// Voting rounds handed to background tasks.
    pub voting_tasks_spawned: u64,
}

impl SimulationStats {
    /// Total messages dropped (partition + packet loss).
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped_partition + self.messages_dropped_loss
    }

    /// Message delivery rate (sent / (sent + dropped)).
    pub fn delivery_rate(&self) -> f64 {
        let total = self.messages_sent + self.messages_dropped();
        if total == 0 {
            1.0
        } else {
            self.messages_sent as f64 / total as f64
        }
    }
}

/// Deterministic simulation runner.
///
/// Processes events in deterministic order and executes actions.
/// Given the same seed, produces identical results every run.
pub struct SimulationRunner {
    nodes: BTreeMap<NodeId, CosiNode>,

    /// Initial signing set.
    roster: Roster,

    /// Global event queue, ordered deterministically.
    event_queue: BTreeMap<EventKey, Event>,

    /// Sequence counter for deterministic ordering.
    sequence: u64,

    /// Current simulation time.
    now: Duration,

    network: SimulatedNetwork,

    /// RNG for network conditions (seeded for determinism).
    rng: ChaCha8Rng,

    /// Timer registry for cancellation support.
    timers: HashMap<(NodeId, TimerId), EventKey>,

    stats: SimulationStats,

    signatures: BTreeMap<NodeId, Vec<DeliveredSignature>>,
    failures: Vec<(NodeId, RoundNumber, String)>,
    applied_votes: BTreeMap<NodeId, Vec<Vote>>,
    status_reports: Vec<(NodeId, u64, u32)>,
    shut_down: BTreeSet<NodeId>,
}

impl std::fmt::Debug for SimulationRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationRunner")
            .field("nodes", &self.nodes.len())
            .field("now", &self.now)
            .field("queued", &self.event_queue.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl SimulationRunner {
    /// Create `size` nodes that accept every proposal.
    pub fn new(
        size: usize,
        cosi_config: CosiConfig,
        network_config: NetworkConfig,
        seed: u64,
    ) -> Result<Self, CosiError> {
        Self::with_verifiers(size, cosi_config, network_config, seed, |_| {
            Arc::new(AcceptAll)
        })
    }

    /// Create `size` nodes, asking `verifier_for` for each node's hook.
    pub fn with_verifiers(
        size: usize,
        cosi_config: CosiConfig,
        network_config: NetworkConfig,
        seed: u64,
        verifier_for: impl Fn(NodeId) -> SharedVerifier,
    ) -> Result<Self, CosiError> {
        let keys: Vec<KeyPair> = (0..size).map(|i| keypair_for(seed, i as u64)).collect();
        let roster = Roster::new(
            keys.iter()
                .enumerate()
                .map(|(i, kp)| Member {
                    node_id: NodeId(i as u64),
                    public_key: kp.public_key(),
                })
                .collect(),
        );

        let mut nodes = BTreeMap::new();
        for (i, kp) in keys.into_iter().enumerate() {
            let id = NodeId(i as u64);
            let rng = ChaCha20Rng::seed_from_u64(seed ^ (i as u64).wrapping_mul(0x9e3779b97f4a7c15));
            let node = CosiNode::new(
                id,
                kp,
                roster.clone(),
                cosi_config.clone(),
                verifier_for(id),
                rng,
            )?;
            nodes.insert(id, node);
        }

        info!(nodes = size, seed, "Created simulation");

        let mut runner = Self {
            nodes,
            roster,
            event_queue: BTreeMap::new(),
            sequence: 0,
            now: Duration::ZERO,
            network: SimulatedNetwork::new(network_config),
            rng: ChaCha8Rng::seed_from_u64(seed),
            timers: HashMap::new(),
            stats: SimulationStats::default(),
            signatures: BTreeMap::new(),
            failures: Vec::new(),
            applied_votes: BTreeMap::new(),
            status_reports: Vec::new(),
            shut_down: BTreeSet::new(),
        };

        let ids: Vec<NodeId> = runner.nodes.keys().copied().collect();
        for id in ids {
            runner.start_node(id);
        }
        Ok(runner)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn node(&self, id: NodeId) -> Option<&CosiNode> {
        self.nodes.get(&id)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn public_keys(&self) -> Vec<PublicKey> {
        self.roster.public_keys()
    }

    pub fn network(&self) -> &SimulatedNetwork {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut SimulatedNetwork {
        &mut self.network
    }

    /// Signatures delivered at `id`, oldest first.
    pub fn signatures(&self, id: NodeId) -> &[DeliveredSignature] {
        self.signatures.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn last_signature(&self, id: NodeId) -> Option<&FinalSignature> {
        self.signatures(id).last().map(|d| &d.signature)
    }

    /// Rounds the root discarded: `(root, round, reason)`.
    pub fn failures(&self) -> &[(NodeId, RoundNumber, String)] {
        &self.failures
    }

    pub fn applied_votes(&self, id: NodeId) -> &[Vote] {
        self.applied_votes.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Finished status sweeps: `(root, sweep, reachable)`.
    pub fn status_reports(&self) -> &[(NodeId, u64, u32)] {
        &self.status_reports
    }

    pub fn is_shut_down(&self, id: NodeId) -> bool {
        self.shut_down.contains(&id)
    }

    /// Root of the current view as seen by the lowest live node.
    pub fn current_root(&self) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|(id, _)| !self.network.is_paused(**id) && !self.shut_down.contains(*id))
            .map(|(_, node)| node.topology().root())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Driving the simulation
    // ═══════════════════════════════════════════════════════════════════════

    /// Freeze a node: pending and future events to it are discarded.
    pub fn pause(&mut self, id: NodeId) {
        debug!(node = %id, time = ?self.now, "Pausing node");
        self.network.pause(id);
    }

    /// Unfreeze a node and restart its periodic timers.
    pub fn resume(&mut self, id: NodeId) {
        if self.network.resume(id) {
            debug!(node = %id, time = ?self.now, "Resuming node");
            self.start_node(id);
        }
    }

    /// Submit `message` to the current root, now.
    pub fn submit(&mut self, message: &[u8]) {
        let Some(root) = self.current_root() else {
            warn!("No live node to submit to");
            return;
        };
        self.schedule_initial_event(
            root,
            Duration::ZERO,
            Event::SubmitProposal {
                message: message.to_vec(),
                data: Vec::new(),
            },
        );
    }

    /// Schedule an event for `node`, `delay` after the current time.
    pub fn schedule_initial_event(&mut self, node: NodeId, delay: Duration, event: Event) {
        let time = self.now + delay;
        self.schedule_event(node, time, event);
    }

    /// Run simulation until no more events or time limit reached.
    pub fn run_until(&mut self, end_time: Duration) {
        trace!(end_time_secs = end_time.as_secs_f64(), "Running simulation step");

        while let Some((&key, _)) = self.event_queue.first_key_value() {
            if key.time > end_time {
                debug!(remaining_events = self.event_queue.len(), "Time limit reached");
                break;
            }
            let Some(event) = self.event_queue.remove(&key) else {
                break;
            };
            self.now = key.time;
            let node_id = key.node;

            if let Some(timer) = timer_of(&event) {
                if self.timers.get(&(node_id, timer)) == Some(&key) {
                    self.timers.remove(&(node_id, timer));
                }
            }

            if self.network.is_paused(node_id) || self.shut_down.contains(&node_id) {
                self.stats.events_dropped_paused += 1;
                trace!(node = %node_id, event = event.type_name(), "Dropping event for inactive node");
                continue;
            }

            self.stats.events_processed += 1;
            self.stats.events_by_priority[event.priority() as usize] += 1;

            let Some(node) = self.nodes.get_mut(&node_id) else {
                continue;
            };
            node.set_time(self.now);
            let actions = node.handle(event);
            self.stats.actions_generated += actions.len() as u64;

            for action in actions {
                self.process_action(node_id, action);
            }
        }

        if self.now < end_time {
            self.now = end_time;
        }

        trace!(
            events_processed = self.stats.events_processed,
            actions_generated = self.stats.actions_generated,
            final_time = ?self.now,
            "Simulation step complete"
        );
    }

    /// Run for `duration` past the current time.
    pub fn run_for(&mut self, duration: Duration) {
        let end = self.now + duration;
        self.run_until(end);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Actions
    // ═══════════════════════════════════════════════════════════════════════

    fn process_action(&mut self, from: NodeId, action: Action) {
        match action {
            Action::Send { to, message } => self.try_deliver(from, to, message),

            Action::SetTimer { id, duration } => {
                if let Some(old) = self.timers.remove(&(from, id)) {
                    self.event_queue.remove(&old);
                }
                let key =
                    self.schedule_event(from, self.now.saturating_add(duration), Event::from(id));
                self.timers.insert((from, id), key);
                self.stats.timers_set += 1;
            }

            Action::CancelTimer { id } => {
                if let Some(key) = self.timers.remove(&(from, id)) {
                    self.event_queue.remove(&key);
                    self.stats.timers_cancelled += 1;
                }
            }

            Action::SpawnVotingRound { vote } => {
                self.stats.voting_tasks_spawned += 1;
                trace!(node = %from, index = %vote.index, "Spawning voting task");
                self.schedule_event(
                    from,
                    self.now + VOTING_TASK_DELAY,
                    Event::StartVotingRound { vote },
                );
            }

            Action::EmitSignature {
                signature,
                inclusion_verified,
            } => {
                trace!(node = %from, round = %signature.round, "Signature delivered");
                self.signatures
                    .entry(from)
                    .or_default()
                    .push(DeliveredSignature {
                        at: self.now,
                        signature,
                        inclusion_verified,
                    });
            }

            Action::RoundFailed { round, reason } => {
                debug!(node = %from, round = %round, reason = %reason, "Round failed");
                self.failures.push((from, round, reason));
            }

            Action::VoteApplied { vote } => {
                self.applied_votes.entry(from).or_default().push(vote);
            }

            Action::StatusCollected { sweep, reachable } => {
                self.status_reports.push((from, sweep, reachable));
            }

            Action::Shutdown => {
                debug!(node = %from, "Node shut down");
                self.shut_down.insert(from);
            }
        }
    }

    fn start_node(&mut self, id: NodeId) {
        let actions = match self.nodes.get(&id) {
            Some(node) => node.startup_actions(),
            None => return,
        };
        for action in actions {
            self.process_action(id, action);
        }
    }

    fn schedule_event(&mut self, node: NodeId, time: Duration, event: Event) -> EventKey {
        self.sequence += 1;
        let key = EventKey::new(time, &event, node, self.sequence);
        self.event_queue.insert(key, event);
        key
    }

    /// Deliver an envelope, accounting for partitions and packet loss.
    fn try_deliver(&mut self, from: NodeId, to: NodeId, message: SigningMessage) {
        // Partition check first: deterministic, doesn't consume RNG.
        if self.network.is_partitioned(from, to) {
            self.stats.messages_dropped_partition += 1;
            trace!(from = %from, to = %to, kind = %message.kind(), "Message dropped due to partition");
            return;
        }

        if self.network.should_drop_packet(&mut self.rng) {
            self.stats.messages_dropped_loss += 1;
            trace!(from = %from, to = %to, kind = %message.kind(), "Message dropped due to packet loss");
            return;
        }

        let message = if self.network.codec_roundtrip() {
            match self.wire_roundtrip(&message) {
                Some(decoded) => decoded,
                None => return,
            }
        } else {
            message
        };

        let arrival = self.network.arrival_time(from, to, self.now, &mut self.rng);
        self.schedule_event(to, arrival, Event::MessageReceived { message });
        self.stats.messages_sent += 1;
    }

    fn wire_roundtrip(&mut self, message: &SigningMessage) -> Option<SigningMessage> {
        let bytes = match treesig_network::encode_message(message) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, kind = %message.kind(), "Failed to encode envelope");
                return None;
            }
        };
        self.stats.bytes_sent += bytes.len() as u64;
        match treesig_network::decode_message(&bytes) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!(error = %e, kind = %message.kind(), "Failed to decode envelope");
                None
            }
        }
    }
}

/// Deterministic key pair of the `index`-th simulated node.
fn keypair_for(seed: u64, index: u64) -> KeyPair {
    let mut seed_bytes = [0u8; 32];
    let key_seed = seed.wrapping_add(index).wrapping_mul(0x517cc1b727220a95);
    seed_bytes[..8].copy_from_slice(&key_seed.to_le_bytes());
    seed_bytes[8..16].copy_from_slice(&index.to_le_bytes());
    seed_bytes[16..24].copy_from_slice(&seed.to_le_bytes());
    KeyPair::from_seed(&seed_bytes)
}

fn timer_of(event: &Event) -> Option<TimerId> {
    match event {
        Event::CommitTimer { round } => Some(TimerId::CommitWait(*round)),
        Event::ResponseTimer { round } => Some(TimerId::ResponseWait(*round)),
        Event::HeartbeatTimer => Some(TimerId::Heartbeat),
        Event::StatusTimer { sweep } => Some(TimerId::StatusWait(*sweep)),
        _ => None,
    }
}
