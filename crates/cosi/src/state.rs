//! The collective signing node state machine.
//!
//! One `CosiNode` per tree member. It owns every per-round aggregation
//! record, the vote log and its cursor, and the view change manager, and
//! turns every input into a list of actions for the runner.
//!
//! # Message intake
//!
//! ```text
//! closed? ─▶ drop
//! catch-up kinds ─▶ handled directly (any view)
//! view < current ─▶ drop (stale)
//! sender role wrong for the message's view ─▶ drop (protocol violation)
//!   (a future view only needs a member sender while the node is behind)
//! accept the sender's last_seen_vote, at most one vote past what is held
//! view > current ∧ not caught up ─▶ park + CatchUpRequest to sender
//! dispatch(phase, kind) ─▶ Open | Apply | Ignore
//! ```

use crate::round::Round;
use crate::transition::{dispatch, expected_sender, Disposition, SenderRole};
use crate::verifier::SharedVerifier;
use crate::view_change::ViewChangeManager;
use crate::vote_log::{VoteCursor, VoteLog};
use crate::{CosiConfig, CosiError};
use rand_chacha::ChaCha20Rng;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, trace, warn};
use treesig_core::{Action, Event, StateMachine, TimerId};
use treesig_messages::{MessageKind, Payload, SigningMessage};
use treesig_types::{
    Hash, KeyPair, Member, MerkleProof, NodeId, Roster, RoundNumber, TreeTopology, View,
    VoteKind, VoteIndex,
};

/// Parked future-view messages kept per sender; older ones are evicted.
pub const MAX_DEFERRED_PER_SENDER: usize = 32;

/// Progress of one status sweep at one node.
#[derive(Debug, Clone)]
pub(crate) struct StatusSweep {
    /// Children that have not reported yet.
    pub pending: Vec<NodeId>,
    /// Nodes counted so far, including this one.
    pub reachable: u32,
    /// Whom to report to; `None` at the sweep's origin.
    pub report_to: Option<NodeId>,
}

/// Snapshot of a node's protocol counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStatus {
    pub node_id: NodeId,
    pub view: View,
    pub is_root: bool,
    pub last_seen_round: RoundNumber,
    pub last_applied_vote: VoteIndex,
    pub last_seen_vote: VoteIndex,
    pub active_rounds: usize,
    pub view_change_in_progress: bool,
    pub closed: bool,
}

/// Tree-structured collective signing node.
pub struct CosiNode {
    pub(crate) node_id: NodeId,
    pub(crate) keys: KeyPair,
    pub(crate) config: CosiConfig,

    /// Roster after every applied membership vote.
    pub(crate) roster: Roster,

    /// Topology of the current view.
    pub(crate) topology: Arc<TreeTopology>,

    /// Last topology built for a view other than the current one.
    pub(crate) other_topology: Option<Arc<TreeTopology>>,

    pub(crate) verifier: SharedVerifier,
    pub(crate) rng: ChaCha20Rng,

    pub(crate) rounds: BTreeMap<RoundNumber, Round>,

    /// Inclusion proofs of finished rounds, awaiting the signature.
    pub(crate) proofs: BTreeMap<(View, RoundNumber), (Hash, MerkleProof)>,

    pub(crate) last_seen_round: RoundNumber,

    /// Highest finished round. Every root numbers its own rounds, so
    /// retirement is ordered by view first.
    pub(crate) retired_round: (View, RoundNumber),

    pub(crate) vote_log: VoteLog,
    pub(crate) cursor: VoteCursor,
    pub(crate) view_change: ViewChangeManager,

    /// A membership voting round is running at this (root) node.
    pub(crate) vote_in_flight: bool,
    pub(crate) queued_changes: VecDeque<VoteKind>,

    /// Proposed members awaiting a confirmed `AddMember` vote.
    pub(crate) pending_members: BTreeMap<NodeId, Member>,

    /// Future-view messages parked until the cursor catches up, at most
    /// [`MAX_DEFERRED_PER_SENDER`] from each roster member.
    pub(crate) deferred: VecDeque<SigningMessage>,
    pub(crate) catch_up_outstanding: Option<VoteIndex>,
    pub(crate) catch_up_requested_at: Duration,

    pub(crate) sweeps: BTreeMap<u64, StatusSweep>,
    pub(crate) next_sweep: u64,

    pub(crate) closed: bool,
    pub(crate) now: Duration,
}

impl std::fmt::Debug for CosiNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CosiNode")
            .field("node_id", &self.node_id)
            .field("view", &self.view_change.current_view())
            .field("rounds", &self.rounds.len())
            .field("last_applied_vote", &self.cursor.last_applied())
            .field("now", &self.now)
            .finish()
    }
}

impl CosiNode {
    /// Create a node in view 0.
    ///
    /// # Arguments
    ///
    /// * `node_id` - This node's roster identity
    /// * `keys` - Signing key pair; its public key must match the roster entry
    /// * `roster` - Initial signing set
    /// * `config` - Protocol parameters
    /// * `verifier` - Hook deciding whether this node co-signs a proposal
    /// * `rng` - Nonce source
    pub fn new(
        node_id: NodeId,
        keys: KeyPair,
        roster: Roster,
        config: CosiConfig,
        verifier: SharedVerifier,
        rng: ChaCha20Rng,
    ) -> Result<Self, CosiError> {
        if !roster.contains(node_id) {
            return Err(CosiError::NotAMember(node_id));
        }
        let topology = Arc::new(TreeTopology::build(
            &roster,
            View(0),
            config.branching_factor,
        )?);

        Ok(Self {
            node_id,
            keys,
            view_change: ViewChangeManager::new(
                View(0),
                config.heartbeat_timeout,
                config.rounds_per_view,
            ),
            config,
            roster,
            topology,
            other_topology: None,
            verifier,
            rng,
            rounds: BTreeMap::new(),
            proofs: BTreeMap::new(),
            last_seen_round: RoundNumber(0),
            retired_round: (View(0), RoundNumber(0)),
            vote_log: VoteLog::new(),
            cursor: VoteCursor::new(),
            vote_in_flight: false,
            queued_changes: VecDeque::new(),
            pending_members: BTreeMap::new(),
            deferred: VecDeque::new(),
            catch_up_outstanding: None,
            catch_up_requested_at: Duration::ZERO,
            sweeps: BTreeMap::new(),
            next_sweep: 0,
            closed: false,
            now: Duration::ZERO,
        })
    }

    /// Actions to run once when the node starts.
    pub fn startup_actions(&self) -> Vec<Action> {
        match self.config.heartbeat_interval() {
            Some(interval) => vec![Action::SetTimer {
                id: TimerId::Heartbeat,
                duration: interval,
            }],
            None => Vec::new(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn view(&self) -> View {
        self.view_change.current_view()
    }

    pub fn topology(&self) -> &Arc<TreeTopology> {
        &self.topology
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn is_root(&self) -> bool {
        self.topology.is_root(self.node_id)
    }

    pub fn vote_log(&self) -> &VoteLog {
        &self.vote_log
    }

    pub fn cursor(&self) -> VoteCursor {
        self.cursor
    }

    pub fn pending_members(&self) -> impl Iterator<Item = &Member> {
        self.pending_members.values()
    }

    pub fn round(&self, number: RoundNumber) -> Option<&Round> {
        self.rounds.get(&number)
    }

    /// Future-view messages waiting for catch-up.
    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn config(&self) -> &CosiConfig {
        &self.config
    }

    /// Swap the verification hook. Rounds already open keep their decision.
    pub fn set_verifier(&mut self, verifier: SharedVerifier) {
        self.verifier = verifier;
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            node_id: self.node_id,
            view: self.view(),
            is_root: self.is_root(),
            last_seen_round: self.last_seen_round,
            last_applied_vote: self.cursor.last_applied(),
            last_seen_vote: self.cursor.last_seen(),
            active_rounds: self.rounds.len(),
            view_change_in_progress: self.view_change.is_changing(),
            closed: self.closed,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Helpers shared by the handlers
    // ═══════════════════════════════════════════════════════════════════════

    /// Wrap a payload in an envelope from this node.
    pub(crate) fn envelope(&self, view: View, payload: Payload) -> SigningMessage {
        SigningMessage::new(view, self.node_id, self.cursor.last_seen(), payload)
    }

    pub(crate) fn send(&self, to: NodeId, view: View, payload: Payload) -> Action {
        Action::Send {
            to,
            message: self.envelope(view, payload),
        }
    }

    /// Topology for `view`: the current one, or one built from the roster.
    pub(crate) fn topology_for(&mut self, view: View) -> Result<Arc<TreeTopology>, CosiError> {
        if view == self.topology.view() {
            return Ok(self.topology.clone());
        }
        if let Some(cached) = &self.other_topology {
            if cached.view() == view {
                return Ok(cached.clone());
            }
        }
        let built = Arc::new(TreeTopology::build(
            &self.roster,
            view,
            self.config.branching_factor,
        )?);
        self.other_topology = Some(built.clone());
        Ok(built)
    }

    fn sender_matches(&self, topology: &TreeTopology, from: NodeId, role: SenderRole) -> bool {
        let is_parent = topology.parent(self.node_id) == Some(from);
        let is_child = topology.is_child_of(from, self.node_id);
        match role {
            SenderRole::Parent => is_parent,
            SenderRole::Child => is_child,
            SenderRole::Neighbour => is_parent || is_child,
            SenderRole::Any => topology.roster().contains(from),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Message intake
    // ═══════════════════════════════════════════════════════════════════════

    pub(crate) fn on_message(&mut self, msg: SigningMessage) -> Vec<Action> {
        self.intake(msg, true)
    }

    /// `trust_claim` is false when replaying messages whose vote claims
    /// were just retracted.
    #[instrument(level = "trace", skip(self, msg), fields(
        node = %self.node_id,
        kind = %msg.kind(),
        from = %msg.from,
        view = %msg.view,
    ))]
    fn intake(&mut self, msg: SigningMessage, trust_claim: bool) -> Vec<Action> {
        if self.closed {
            trace!("Node closed, dropping message");
            return vec![];
        }

        let kind = msg.kind();
        match (kind, &msg.payload) {
            (MessageKind::CatchUpRequest, Payload::CatchUpRequest(req)) => {
                return self.on_catch_up_request(msg.from, req.index);
            }
            (MessageKind::CatchUpResponse, Payload::CatchUpResponse(resp)) => {
                return self.on_catch_up_response(
                    msg.from,
                    resp.index,
                    resp.vote.clone(),
                    msg.last_seen_vote,
                );
            }
            _ => {}
        }

        let current = self.view();
        if msg.view < current {
            debug!(
                error = %CosiError::StaleView { message_view: msg.view, current_view: current },
                "Dropping stale message"
            );
            return vec![];
        }

        let topology = match self.topology_for(msg.view) {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "No topology for message view");
                return vec![];
            }
        };

        // A future view may rest on membership votes not applied here yet,
        // so until the node catches up its sender only has to be a member.
        // The full role check runs again when the message is replayed.
        let role = expected_sender(kind);
        let role_ok = self.sender_matches(&topology, msg.from, role);
        let provisional = !role_ok
            && msg.view > current
            && self.roster.contains(msg.from)
            && msg.last_seen_vote > self.cursor.last_applied();
        if !role_ok && !provisional {
            warn!(
                error = %CosiError::ProtocolViolation {
                    from: msg.from,
                    kind,
                    view: msg.view,
                    expected: role,
                },
                "Dropping message"
            );
            return vec![];
        }

        if trust_claim {
            self.cursor
                .observe_claim(msg.last_seen_vote, self.vote_log.last_index());
        }

        if msg.view > current && !self.cursor.is_caught_up() && !self.is_next_vote(&msg) {
            return self.defer(msg);
        }
        if provisional {
            debug!(
                error = %CosiError::ProtocolViolation {
                    from: msg.from,
                    kind,
                    view: msg.view,
                    expected: role,
                },
                "Dropping message"
            );
            return vec![];
        }

        if topology.parent(self.node_id) == Some(msg.from) {
            self.view_change.record_heartbeat(self.now);
        }

        if let Some(round) = msg.round() {
            self.last_seen_round = self.last_seen_round.max(round);
        }

        // Round numbers restart with each root, so a round only answers to
        // messages of its own view.
        let phase = msg
            .round()
            .and_then(|r| self.rounds.get(&r))
            .filter(|r| r.view() == msg.view)
            .map(|r| r.phase());

        match dispatch(phase, kind) {
            Disposition::Ignore(reason) => {
                debug!(round = ?msg.round(), reason, "Ignoring message");
                vec![]
            }
            Disposition::Open | Disposition::Apply => self.apply_message(msg, topology),
        }
    }

    fn apply_message(&mut self, msg: SigningMessage, topology: Arc<TreeTopology>) -> Vec<Action> {
        let from = msg.from;
        let view = msg.view;
        match msg.payload {
            Payload::Announcement(announcement) => self.on_announcement(announcement, topology),
            Payload::Commitment(commitment) => self.on_commitment(from, commitment),
            Payload::Challenge(challenge) => self.on_challenge(challenge),
            Payload::Response(response) => self.on_response(from, response),
            Payload::Error(report) => self.on_error_report(from, report),
            Payload::GroupChange(change) => self.on_group_change(from, change.vote.kind),
            Payload::StatusConnections(status) => self.on_status(from, status),
            Payload::SignatureBroadcast(broadcast) => {
                self.on_signature_broadcast(from, view, broadcast, topology)
            }
            Payload::CloseAll => self.close("parent closed"),
            // Routed before dispatch.
            Payload::CatchUpRequest(_) | Payload::CatchUpResponse(_) => vec![],
        }
    }

    /// A signature broadcast carrying exactly the next vote is applied even
    /// when the node is behind, so a view change never needs a round trip.
    fn is_next_vote(&self, msg: &SigningMessage) -> bool {
        match &msg.payload {
            Payload::SignatureBroadcast(b) => b
                .vote
                .as_ref()
                .is_some_and(|v| v.index == self.cursor.last_applied().next()),
            _ => false,
        }
    }

    fn defer(&mut self, msg: SigningMessage) -> Vec<Action> {
        let error = CosiError::NotCaughtUp {
            last_seen: self.cursor.last_seen(),
            last_applied: self.cursor.last_applied(),
        };
        debug!(error = %error, kind = %msg.kind(), "Parking future-view message");

        let from = msg.from;
        let parked = self.deferred.iter().filter(|m| m.from == from).count();
        if parked >= MAX_DEFERRED_PER_SENDER {
            if let Some(oldest) = self.deferred.iter().position(|m| m.from == from) {
                trace!(from = %from, "Parking limit reached, evicting oldest message");
                self.deferred.remove(oldest);
            }
        }
        self.deferred.push_back(msg);
        self.request_missing_vote(from).into_iter().collect()
    }

    /// Drop parked messages the current view has overtaken.
    pub(crate) fn purge_deferred(&mut self) {
        let view = self.view();
        let before = self.deferred.len();
        self.deferred.retain(|m| m.view >= view);
        if self.deferred.len() < before {
            debug!(
                dropped = before - self.deferred.len(),
                "Discarded parked messages of passed views"
            );
        }
    }

    /// Replay parked messages once nothing is missing.
    pub(crate) fn replay_deferred(&mut self, trust_claims: bool) -> Vec<Action> {
        if !self.cursor.is_caught_up() || self.deferred.is_empty() {
            return vec![];
        }
        let parked = std::mem::take(&mut self.deferred);
        debug!(count = parked.len(), "Caught up, replaying parked messages");
        parked
            .into_iter()
            .flat_map(|msg| self.intake(msg, trust_claims))
            .collect()
    }
}

impl StateMachine for CosiNode {
    fn handle(&mut self, event: Event) -> Vec<Action> {
        if self.closed {
            return vec![];
        }

        match event {
            Event::SubmitProposal { message, data } => self.on_submit(message, data),
            Event::ProposeChange { kind } => self.on_propose_change(kind),
            Event::QueryStatus => self.on_query_status(),
            Event::CloseAll => self.close("close requested"),
            Event::MessageReceived { message } => self.on_message(message),
            Event::CommitTimer { round } => self.on_commit_timer(round),
            Event::ResponseTimer { round } => self.on_response_timer(round),
            Event::HeartbeatTimer => self.on_heartbeat_timer(),
            Event::StatusTimer { sweep } => self.on_status_timer(sweep),
            Event::StartVotingRound { vote } => self.on_start_voting_round(vote),
            Event::TransportClosed => {
                warn!(node = %self.node_id, error = %CosiError::TransportClosed, "Shutting down");
                self.close("transport closed")
            }
        }
    }

    fn set_time(&mut self, now: Duration) {
        self.now = now;
    }

    fn now(&self) -> Duration {
        self.now
    }
}
