//! Votes, catch-up and view changes.
//!
//! Every membership or view change is decided by a voting round: a normal
//! signing round whose message is the vote's canonical bytes. Confirmed
//! votes reach every node through the signature broadcast (or catch-up)
//! and are applied strictly in index order.

use crate::state::CosiNode;
use crate::CosiError;
use tracing::{debug, info, trace, warn};
use treesig_core::Action;
use treesig_messages::{CatchUpRequest, CatchUpResponse, GroupChange, Payload};
use treesig_types::{NodeId, View, Vote, VoteIndex, VoteKind};

impl CosiNode {
    // ═══════════════════════════════════════════════════════════════════════
    // Proposals
    // ═══════════════════════════════════════════════════════════════════════

    pub(crate) fn on_propose_change(&mut self, kind: VoteKind) -> Vec<Action> {
        match kind {
            VoteKind::ViewChange { .. } => {
                let target = self.view().next();
                if self.roster.root_for(target) == Some(self.node_id) {
                    self.initiate_view_change(target)
                } else {
                    debug!(target = %target, "Not the next root, ignoring view change proposal");
                    vec![]
                }
            }
            kind => {
                if let VoteKind::AddMember { member } = &kind {
                    self.pending_members.insert(member.node_id, *member);
                }
                self.queued_changes.push_back(kind);
                self.pump_changes()
            }
        }
    }

    pub(crate) fn on_group_change(&mut self, from: NodeId, kind: VoteKind) -> Vec<Action> {
        if kind.is_view_change() {
            debug!(from = %from, "View changes are not relayed, dropping");
            return vec![];
        }
        trace!(from = %from, target = %kind.target(), "Group change from child");
        self.on_propose_change(kind)
    }

    /// Start the next queued membership vote at the root, or pass queued
    /// changes up towards it.
    pub(crate) fn pump_changes(&mut self) -> Vec<Action> {
        if !self.is_root() {
            let Some(parent) = self.topology.parent(self.node_id) else {
                return vec![];
            };
            let view = self.view();
            let changes: Vec<VoteKind> = self.queued_changes.drain(..).collect();
            return changes
                .into_iter()
                .map(|kind| {
                    let vote = Vote::new(VoteIndex(0), view, kind);
                    self.send(parent, view, Payload::GroupChange(GroupChange { vote }))
                })
                .collect();
        }

        if self.vote_in_flight || self.view_change.is_changing() {
            return vec![];
        }
        let Some(kind) = self.queued_changes.pop_front() else {
            return vec![];
        };
        self.vote_in_flight = true;
        let vote = Vote::new(self.cursor.last_applied().next(), self.view(), kind);
        info!(index = %vote.index, target = %vote.kind.target(), "Spawning membership vote");
        vec![Action::SpawnVotingRound { vote }]
    }

    /// Begin a view change to `target` if this node roots it.
    pub(crate) fn initiate_view_change(&mut self, target: View) -> Vec<Action> {
        if self.roster.root_for(target) != Some(self.node_id) {
            return vec![];
        }
        if let Err(e) = self.view_change.try_begin(target) {
            debug!(error = %e, "View change not started");
            return vec![];
        }
        let vote = Vote::new(
            self.cursor.last_applied().next(),
            target,
            VoteKind::ViewChange {
                root: self.node_id,
            },
        );
        vec![Action::SpawnVotingRound { vote }]
    }

    /// A background task asks for the voting round to run now.
    pub(crate) fn on_start_voting_round(&mut self, mut vote: Vote) -> Vec<Action> {
        vote.index = self.cursor.last_applied().next();

        if vote.kind.is_view_change() {
            if vote.view <= self.view() || self.view_change.in_progress() != Some(vote.view) {
                debug!(target = %vote.view, "View change superseded before its vote ran");
                self.view_change.abort();
                return vec![];
            }
        } else {
            if !self.is_root() {
                self.vote_in_flight = false;
                self.queued_changes.push_front(vote.kind);
                return self.pump_changes();
            }
            vote.view = self.view();
        }

        let topology = match self.topology_for(vote.view) {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "Cannot build topology for voting round");
                return self.abandon_vote(&vote);
            }
        };
        if !topology.is_root(self.node_id) {
            warn!(view = %vote.view, "Not the root of the voting round's view");
            return self.abandon_vote(&vote);
        }

        let number = self.next_round_number();
        let message = vote.signing_bytes();
        info!(
            round = %number,
            index = %vote.index,
            view = %vote.view,
            target = %vote.kind.target(),
            "Starting voting round"
        );
        self.open_round(number, topology, message, Vec::new(), Some(vote))
    }

    fn abandon_vote(&mut self, vote: &Vote) -> Vec<Action> {
        if vote.kind.is_view_change() {
            self.view_change.abort();
            vec![]
        } else {
            self.vote_in_flight = false;
            self.pump_changes()
        }
    }

    /// Whether this node co-signs a voting round over `vote`.
    pub(crate) fn vote_acceptable(&self, vote: &Vote, message: &[u8], round_view: View) -> bool {
        if vote.confirmed
            || vote.index != self.cursor.last_applied().next()
            || message != vote.signing_bytes().as_slice()
        {
            return false;
        }
        let current = self.view();
        match &vote.kind {
            VoteKind::ViewChange { root } => {
                vote.view == round_view
                    && vote.view > current
                    && self.roster.root_for(vote.view) == Some(*root)
            }
            VoteKind::AddMember { member } => {
                vote.view == current && round_view == current && !self.roster.contains(member.node_id)
            }
            VoteKind::RemoveMember { node } => {
                vote.view == current && round_view == current && self.roster.contains(*node)
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Confirmed votes
    // ═══════════════════════════════════════════════════════════════════════

    /// Root side: the voting round succeeded.
    pub(crate) fn commit_vote(&mut self, vote: Vote) -> Vec<Action> {
        if !vote.kind.is_view_change() {
            self.vote_in_flight = false;
        }
        let mut actions = self.ingest_vote(vote, None);
        actions.extend(self.pump_changes());
        actions
    }

    /// Log a confirmed vote and apply whatever is now in order. `source`
    /// is asked for any gap the vote reveals.
    pub(crate) fn ingest_vote(&mut self, vote: Vote, source: Option<NodeId>) -> Vec<Action> {
        if !vote.confirmed {
            warn!(index = %vote.index, "Ignoring unconfirmed vote");
            return vec![];
        }
        if vote.index <= self.cursor.last_applied() {
            trace!(index = %vote.index, "Vote already applied");
            return vec![];
        }
        self.cursor.observe(vote.index);
        self.vote_log.put(vote);
        self.apply_ready_votes(source)
    }

    fn apply_ready_votes(&mut self, source: Option<NodeId>) -> Vec<Action> {
        let mut actions = Vec::new();
        while let Some(vote) = self.cursor.apply_next(&self.vote_log).cloned() {
            actions.extend(self.apply_vote(vote));
        }
        if self
            .catch_up_outstanding
            .is_some_and(|index| index <= self.cursor.last_applied())
        {
            self.catch_up_outstanding = None;
        }

        if let Some(source) = source {
            actions.extend(self.request_missing_vote(source));
        }

        actions.extend(self.replay_deferred(true));
        actions
    }

    fn apply_vote(&mut self, vote: Vote) -> Vec<Action> {
        info!(node = %self.node_id, index = %vote.index, view = %vote.view, target = %vote.kind.target(), "Applying vote");
        let mut actions = Vec::new();
        match &vote.kind {
            VoteKind::AddMember { member } => {
                self.pending_members.remove(&member.node_id);
                self.roster = self.roster.with_member(*member);
                self.other_topology = None;
            }
            VoteKind::RemoveMember { node } => {
                self.pending_members.remove(node);
                self.roster = self.roster.without_member(*node);
                self.other_topology = None;
            }
            VoteKind::ViewChange { .. } => actions.extend(self.install_view(vote.view)),
        }
        actions.push(Action::VoteApplied { vote });
        actions
    }

    /// Switch to the topology of `view` and abandon older-view rounds.
    fn install_view(&mut self, view: View) -> Vec<Action> {
        if view <= self.view() {
            return vec![];
        }
        let topology = match self.topology_for(view) {
            Ok(t) => t,
            Err(e) => {
                warn!(view = %view, error = %e, "Cannot install view");
                return vec![];
            }
        };
        self.topology = topology;
        self.other_topology = None;
        self.view_change.complete(view, self.now);
        self.purge_deferred();
        self.proofs.retain(|(round_view, _), _| *round_view >= view);

        let stale: Vec<_> = self
            .rounds
            .values()
            .filter(|r| r.view() < view)
            .map(|r| (r.number(), r.view()))
            .collect();

        let mut actions = Vec::new();
        for (number, round_view) in stale {
            if let Some(round) = self.rounds.remove(&number) {
                let error = CosiError::StaleView {
                    message_view: round_view,
                    current_view: view,
                };
                actions.extend(self.fail_round(round, error, false));
            }
        }
        actions.extend(self.pump_changes());
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Catch-up
    // ═══════════════════════════════════════════════════════════════════════

    pub(crate) fn request_missing_vote(&mut self, from: NodeId) -> Option<Action> {
        let missing = self.cursor.next_missing(&self.vote_log)?;
        if self.catch_up_outstanding == Some(missing) {
            return None;
        }
        self.catch_up_outstanding = Some(missing);
        self.catch_up_requested_at = self.now;
        debug!(index = %missing, peer = %from, "Requesting missing vote");
        Some(self.send(
            from,
            self.view(),
            Payload::CatchUpRequest(CatchUpRequest { index: missing }),
        ))
    }

    pub(crate) fn on_catch_up_request(&mut self, from: NodeId, index: VoteIndex) -> Vec<Action> {
        if !self.roster.contains(from) {
            warn!(from = %from, "Catch-up request from a non-member");
            return vec![];
        }
        let vote = self.vote_log.get(index).cloned();
        trace!(index = %index, to = %from, found = vote.is_some(), "Answering catch-up request");
        vec![self.send(
            from,
            self.view(),
            Payload::CatchUpResponse(CatchUpResponse { index, vote }),
        )]
    }

    /// `claim` is the responder's `last_seen_vote`; a delivered vote lets
    /// it pull the cursor one index further.
    pub(crate) fn on_catch_up_response(
        &mut self,
        from: NodeId,
        index: VoteIndex,
        vote: Option<Vote>,
        claim: VoteIndex,
    ) -> Vec<Action> {
        if !self.roster.contains(from) {
            warn!(from = %from, "Catch-up response from a non-member");
            return vec![];
        }
        let answered = self.catch_up_outstanding == Some(index);
        if answered {
            self.catch_up_outstanding = None;
        }
        match vote {
            Some(vote) if vote.index == index && vote.confirmed => {
                let held = self.vote_log.last_index().max(index);
                self.cursor.observe_claim(claim, held);
                self.ingest_vote(vote, Some(from))
            }
            Some(vote) => {
                warn!(asked = %index, got = %vote.index, from = %from, "Catch-up answered with the wrong vote");
                vec![]
            }
            None if answered => {
                debug!(index = %index, from = %from, "Peer does not have the requested vote");
                self.retract_vote_claims()
            }
            None => vec![],
        }
    }

    /// Nobody produced the vote the node thought it was missing: fall back
    /// to the votes in hand and resume.
    pub(crate) fn retract_vote_claims(&mut self) -> Vec<Action> {
        if self.cursor.is_caught_up() {
            return vec![];
        }
        self.cursor.retract(&self.vote_log);
        debug!(
            last_seen = %self.cursor.last_seen(),
            last_applied = %self.cursor.last_applied(),
            "Retracted unbacked vote claims"
        );
        self.replay_deferred(false)
    }
}
