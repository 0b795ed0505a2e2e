//! Round phase handlers: Announce, Commit, Challenge, Respond.
//!
//! Every handler takes the round out of the map, works on it, and puts it
//! back unless the round reached a terminal phase.

use crate::aggregate;
use crate::round::Round;
use crate::state::CosiNode;
use crate::transition::{PhaseStep, RoundPhase};
use crate::CosiError;
use std::sync::Arc;
use tracing::{debug, info, warn};
use treesig_core::{Action, TimerId};
use treesig_messages::{
    Announcement, Challenge, Commitment, ErrorReport, Payload, Response, SignatureBroadcast,
};
use treesig_types::{
    Hash, MerkleProof, NodeId, RoundNumber, Scalar, TreeTopology, View, Vote, VoteKind,
};

impl CosiNode {
    // ═══════════════════════════════════════════════════════════════════════
    // Announce
    // ═══════════════════════════════════════════════════════════════════════

    /// Start a round over `message` at the root.
    pub(crate) fn on_submit(&mut self, message: Vec<u8>, data: Vec<u8>) -> Vec<Action> {
        if !self.is_root() {
            warn!(node = %self.node_id, root = %self.topology.root(), "Proposal submitted to a non-root node");
            return vec![];
        }
        let number = self.next_round_number();
        let topology = self.topology.clone();
        info!(round = %number, view = %self.view(), bytes = message.len(), "Starting round");
        self.open_round(number, topology, message, data, None)
    }

    pub(crate) fn next_round_number(&mut self) -> RoundNumber {
        loop {
            self.last_seen_round = self.last_seen_round.next();
            if !self.rounds.contains_key(&self.last_seen_round) {
                return self.last_seen_round;
            }
        }
    }

    pub(crate) fn on_announcement(
        &mut self,
        announcement: Announcement,
        topology: Arc<TreeTopology>,
    ) -> Vec<Action> {
        if (topology.view(), announcement.round) <= self.retired_round {
            debug!(
                round = %announcement.round,
                view = %topology.view(),
                "Announcement for a retired round"
            );
            return vec![];
        }

        // Only a view change vote may run in a view the node has not
        // installed yet.
        let future_view_allowed = announcement
            .vote
            .as_ref()
            .is_some_and(|v| v.kind.is_view_change());
        if topology.view() != self.view() && !future_view_allowed {
            warn!(
                round = %announcement.round,
                view = %topology.view(),
                current = %self.view(),
                "Announcement for a view this node has not installed"
            );
            return vec![];
        }

        self.open_round(
            announcement.round,
            topology,
            announcement.message,
            announcement.data,
            announcement.vote,
        )
    }

    /// Create the round, decide whether to sign, and forward the
    /// announcement to every child.
    pub(crate) fn open_round(
        &mut self,
        number: RoundNumber,
        topology: Arc<TreeTopology>,
        message: Vec<u8>,
        data: Vec<u8>,
        vote: Option<Vote>,
    ) -> Vec<Action> {
        let mut actions = self.prune_stale_rounds();

        // A new root may reuse a number still open here from an older view.
        if let Some(open_view) = self.rounds.get(&number).map(|r| r.view()) {
            if open_view >= topology.view() {
                debug!(
                    round = %number,
                    view = %topology.view(),
                    open_view = %open_view,
                    "Round number taken by a newer view"
                );
                return actions;
            }
            if let Some(superseded) = self.rounds.remove(&number) {
                let error = CosiError::StaleView {
                    message_view: open_view,
                    current_view: topology.view(),
                };
                actions.extend(self.fail_round(superseded, error, false));
            }
        }

        let willing = match &vote {
            Some(v) => self.vote_acceptable(v, &message, topology.view()),
            None => self.verifier.verify(number, &message, &data),
        };
        if !willing {
            info!(node = %self.node_id, round = %number, "Declining to sign; relaying as an exception");
        }
        let nonce = willing.then(|| Scalar::random(&mut self.rng));

        let announcement = Announcement {
            round: number,
            message: message.clone(),
            data: data.clone(),
            vote: vote.clone(),
        };

        let mut round = Round::new(
            number,
            topology.clone(),
            self.node_id,
            self.keys.public_key(),
            message,
            data,
            vote,
            nonce,
            self.now,
        );

        for child in round.children() {
            actions.push(self.send(
                *child,
                round.view(),
                Payload::Announcement(announcement.clone()),
            ));
        }
        if !advance_or_log(&mut round, PhaseStep::Forwarded) {
            return actions;
        }

        if round.commits_complete() {
            actions.extend(self.finish_commit(round));
        } else {
            let height = topology.height(self.node_id).unwrap_or(0);
            actions.push(Action::SetTimer {
                id: TimerId::CommitWait(number),
                duration: self.config.wait_budget(height),
            });
            self.rounds.insert(number, round);
        }
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Commit
    // ═══════════════════════════════════════════════════════════════════════

    pub(crate) fn on_commitment(&mut self, from: NodeId, commitment: Commitment) -> Vec<Action> {
        let number = commitment.round;
        let Some(mut round) = self.rounds.remove(&number) else {
            return vec![];
        };

        if round.commitment_sent() || !round.record_commitment(from, commitment) {
            debug!(round = %number, from = %from, "Commitment not expected, dropping");
            self.rounds.insert(number, round);
            return vec![];
        }

        if round.commits_complete() {
            self.finish_commit(round)
        } else {
            self.rounds.insert(number, round);
            vec![]
        }
    }

    pub(crate) fn on_commit_timer(&mut self, number: RoundNumber) -> Vec<Action> {
        let Some(mut round) = self.rounds.remove(&number) else {
            return vec![];
        };
        if round.phase() != RoundPhase::Committing || round.commitment_sent() {
            self.rounds.insert(number, round);
            return vec![];
        }

        let missing = round.except_pending_commits();
        info!(round = %number, missing = ?missing, "Commit wait elapsed, excepting children");
        self.finish_commit(round)
    }

    /// Every child is accounted for: aggregate, then commit upward or
    /// challenge at the root.
    fn finish_commit(&mut self, mut round: Round) -> Vec<Action> {
        let number = round.number();
        round.finalize_commitments(self.config.scheme);

        let mut actions = Vec::new();
        if !round.children().is_empty() {
            actions.push(Action::CancelTimer {
                id: TimerId::CommitWait(number),
            });
        }

        if round.is_root() {
            actions.extend(self.start_challenge(round));
            return actions;
        }

        if let Some(parent) = round.parent() {
            let payload = round.commitment_payload();
            debug!(
                round = %number,
                parent = %parent,
                exceptions = payload.exceptions.len(),
                "Sending commitment"
            );
            actions.push(self.send(parent, round.view(), Payload::Commitment(payload)));
        }
        self.rounds.insert(number, round);
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Challenge
    // ═══════════════════════════════════════════════════════════════════════

    fn start_challenge(&mut self, round: Round) -> Vec<Action> {
        let merkle_root = round.subtree_root();
        let challenge = aggregate::round_challenge(
            &round.aggregate_commitment(),
            round.message(),
            merkle_root.as_ref(),
        );
        self.apply_challenge(round, challenge, merkle_root, MerkleProof::empty())
    }

    pub(crate) fn on_challenge(&mut self, challenge: Challenge) -> Vec<Action> {
        let number = challenge.round;
        let Some(round) = self.rounds.remove(&number) else {
            return vec![];
        };
        if round.is_root() || !round.commitment_sent() {
            debug!(round = %number, "Challenge before our commitment, dropping");
            self.rounds.insert(number, round);
            return vec![];
        }
        self.apply_challenge(
            round,
            challenge.challenge,
            challenge.merkle_root,
            challenge.proof,
        )
    }

    /// Store `c`, push it to committed children and fold in our own
    /// response.
    fn apply_challenge(
        &mut self,
        mut round: Round,
        challenge: Scalar,
        merkle_root: Option<Hash>,
        upper_proof: MerkleProof,
    ) -> Vec<Action> {
        let number = round.number();
        if round.store_challenge(challenge, merkle_root, upper_proof) == Some(false) {
            warn!(round = %number, "Local leaf is not under the announced Merkle root");
        }
        if !advance_or_log(&mut round, PhaseStep::ChallengeStored) {
            return vec![];
        }

        let view = round.view();
        let mut actions: Vec<Action> = round
            .child_challenges()
            .into_iter()
            .map(|(child, payload)| self.send(child, view, Payload::Challenge(payload)))
            .collect();

        round.compute_own_response(self.keys.secret());
        if !advance_or_log(&mut round, PhaseStep::ResponseComputed) {
            return actions;
        }

        if round.responses_complete() {
            actions.extend(self.finish_responses(round));
        } else {
            let height = round.topology().height(self.node_id).unwrap_or(0);
            actions.push(Action::SetTimer {
                id: TimerId::ResponseWait(number),
                duration: self.config.wait_budget(height),
            });
            self.rounds.insert(number, round);
        }
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Respond
    // ═══════════════════════════════════════════════════════════════════════

    pub(crate) fn on_response(&mut self, from: NodeId, response: Response) -> Vec<Action> {
        let number = response.round;
        let Some(mut round) = self.rounds.remove(&number) else {
            return vec![];
        };

        if !round.record_response(from, response) {
            debug!(round = %number, from = %from, "Response not expected, dropping");
            self.rounds.insert(number, round);
            return vec![];
        }

        if round.phase() == RoundPhase::Responding && round.responses_complete() {
            self.finish_responses(round)
        } else {
            self.rounds.insert(number, round);
            vec![]
        }
    }

    pub(crate) fn on_response_timer(&mut self, number: RoundNumber) -> Vec<Action> {
        let Some(mut round) = self.rounds.remove(&number) else {
            return vec![];
        };
        if round.phase() != RoundPhase::Responding {
            self.rounds.insert(number, round);
            return vec![];
        }

        let missing = round.except_pending_responses();
        info!(round = %number, missing = ?missing, "Response wait elapsed, excepting children");
        self.finish_responses(round)
    }

    fn finish_responses(&mut self, mut round: Round) -> Vec<Action> {
        let number = round.number();
        let mut actions = Vec::new();
        if !round.children().is_empty() {
            actions.push(Action::CancelTimer {
                id: TimerId::ResponseWait(number),
            });
        }

        if round.is_root() {
            actions.extend(self.complete_at_root(round));
            return actions;
        }

        if self.config.verify_partial && !round.partial_check() {
            let error = CosiError::VerificationFailure {
                round: number,
                reason: "partial verification of subtree failed".to_string(),
            };
            actions.extend(self.fail_round(round, error, true));
            return actions;
        }

        if !advance_or_log(&mut round, PhaseStep::ResponsesComplete) {
            return actions;
        }
        if let Some(parent) = round.parent() {
            actions.push(self.send(
                parent,
                round.view(),
                Payload::Response(round.response_payload()),
            ));
        }
        self.archive_proof(&round);
        self.retire(round.view(), number);
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Verification and release (root)
    // ═══════════════════════════════════════════════════════════════════════

    fn complete_at_root(&mut self, mut round: Round) -> Vec<Action> {
        let number = round.number();
        let Some(signature) = round.final_signature() else {
            let error = CosiError::VerificationFailure {
                round: number,
                reason: "no challenge".to_string(),
            };
            return self.fail_round(round, error, false);
        };

        let keys = round.topology().roster().public_keys();
        if let Err(e) = signature.verify(&keys) {
            let error = CosiError::VerificationFailure {
                round: number,
                reason: e.to_string(),
            };
            return self.fail_round(round, error, false);
        }

        let signers = signature.signer_count(keys.len());
        if let Some(threshold) = self.config.threshold {
            if signers < threshold {
                let error = CosiError::VerificationFailure {
                    round: number,
                    reason: format!("insufficient signers: {signers} < {threshold}"),
                };
                return self.fail_round(round, error, false);
            }
        }

        if !advance_or_log(&mut round, PhaseStep::ResponsesComplete) {
            return vec![];
        }
        info!(
            round = %number,
            view = %round.view(),
            signers,
            exceptions = signature.exceptions.len(),
            "Round complete"
        );

        let inclusion_verified = round
            .inclusion_proof()
            .zip(round.local_leaf())
            .zip(signature.merkle_root)
            .map(|((proof, leaf), root)| proof.verify(leaf, root));

        self.retire(round.view(), number);

        let mut actions = Vec::new();
        let confirmed = round.vote().cloned().map(|mut vote| {
            vote.confirmed = true;
            vote
        });
        if let Some(vote) = &confirmed {
            actions.extend(self.commit_vote(vote.clone()));
        }

        let broadcast = SignatureBroadcast {
            signature: signature.clone(),
            vote: confirmed.clone(),
        };
        for child in round.children() {
            actions.push(self.send(
                *child,
                round.view(),
                Payload::SignatureBroadcast(broadcast.clone()),
            ));
        }

        actions.push(Action::EmitSignature {
            signature,
            inclusion_verified,
        });

        if confirmed.is_none() {
            actions.extend(self.check_round_quota(number));
        }
        actions
    }

    pub(crate) fn on_signature_broadcast(
        &mut self,
        from: NodeId,
        view: View,
        broadcast: SignatureBroadcast,
        topology: Arc<TreeTopology>,
    ) -> Vec<Action> {
        let SignatureBroadcast { signature, vote } = broadcast;
        let number = signature.round;

        if signature.view != view {
            warn!(round = %number, "Signature view does not match its envelope");
            return vec![];
        }
        if let Err(e) = signature.verify(&topology.roster().public_keys()) {
            warn!(round = %number, error = %e, "Dropping invalid signature broadcast");
            return vec![];
        }

        let forward = SignatureBroadcast {
            signature: signature.clone(),
            vote: vote.clone(),
        };
        let mut actions: Vec<Action> = topology
            .children(self.node_id)
            .iter()
            .map(|child| self.send(*child, view, Payload::SignatureBroadcast(forward.clone())))
            .collect();

        // Still open here means our subtree was excepted by the parent.
        let open_here = self.rounds.get(&number).is_some_and(|r| r.view() == view);
        if let Some(round) = open_here.then(|| self.rounds.remove(&number)).flatten() {
            debug!(round = %number, phase = ?round.phase(), "Signature arrived for a round still open locally");
            actions.push(Action::CancelTimer {
                id: TimerId::CommitWait(number),
            });
            actions.push(Action::CancelTimer {
                id: TimerId::ResponseWait(number),
            });
        }
        self.retire(view, number);

        let inclusion_verified = self
            .proofs
            .remove(&(view, number))
            .and_then(|(leaf, proof)| signature.merkle_root.map(|root| proof.verify(leaf, root)));
        if inclusion_verified == Some(false) {
            warn!(round = %number, "Local leaf is not included under the signed Merkle root");
        }

        let is_vote_round = vote.is_some();
        if let Some(vote) = vote {
            if vote.confirmed && signature.message == vote.signing_bytes() {
                actions.extend(self.ingest_vote(vote, Some(from)));
            } else {
                warn!(round = %number, index = %vote.index, "Broadcast vote does not match the signature");
            }
        }

        actions.push(Action::EmitSignature {
            signature,
            inclusion_verified,
        });

        if !is_vote_round {
            actions.extend(self.check_round_quota(number));
        }
        actions
    }

    /// Start a view change when `number` used up the view's round quota
    /// and this node roots the next view.
    fn check_round_quota(&mut self, number: RoundNumber) -> Vec<Action> {
        if !self.view_change.round_quota_reached(number) {
            return vec![];
        }
        let target = self.view().next();
        debug!(round = %number, target = %target, "Round quota reached");
        self.initiate_view_change(target)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Failure
    // ═══════════════════════════════════════════════════════════════════════

    pub(crate) fn on_error_report(&mut self, from: NodeId, report: ErrorReport) -> Vec<Action> {
        let Some(round) = self.rounds.remove(&report.round) else {
            return vec![];
        };
        let error = CosiError::VerificationFailure {
            round: report.round,
            reason: format!("{from} reported: {}", report.reason),
        };
        self.fail_round(round, error, true)
    }

    /// Discard a round. The root reports the failure to the caller; other
    /// nodes report to their parent when `notify_parent` is set.
    pub(crate) fn fail_round(
        &mut self,
        mut round: Round,
        error: CosiError,
        notify_parent: bool,
    ) -> Vec<Action> {
        let number = round.number();
        advance_or_log(&mut round, PhaseStep::Abandon);
        warn!(node = %self.node_id, round = %number, error = %error, "Round failed");

        let mut actions = vec![
            Action::CancelTimer {
                id: TimerId::CommitWait(number),
            },
            Action::CancelTimer {
                id: TimerId::ResponseWait(number),
            },
        ];

        if round.is_root() {
            actions.push(Action::RoundFailed {
                round: number,
                reason: error.to_string(),
            });
            if let Some(vote) = round.vote() {
                match vote.kind {
                    VoteKind::ViewChange { .. } => self.view_change.abort(),
                    _ => self.vote_in_flight = false,
                }
            }
            self.retire(round.view(), number);
            actions.extend(self.pump_changes());
            return actions;
        }

        if notify_parent {
            if let Some(parent) = round.parent() {
                actions.push(self.send(
                    parent,
                    round.view(),
                    Payload::Error(ErrorReport {
                        round: number,
                        reason: error.to_string(),
                    }),
                ));
            }
        }
        self.retire(round.view(), number);
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Bookkeeping
    // ═══════════════════════════════════════════════════════════════════════

    pub(crate) fn retire(&mut self, view: View, number: RoundNumber) {
        if self.rounds.get(&number).is_some_and(|r| r.view() == view) {
            self.rounds.remove(&number);
        }
        self.retired_round = self.retired_round.max((view, number));
    }

    fn archive_proof(&mut self, round: &Round) {
        let (Some(leaf), Some(proof)) = (round.local_leaf(), round.inclusion_proof()) else {
            return;
        };
        self.proofs.insert((round.view(), round.number()), (leaf, proof));
        while self.proofs.len() > self.config.max_retained_proofs {
            self.proofs.pop_first();
        }
    }

    /// Drop rounds that have been open far longer than any wait budget
    /// allows; their parent has moved on.
    fn prune_stale_rounds(&mut self) -> Vec<Action> {
        let root_height = self.topology.height(self.topology.root()).unwrap_or(0);
        let horizon = self.config.wait_budget(root_height + 1).saturating_mul(4);
        let stale: Vec<RoundNumber> = self
            .rounds
            .values()
            .filter(|r| self.now.saturating_sub(r.opened_at()) > horizon)
            .map(|r| r.number())
            .collect();

        let mut actions = Vec::new();
        for number in stale {
            if let Some(round) = self.rounds.remove(&number) {
                let error = CosiError::VerificationFailure {
                    round: number,
                    reason: "round expired".to_string(),
                };
                debug!(round = %number, "Pruning stale round");
                actions.extend(self.fail_round(round, error, false));
            }
        }
        actions
    }
}

fn advance_or_log(round: &mut Round, step: PhaseStep) -> bool {
    match round.advance(step) {
        Ok(_) => true,
        Err(e) => {
            warn!(round = %round.number(), error = %e, "Rejected phase transition");
            false
        }
    }
}
