//! End-to-end protocol tests over an instant in-memory cluster.

mod fixtures;

use fixtures::Cluster;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing_test::traced_test;
use treesig_core::{Action, Event, StateMachine};
use treesig_cosi::{CosiConfig, MerkleScheme, SharedVerifier, MAX_DEFERRED_PER_SENDER};
use treesig_messages::{
    Announcement, CatchUpResponse, Commitment, MessageKind, Payload, SigningMessage,
};
use treesig_test_helpers::verifiers::{CountingVerifier, RefuseNth};
use treesig_types::{NodeId, Point, RoundNumber, View, VoteIndex, VoteKind};

fn config() -> CosiConfig {
    CosiConfig::default().with_child_wait(Duration::from_millis(500))
}

fn announcement(view: u64, from: u64, last_seen_vote: u64, round: u64) -> SigningMessage {
    SigningMessage::new(
        View(view),
        NodeId(from),
        VoteIndex(last_seen_vote),
        Payload::Announcement(Announcement {
            round: RoundNumber(round),
            message: b"parked".to_vec(),
            data: Vec::new(),
            vote: None,
        }),
    )
}

fn catch_up_requests(actions: &[Action]) -> Vec<(NodeId, VoteIndex)> {
    actions
        .iter()
        .filter_map(|a| match a {
            Action::Send { to, message } => match &message.payload {
                Payload::CatchUpRequest(req) => Some((*to, req.index)),
                _ => None,
            },
            _ => None,
        })
        .collect()
}

#[traced_test]
#[test]
fn test_four_nodes_sign_hello_world() {
    let mut cluster = Cluster::new(4, config());
    cluster.submit(b"hello world");
    cluster.run();

    let signature = cluster.last_signature(0).expect("root signature").clone();
    assert_eq!(signature.message, b"hello world");
    assert!(signature.exceptions.is_empty());
    assert!(signature.verify(&cluster.roster.public_keys()).is_ok());
    assert!(signature
        .verify_with_aggregate(cluster.roster.aggregate_key())
        .is_ok());

    for id in 0..4 {
        assert_eq!(
            cluster.last_signature(id),
            Some(&signature),
            "node {id} did not receive the broadcast"
        );
    }
}

#[test]
fn test_single_node_signs_alone() {
    let mut cluster = Cluster::new(1, config());
    cluster.submit(b"solo");
    cluster.run();

    let signature = cluster.last_signature(0).expect("signature");
    assert!(signature.verify(&cluster.roster.public_keys()).is_ok());
}

#[test]
fn test_arrival_order_does_not_change_signature() {
    let config = config().with_branching_factor(3);

    let mut baseline = Cluster::new(13, config.clone());
    baseline.submit(b"order");
    baseline.run();
    let expected = baseline.last_signature(0).expect("baseline").clone();

    for seed in 0..5 {
        let mut shuffled = Cluster::new(13, config.clone());
        shuffled.submit(b"order");
        shuffled.run_shuffled(&mut ChaCha8Rng::seed_from_u64(seed));
        assert_eq!(
            shuffled.last_signature(0),
            Some(&expected),
            "seed {seed} changed the aggregate"
        );
    }
}

#[traced_test]
#[test]
fn test_missing_leaf_becomes_exception() {
    let mut cluster = Cluster::new(4, config());
    cluster.pause(3);
    cluster.submit(b"m");
    cluster.settle();

    let signature = cluster.last_signature(0).expect("signature");
    assert_eq!(
        signature.exceptions,
        vec![cluster.roster.public_key(NodeId(3))]
    );
    assert!(signature.verify(&cluster.roster.public_keys()).is_ok());
    assert!(
        cluster.now() <= Duration::from_millis(500),
        "only the leaf's parent should have waited"
    );
    assert!(logs_contain("Commit wait elapsed"));
}

#[test]
fn test_missing_response_moves_commitment_to_exceptions() {
    let mut cluster = Cluster::new(4, config());
    cluster.drop_kind(3, MessageKind::Challenge);
    cluster.submit(b"m");
    cluster.settle();

    let signature = cluster.last_signature(0).expect("signature");
    assert_eq!(
        signature.exceptions,
        vec![cluster.roster.public_key(NodeId(3))]
    );
    assert!(!signature.exception_commitment.is_identity());
    assert!(signature.verify(&cluster.roster.public_keys()).is_ok());
}

#[test]
fn test_refusing_leaf_excludes_itself() {
    let refusing = RefuseNth::new(1);
    let counting = CountingVerifier::new();
    let (r, c) = (refusing.clone(), counting.clone());
    let mut cluster = Cluster::with_verifiers(4, config(), move |id| -> SharedVerifier {
        if id == NodeId(2) {
            Arc::new(r.clone())
        } else {
            Arc::new(c.clone())
        }
    });

    cluster.submit(b"m");
    cluster.run();

    let signature = cluster.last_signature(0).expect("signature");
    assert_eq!(
        signature.exceptions,
        vec![cluster.roster.public_key(NodeId(2))]
    );
    assert!(signature.verify(&cluster.roster.public_keys()).is_ok());
    assert_eq!(refusing.calls(), 1);
    assert_eq!(refusing.accepted(), 0);
    assert_eq!(counting.calls(), 3);

    // The refusal was a one-off.
    cluster.submit(b"again");
    cluster.run();
    assert!(cluster.last_signature(0).expect("second").exceptions.is_empty());
}

#[test]
fn test_threshold_enforced_at_root() {
    let mut strict = Cluster::new(4, config().with_threshold(4));
    strict.pause(3);
    strict.submit(b"m");
    strict.settle();
    assert!(strict.last_signature(0).is_none());
    let failures = &strict.failures[&NodeId(0)];
    assert_eq!(failures.len(), 1);
    assert!(failures[0].1.contains("insufficient signers"));

    let mut lenient = Cluster::new(4, config().with_threshold(3));
    lenient.pause(3);
    lenient.submit(b"m");
    lenient.settle();
    assert!(lenient.last_signature(0).is_some());
}

#[test]
fn test_proof_scheme_inclusion_verified_everywhere() {
    let mut cluster = Cluster::new(7, config().with_scheme(MerkleScheme::Proof));
    cluster.submit(b"proof");
    cluster.run();

    let root_signature = cluster.last_signature(0).expect("signature").clone();
    assert!(root_signature.merkle_root.is_some());
    assert!(root_signature.verify(&cluster.roster.public_keys()).is_ok());

    for id in 0..7 {
        let (signature, inclusion) = cluster.signatures[&NodeId(id)].last().expect("delivered");
        assert_eq!(signature, &root_signature);
        assert_eq!(*inclusion, Some(true), "node {id} could not prove its leaf");
    }
}

#[test]
fn test_partial_verification_passes_for_honest_tree() {
    let mut cluster = Cluster::new(9, config().with_partial_verification(true));
    cluster.drop_kind(8, MessageKind::Challenge);
    cluster.submit(b"partial");
    cluster.settle();

    let signature = cluster.last_signature(0).expect("signature");
    assert!(signature.verify(&cluster.roster.public_keys()).is_ok());
    assert!(cluster.failures.is_empty());
}

#[traced_test]
#[test]
fn test_commitment_from_non_child_dropped() {
    let mut cluster = Cluster::new(4, config());
    let message = SigningMessage::new(
        View(0),
        NodeId(3),
        VoteIndex(0),
        Payload::Commitment(Commitment {
            round: RoundNumber(1),
            commitment: Point::identity(),
            aggregate_key: Point::identity(),
            merkle_root: None,
            exceptions: Vec::new(),
        }),
    );

    let actions = cluster
        .node_mut(0)
        .handle(Event::MessageReceived { message });
    assert!(actions.is_empty());
    assert!(logs_contain("sender is not a declared child"));
}

#[test]
fn test_vote_claims_from_non_members_ignored() {
    let mut cluster = Cluster::new(4, config());
    let forged = SigningMessage::new(
        View(0),
        NodeId(99),
        VoteIndex(1_000_000),
        Payload::Commitment(Commitment {
            round: RoundNumber(1),
            commitment: Point::identity(),
            aggregate_key: Point::identity(),
            merkle_root: None,
            exceptions: Vec::new(),
        }),
    );
    let actions = cluster
        .node_mut(0)
        .handle(Event::MessageReceived { message: forged });
    assert!(actions.is_empty());
    assert_eq!(cluster.node(0).cursor().last_seen(), VoteIndex(0));
    assert!(cluster.node(0).cursor().is_caught_up());

    let actions = cluster.node_mut(3).handle(Event::MessageReceived {
        message: announcement(1, 99, 50, 1),
    });
    assert!(actions.is_empty());
    assert!(cluster.node(3).cursor().is_caught_up());
    assert_eq!(cluster.node(3).deferred_len(), 0);

    // Neither node is left out of the next view change.
    cluster.push(
        NodeId(1),
        Event::ProposeChange {
            kind: VoteKind::ViewChange { root: NodeId(1) },
        },
    );
    cluster.run();
    for id in 0..4 {
        assert_eq!(cluster.node(id).view(), View(1), "node {id}");
    }
    let vote_signature = cluster.last_signature(1).expect("vote signed");
    assert!(vote_signature.exceptions.is_empty());
}

#[test]
fn test_unbacked_vote_claim_retracted() {
    let mut cluster = Cluster::new(4, config());

    // A member claims far more votes than exist.
    let actions = cluster.node_mut(3).handle(Event::MessageReceived {
        message: announcement(1, 2, 1_000_000, 5),
    });
    assert_eq!(catch_up_requests(&actions), vec![(NodeId(2), VoteIndex(1))]);
    assert_eq!(cluster.node(3).cursor().last_seen(), VoteIndex(1));
    assert_eq!(cluster.node(3).deferred_len(), 1);

    let reply = SigningMessage::new(
        View(0),
        NodeId(2),
        VoteIndex(1_000_000),
        Payload::CatchUpResponse(CatchUpResponse {
            index: VoteIndex(1),
            vote: None,
        }),
    );
    let actions = cluster
        .node_mut(3)
        .handle(Event::MessageReceived { message: reply });
    assert!(catch_up_requests(&actions).is_empty());
    assert!(cluster.node(3).cursor().is_caught_up());
    assert_eq!(cluster.node(3).cursor().last_seen(), VoteIndex(0));
    assert_eq!(cluster.node(3).deferred_len(), 0);
}

#[test]
fn test_parked_messages_bounded_per_sender() {
    let mut cluster = Cluster::new(4, config());
    for round in 1..=1_000 {
        cluster.node_mut(3).handle(Event::MessageReceived {
            message: announcement(1, 2, 1, round),
        });
        cluster.node_mut(3).handle(Event::MessageReceived {
            message: announcement(1, 99, 1, round),
        });
    }
    assert_eq!(cluster.node(3).deferred_len(), MAX_DEFERRED_PER_SENDER);

    // Catching up drains the queue and the node signs again.
    cluster.push(
        NodeId(1),
        Event::ProposeChange {
            kind: VoteKind::ViewChange { root: NodeId(1) },
        },
    );
    cluster.settle();
    let node = cluster.node(3);
    assert_eq!(node.view(), View(1));
    assert!(node.cursor().is_caught_up());
    assert_eq!(node.deferred_len(), 0);

    cluster.submit(b"after");
    cluster.settle();
    let signature = cluster.last_signature(1).expect("signature");
    assert_eq!(signature.message, b"after");
    assert!(signature.exceptions.is_empty());
}

#[test]
fn test_future_view_triggers_catch_up() {
    let mut cluster = Cluster::new(4, config());
    let message = SigningMessage::new(
        View(1),
        NodeId(2),
        VoteIndex(1),
        Payload::Announcement(Announcement {
            round: RoundNumber(5),
            message: b"later".to_vec(),
            data: Vec::new(),
            vote: None,
        }),
    );

    let actions = cluster
        .node_mut(3)
        .handle(Event::MessageReceived { message });
    let requested: Vec<_> = actions
        .iter()
        .filter_map(|a| match a {
            Action::Send { to, message } => match &message.payload {
                Payload::CatchUpRequest(req) => Some((*to, req.index)),
                _ => None,
            },
            _ => None,
        })
        .collect();
    assert_eq!(requested, vec![(NodeId(2), VoteIndex(1))]);
    assert!(!cluster.node(3).cursor().is_caught_up());
}

#[traced_test]
#[test]
fn test_view_change_installs_new_root() {
    let mut cluster = Cluster::new(4, config());
    cluster.push(
        NodeId(1),
        Event::ProposeChange {
            kind: VoteKind::ViewChange { root: NodeId(1) },
        },
    );
    cluster.run();

    for id in 0..4 {
        let node = cluster.node(id);
        assert_eq!(node.view(), View(1), "node {id} stayed behind");
        assert_eq!(node.topology().root(), NodeId(1));
        assert_eq!(node.cursor().last_applied(), VoteIndex(1));
        assert!(node.cursor().is_caught_up());
    }
    assert!(cluster.node(1).is_root());
    assert!(!cluster.node(0).is_root());

    // Old-view traffic is ignored from now on.
    let stale = SigningMessage::new(
        View(0),
        NodeId(0),
        VoteIndex(1),
        Payload::Announcement(Announcement {
            round: RoundNumber(9),
            message: b"old".to_vec(),
            data: Vec::new(),
            vote: None,
        }),
    );
    assert!(cluster
        .node_mut(2)
        .handle(Event::MessageReceived { message: stale })
        .is_empty());

    cluster.submit(b"after");
    cluster.run();
    let signature = cluster.last_signature(1).expect("new root signs");
    assert_eq!(signature.view, View(1));
    assert_eq!(signature.message, b"after");
    assert!(signature.verify(&cluster.roster.public_keys()).is_ok());
}

#[test]
fn test_lagging_node_catches_up_before_next_round() {
    let mut cluster = Cluster::new(4, config());
    cluster.deafen(3);
    cluster.push(
        NodeId(1),
        Event::ProposeChange {
            kind: VoteKind::ViewChange { root: NodeId(1) },
        },
    );
    cluster.settle();
    assert_eq!(cluster.node(1).view(), View(1));
    assert_eq!(cluster.node(3).view(), View(0));

    cluster.undeafen(3);
    cluster.submit(b"after");
    cluster.settle();

    assert_eq!(cluster.node(3).view(), View(1));
    let signature = cluster.last_signature(1).expect("signature");
    assert_eq!(signature.message, b"after");
    assert!(signature.exceptions.is_empty(), "node 3 should have rejoined");
}

#[test]
fn test_new_root_numbering_from_behind_is_accepted() {
    let mut cluster = Cluster::new(4, config());
    cluster.deafen(1);
    for message in [&b"one"[..], b"two", b"three"] {
        cluster.submit(message);
        cluster.settle();
    }
    assert_eq!(cluster.node(0).status().last_seen_round, RoundNumber(3));
    assert_eq!(cluster.node(1).status().last_seen_round, RoundNumber(0));

    // Node 1 roots view 1 and numbers its rounds from where it stopped.
    cluster.undeafen(1);
    cluster.push(
        NodeId(1),
        Event::ProposeChange {
            kind: VoteKind::ViewChange { root: NodeId(1) },
        },
    );
    cluster.settle();
    cluster.submit(b"after");
    cluster.settle();

    let delivered = &cluster.signatures[&NodeId(1)];
    assert_eq!(delivered.len(), 2, "vote round and one proposal");
    for (signature, _) in delivered {
        assert_eq!(signature.view, View(1));
        assert!(signature.exceptions.is_empty(), "round {}", signature.round);
    }
    let (after, _) = &delivered[1];
    assert_eq!(after.message, b"after");
    assert_eq!(after.round, RoundNumber(2));
    assert!(cluster.failures.is_empty());
}

#[test]
fn test_membership_votes_apply_everywhere() {
    let mut cluster = Cluster::new(4, config());
    let newcomer = cluster.roster.outsider(0);

    cluster.push(
        NodeId(3),
        Event::ProposeChange {
            kind: VoteKind::AddMember { member: newcomer },
        },
    );
    cluster.run();

    for id in 0..4 {
        let node = cluster.node(id);
        assert!(node.roster().contains(newcomer.node_id), "node {id}");
        assert_eq!(node.roster().len(), 5);
        assert_eq!(node.pending_members().count(), 0);
        assert_eq!(node.vote_log().len(), 1);
        // The current view's tree is unchanged until the next view.
        assert_eq!(node.topology().len(), 4);
    }

    cluster.push(
        NodeId(2),
        Event::ProposeChange {
            kind: VoteKind::RemoveMember {
                node: newcomer.node_id,
            },
        },
    );
    cluster.run();

    for id in 0..4 {
        let node = cluster.node(id);
        assert!(!node.roster().contains(newcomer.node_id));
        assert_eq!(node.cursor().last_applied(), VoteIndex(2));
    }
    assert_eq!(cluster.applied[&NodeId(0)].len(), 2);
}

#[test]
fn test_status_sweep_counts_reachable_nodes() {
    let mut cluster = Cluster::new(7, config());
    cluster.push(NodeId(0), Event::QueryStatus);
    cluster.run();
    assert_eq!(cluster.status, vec![(0, 7)]);

    cluster.pause(2);
    cluster.push(NodeId(0), Event::QueryStatus);
    cluster.settle();
    // Node 2's subtree is {2, 5, 6}.
    assert_eq!(cluster.status.last(), Some(&(1, 4)));
}

#[test]
fn test_close_all_cascades() {
    let mut cluster = Cluster::new(7, config());
    cluster.push(NodeId(0), Event::CloseAll);
    cluster.run();

    assert_eq!(cluster.shutdowns.len(), 7);
    for id in 0..7 {
        assert!(cluster.node(id).is_closed());
    }

    cluster.submit(b"too late");
    cluster.run();
    assert!(cluster.signatures.is_empty());
}
