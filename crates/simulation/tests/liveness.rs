//! View changes, catch-up, status sweeps and shutdown under simulated time.

use std::time::Duration;
use tracing_test::traced_test;
use treesig_core::Event;
use treesig_cosi::CosiConfig;
use treesig_simulation::{NetworkConfig, SimulationRunner};
use treesig_types::{KeyPair, Member, NodeId, View, VoteIndex, VoteKind};

fn runner(size: usize, config: CosiConfig) -> SimulationRunner {
    SimulationRunner::new(
        size,
        config.with_child_wait(Duration::from_millis(200)),
        NetworkConfig::default(),
        5,
    )
    .unwrap()
}

fn assert_view(runner: &SimulationRunner, ids: impl IntoIterator<Item = u64>, view: View) {
    for id in ids.into_iter().map(NodeId) {
        let node = runner.node(id).unwrap();
        assert_eq!(node.view(), view, "{id}");
        assert_eq!(Some(node.topology().root()), runner.roster().root_for(view), "{id}");
    }
}

#[traced_test]
#[test]
fn test_dead_root_replaced_after_heartbeat_loss() {
    let mut runner = runner(4, CosiConfig::default().with_heartbeat_timeout(Duration::from_secs(2)));
    runner.pause(NodeId(0));

    runner.run_until(Duration::from_secs(6));
    assert_view(&runner, 1..4, View(1));
    assert_eq!(runner.current_root(), Some(NodeId(1)));
    assert!(logs_contain("Parent heartbeat lost"));

    runner.submit(b"after failover");
    runner.run_for(Duration::from_secs(2));

    let signature = runner.last_signature(NodeId(1)).expect("new root signs");
    assert_eq!(signature.view, View(1));
    assert_eq!(signature.message, b"after failover");
    let dead_key = runner.roster().get(NodeId(0)).unwrap().public_key;
    assert_eq!(signature.exceptions, vec![dead_key]);
    assert!(signature.verify(&runner.public_keys()).is_ok());
}

#[test]
fn test_live_root_keeps_its_view() {
    let mut runner = runner(7, CosiConfig::default().with_heartbeat_timeout(Duration::from_secs(2)));
    runner.run_until(Duration::from_secs(10));

    assert_view(&runner, 0..7, View(0));
    // The root's periodic sweep is the heartbeat; every node answered.
    assert!(runner
        .status_reports()
        .iter()
        .all(|(root, _, reachable)| *root == NodeId(0) && *reachable == 7));
    assert!(runner.status_reports().len() >= 9);
}

#[test]
fn test_round_quota_rotates_root() {
    let mut runner = runner(4, CosiConfig::default().with_rounds_per_view(2));

    for message in [b"first", b"secnd"] {
        runner.submit(message);
        runner.run_for(Duration::from_secs(2));
    }
    assert_view(&runner, 0..4, View(1));
    assert_eq!(runner.stats().voting_tasks_spawned, 1);
    for id in 0..4 {
        assert_eq!(runner.applied_votes(NodeId(id)).len(), 1);
    }

    runner.submit(b"third");
    runner.run_for(Duration::from_secs(2));
    // Voting rounds deliver signatures too; pick out the proposal's.
    let signature = runner
        .signatures(NodeId(1))
        .iter()
        .map(|d| &d.signature)
        .find(|s| s.message == b"third")
        .expect("signature");
    assert_eq!(signature.view, View(1));
    assert!(signature.exceptions.is_empty());
}

#[test]
fn test_partitioned_node_catches_up() {
    let mut runner = runner(4, CosiConfig::default());
    runner
        .network_mut()
        .isolate_node(NodeId(3), (0..4).map(NodeId));

    runner.schedule_initial_event(
        NodeId(1),
        Duration::ZERO,
        Event::ProposeChange {
            kind: VoteKind::ViewChange { root: NodeId(1) },
        },
    );
    runner.run_for(Duration::from_secs(2));
    assert_view(&runner, 0..3, View(1));
    assert_view(&runner, [3], View(0));
    assert!(runner.stats().messages_dropped_partition > 0);

    runner.network_mut().heal_all();
    runner.submit(b"healed");
    runner.run_for(Duration::from_secs(2));

    assert_view(&runner, 0..4, View(1));
    let node = runner.node(NodeId(3)).unwrap();
    assert_eq!(node.cursor().last_applied(), VoteIndex(1));
    assert!(node.cursor().is_caught_up());

    let signature = runner.last_signature(NodeId(1)).expect("signature");
    assert_eq!(signature.message, b"healed");
    assert!(signature.exceptions.is_empty(), "node 3 should have rejoined");
}

#[test]
fn test_member_added_then_removed() {
    let mut runner = runner(5, CosiConfig::default());
    let newcomer = Member {
        node_id: NodeId(100),
        public_key: KeyPair::from_seed(&[9; 32]).public_key(),
    };

    runner.schedule_initial_event(
        NodeId(2),
        Duration::ZERO,
        Event::ProposeChange {
            kind: VoteKind::AddMember { member: newcomer },
        },
    );
    runner.run_for(Duration::from_secs(2));
    for id in 0..5 {
        let node = runner.node(NodeId(id)).unwrap();
        assert!(node.roster().contains(NodeId(100)), "{id}");
        assert_eq!(node.cursor().last_applied(), VoteIndex(1));
    }

    runner.schedule_initial_event(
        NodeId(4),
        Duration::ZERO,
        Event::ProposeChange {
            kind: VoteKind::RemoveMember { node: NodeId(100) },
        },
    );
    runner.run_for(Duration::from_secs(2));
    for id in 0..5 {
        let node = runner.node(NodeId(id)).unwrap();
        assert!(!node.roster().contains(NodeId(100)), "{id}");
        assert_eq!(runner.applied_votes(NodeId(id)).len(), 2);
    }
}

#[test]
fn test_status_sweep_skips_paused_subtree() {
    let mut runner = runner(7, CosiConfig::default());
    runner.schedule_initial_event(NodeId(0), Duration::ZERO, Event::QueryStatus);
    runner.run_for(Duration::from_secs(1));
    assert_eq!(runner.status_reports(), &[(NodeId(0), 0, 7)]);

    runner.pause(NodeId(1));
    runner.schedule_initial_event(NodeId(0), Duration::ZERO, Event::QueryStatus);
    runner.run_for(Duration::from_secs(2));
    // Node 1's subtree is {1, 3, 4}.
    assert_eq!(runner.status_reports().last(), Some(&(NodeId(0), 1, 4)));
}

#[test]
fn test_close_all_stops_every_node() {
    let mut runner = runner(9, CosiConfig::default());
    runner.schedule_initial_event(NodeId(0), Duration::ZERO, Event::CloseAll);
    runner.run_for(Duration::from_secs(1));

    for id in runner.node_ids() {
        assert!(runner.is_shut_down(id), "{id}");
    }
    runner.submit(b"ignored");
    runner.run_for(Duration::from_secs(1));
    assert!(runner.node_ids().iter().all(|id| runner.signatures(*id).is_empty()));
}
