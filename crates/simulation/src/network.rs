//! Simulated network with deterministic latency, packet loss, partitions
//! and paused nodes.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use treesig_types::NodeId;

/// Configuration for the simulated network.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Base one-way latency between any two nodes.
    pub latency: Duration,
    /// Jitter as a fraction of base latency (0.0 - 1.0).
    pub jitter_fraction: f64,
    /// Packet loss rate (0.0 - 1.0). Messages are dropped with this probability.
    pub packet_loss_rate: f64,
    /// When enabled, every envelope is wire-encoded (SBOR + LZ4) and decoded
    /// on delivery, exercising the same serialization path as production.
    pub codec_roundtrip: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(10),
            jitter_fraction: 0.1,
            packet_loss_rate: 0.0,
            codec_roundtrip: true,
        }
    }
}

/// Simulated network for deterministic message delivery.
///
/// Supports:
/// - Configurable latency with jitter
/// - Packet loss (probabilistic message drops)
/// - Network partitions (blocking communication between node pairs)
/// - Paused nodes (the process is frozen: nothing is delivered to it and
///   its timers do not fire)
///
/// Delivery is FIFO per directed link even with jitter: a message never
/// overtakes an earlier one on the same link.
#[derive(Debug)]
pub struct SimulatedNetwork {
    config: NetworkConfig,
    /// Partitioned node pairs. If (a, b) is in this set, messages from a to b are dropped.
    /// Partitions are directional - add both (a, b) and (b, a) for bidirectional partition.
    partitions: HashSet<(NodeId, NodeId)>,
    paused: HashSet<NodeId>,
    /// Latest scheduled arrival per directed link.
    link_clock: HashMap<(NodeId, NodeId), Duration>,
}

impl SimulatedNetwork {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            partitions: HashSet::new(),
            paused: HashSet::new(),
            link_clock: HashMap::new(),
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    // ─── Partition Management ───

    /// Check if two nodes are partitioned (message from `from` to `to` would be dropped).
    pub fn is_partitioned(&self, from: NodeId, to: NodeId) -> bool {
        self.partitions.contains(&(from, to))
    }

    /// Create a unidirectional partition: messages from `from` to `to` are dropped.
    pub fn partition_unidirectional(&mut self, from: NodeId, to: NodeId) {
        self.partitions.insert((from, to));
    }

    /// Create a bidirectional partition between two nodes.
    pub fn partition_bidirectional(&mut self, a: NodeId, b: NodeId) {
        self.partitions.insert((a, b));
        self.partitions.insert((b, a));
    }

    /// Cut `node` off from every node in `others`, both directions.
    pub fn isolate_node(&mut self, node: NodeId, others: impl IntoIterator<Item = NodeId>) {
        for other in others {
            if other != node {
                self.partition_bidirectional(node, other);
            }
        }
    }

    /// Heal a bidirectional partition between two nodes.
    pub fn heal_bidirectional(&mut self, a: NodeId, b: NodeId) {
        self.partitions.remove(&(a, b));
        self.partitions.remove(&(b, a));
    }

    /// Heal all partitions - restore full network connectivity.
    pub fn heal_all(&mut self) {
        self.partitions.clear();
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    // ─── Paused Nodes ───

    pub fn pause(&mut self, node: NodeId) {
        self.paused.insert(node);
    }

    /// Returns `true` if the node was paused.
    pub fn resume(&mut self, node: NodeId) -> bool {
        self.paused.remove(&node)
    }

    pub fn is_paused(&self, node: NodeId) -> bool {
        self.paused.contains(&node)
    }

    // ─── Packet Loss ───

    /// Check if a packet should be dropped based on the configured loss rate.
    pub fn should_drop_packet(&self, rng: &mut ChaCha8Rng) -> bool {
        self.config.packet_loss_rate > 0.0 && rng.gen::<f64>() < self.config.packet_loss_rate
    }

    /// Set the packet loss rate (0.0 - 1.0).
    pub fn set_packet_loss_rate(&mut self, rate: f64) {
        self.config.packet_loss_rate = rate.clamp(0.0, 1.0);
    }

    pub fn codec_roundtrip(&self) -> bool {
        self.config.codec_roundtrip
    }

    // ─── Delivery ───

    /// Sample one-way latency.
    pub fn sample_latency(&self, rng: &mut ChaCha8Rng) -> Duration {
        let base = self.config.latency.as_secs_f64();
        let jitter_range = base * self.config.jitter_fraction;
        let jitter = if jitter_range > 0.0 {
            rng.gen_range(-jitter_range..jitter_range)
        } else {
            0.0
        };
        Duration::from_secs_f64((base + jitter).max(0.0001))
    }

    /// Arrival time of a message sent now on `from → to`, never earlier
    /// than the previous message on the same link.
    pub fn arrival_time(
        &mut self,
        from: NodeId,
        to: NodeId,
        now: Duration,
        rng: &mut ChaCha8Rng,
    ) -> Duration {
        let sampled = now + self.sample_latency(rng);
        let clock = self.link_clock.entry((from, to)).or_default();
        let arrival = sampled.max(*clock);
        *clock = arrival;
        arrival
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_partitions() {
        let mut network = SimulatedNetwork::new(NetworkConfig::default());
        network.partition_unidirectional(NodeId(0), NodeId(1));
        assert!(network.is_partitioned(NodeId(0), NodeId(1)));
        assert!(!network.is_partitioned(NodeId(1), NodeId(0)));

        network.isolate_node(NodeId(2), (0..4).map(NodeId));
        assert_eq!(network.partition_count(), 7);

        network.heal_bidirectional(NodeId(2), NodeId(3));
        assert!(!network.is_partitioned(NodeId(3), NodeId(2)));

        network.heal_all();
        assert_eq!(network.partition_count(), 0);
    }

    #[test]
    fn test_link_stays_fifo_under_jitter() {
        let mut network = SimulatedNetwork::new(NetworkConfig {
            latency: Duration::from_millis(10),
            jitter_fraction: 0.9,
            ..Default::default()
        });
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        let mut last = Duration::ZERO;
        for step in 0..100u64 {
            let now = Duration::from_micros(step * 50);
            let arrival = network.arrival_time(NodeId(0), NodeId(1), now, &mut rng);
            assert!(arrival >= last);
            assert!(arrival > now);
            last = arrival;
        }
    }

    #[test]
    fn test_no_loss_by_default() {
        let network = SimulatedNetwork::new(NetworkConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!((0..1000).all(|_| !network.should_drop_packet(&mut rng)));
    }

    #[test]
    fn test_pause_resume() {
        let mut network = SimulatedNetwork::new(NetworkConfig::default());
        network.pause(NodeId(3));
        assert!(network.is_paused(NodeId(3)));
        assert!(network.resume(NodeId(3)));
        assert!(!network.resume(NodeId(3)));
    }
}
