//! Protocol configuration.

use std::time::Duration;

/// How Merkle integrity proofs are used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MerkleScheme {
    /// No Merkle tree; the challenge hashes only the message and `V̂`.
    #[default]
    PublicKey,

    /// Every node builds a subtree Merkle tree and the global root is bound
    /// into the challenge; each node can prove its leaf against it.
    Proof,
}

/// Collective signing configuration.
#[derive(Debug, Clone)]
pub struct CosiConfig {
    /// Merkle scheme in use across the deployment.
    pub scheme: MerkleScheme,

    /// Maximum children per tree node.
    pub branching_factor: usize,

    /// Wait budget per tree level below a node.
    ///
    /// A node waits `child_wait × subtree height` for its children in each
    /// phase, so a child always gives up on its own children before its
    /// parent gives up on it.
    pub child_wait: Duration,

    /// Parent heartbeat timeout. `None` disables heartbeat-driven view
    /// changes and the root's periodic status sweep.
    pub heartbeat_timeout: Option<Duration>,

    /// Completed rounds per view before the next root takes over.
    /// 0 disables quota-driven view changes.
    pub rounds_per_view: u64,

    /// Minimum number of signers for the root to release a signature.
    pub threshold: Option<usize>,

    /// Check each subtree's partial aggregate at intermediate nodes.
    pub verify_partial: bool,

    /// Inclusion proofs kept for rounds awaiting their signature broadcast.
    pub max_retained_proofs: usize,
}

impl Default for CosiConfig {
    fn default() -> Self {
        Self {
            scheme: MerkleScheme::PublicKey,
            branching_factor: 2,
            child_wait: Duration::from_millis(500),
            heartbeat_timeout: None,
            rounds_per_view: 0,
            threshold: None,
            verify_partial: false,
            max_retained_proofs: 64,
        }
    }
}

impl CosiConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scheme(mut self, scheme: MerkleScheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_branching_factor(mut self, branching: usize) -> Self {
        self.branching_factor = branching;
        self
    }

    pub fn with_child_wait(mut self, wait: Duration) -> Self {
        self.child_wait = wait;
        self
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = Some(timeout);
        self
    }

    pub fn with_rounds_per_view(mut self, rounds: u64) -> Self {
        self.rounds_per_view = rounds;
        self
    }

    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn with_partial_verification(mut self, enabled: bool) -> Self {
        self.verify_partial = enabled;
        self
    }

    /// How long a node of the given subtree height waits for its children.
    /// Saturates at `Duration::MAX`.
    pub fn wait_budget(&self, height: u32) -> Duration {
        self.child_wait.saturating_mul(height)
    }

    /// Interval between heartbeat timer fires.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_timeout.map(|t| t / 2)
    }
}
