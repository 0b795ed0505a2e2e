//! An in-process cluster of tokio-driven nodes.

use crate::runner::{spawn_node, NodeExit, NodeHandle, RunnerError};
use crate::status::Delivered;
use crate::transport::ChannelHub;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use treesig_cosi::{AcceptAll, CosiConfig, CosiNode, SharedVerifier};
use treesig_types::{KeyPair, Member, NodeId, PublicKey, Roster};

/// Nodes sharing one [`ChannelHub`].
pub struct LocalCluster {
    hub: Arc<ChannelHub>,
    roster: Roster,
    nodes: BTreeMap<NodeId, NodeHandle>,
    tasks: BTreeMap<NodeId, JoinHandle<NodeExit>>,
}

impl LocalCluster {
    /// Start nodes `0..keys.len()` that accept every proposal.
    pub fn start(keys: Vec<KeyPair>, config: CosiConfig) -> Result<Self, RunnerError> {
        Self::start_with_verifiers(keys, config, |_| Arc::new(AcceptAll))
    }

    /// Start nodes `0..keys.len()`, asking `verifier_for` for each node's hook.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_with_verifiers(
        keys: Vec<KeyPair>,
        config: CosiConfig,
        verifier_for: impl Fn(NodeId) -> SharedVerifier,
    ) -> Result<Self, RunnerError> {
        let roster = Roster::new(
            keys.iter()
                .enumerate()
                .map(|(i, kp)| Member {
                    node_id: NodeId(i as u64),
                    public_key: kp.public_key(),
                })
                .collect(),
        );

        let hub = ChannelHub::new();
        let mut nodes = BTreeMap::new();
        let mut tasks = BTreeMap::new();
        for (i, kp) in keys.into_iter().enumerate() {
            let id = NodeId(i as u64);
            // Nonces always come from the OS, never from a key seed.
            let node = CosiNode::new(
                id,
                kp,
                roster.clone(),
                config.clone(),
                verifier_for(id),
                ChaCha20Rng::from_entropy(),
            )?;
            let inbox = hub.register(id);
            let (handle, task) = spawn_node(node, hub.transport(id), inbox);
            nodes.insert(id, handle);
            tasks.insert(id, task);
        }

        info!(nodes = nodes.len(), "Started local cluster");
        Ok(Self {
            hub,
            roster,
            nodes,
            tasks,
        })
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn public_keys(&self) -> Vec<PublicKey> {
        self.roster.public_keys()
    }

    pub fn hub(&self) -> &Arc<ChannelHub> {
        &self.hub
    }

    pub fn node(&self, id: NodeId) -> Result<&NodeHandle, RunnerError> {
        self.nodes.get(&id).ok_or(RunnerError::UnknownNode(id))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeHandle> {
        self.nodes.values()
    }

    /// Root of the current view as seen by the lowest running node.
    pub fn current_root(&self) -> Option<NodeId> {
        self.nodes
            .values()
            .find(|handle| handle.is_running())
            .map(|handle| handle.status().root)
    }

    /// Crash `id` without notifying anyone.
    pub fn kill(&self, id: NodeId) -> Result<(), RunnerError> {
        let handle = self.node(id)?;
        handle.kill();
        self.hub.unregister(id);
        Ok(())
    }

    /// Submit `message` to the current root and wait for its signature.
    pub async fn sign(&self, message: &[u8], timeout: Duration) -> Result<Delivered, RunnerError> {
        let root = self.current_root().ok_or(RunnerError::NoLiveNode)?;
        let handle = self.node(root)?;
        let mut watch = handle.signatures();
        handle.submit(message, Vec::<u8>::new())?;
        watch.next_for(message, timeout).await
    }

    /// Close the tree from the current root and wait for every node loop to
    /// exit. Nodes that do not exit in time are cancelled.
    pub async fn close_all(mut self, timeout: Duration) -> BTreeMap<NodeId, NodeExit> {
        if let Some(root) = self.current_root() {
            if let Ok(handle) = self.node(root) {
                let _ = handle.close_all();
            }
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let mut exits = BTreeMap::new();
        for (id, mut task) in std::mem::take(&mut self.tasks) {
            let exit = match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(exit)) => exit,
                Ok(Err(e)) => {
                    warn!(node = %id, error = %e, "Node task failed");
                    NodeExit::Cancelled
                }
                Err(_) => {
                    warn!(node = %id, "Node did not close in time");
                    if let Some(handle) = self.nodes.get(&id) {
                        handle.kill();
                    }
                    task.await.unwrap_or(NodeExit::Cancelled)
                }
            };
            exits.insert(id, exit);
        }
        exits
    }
}

impl Drop for LocalCluster {
    fn drop(&mut self) {
        for handle in self.nodes.values() {
            handle.kill();
        }
    }
}

/// Deterministic key pairs for `size` nodes.
pub fn seeded_keys(seed: u64, size: usize) -> Vec<KeyPair> {
    (0..size as u64)
        .map(|i| {
            let mut seed_bytes = [0u8; 32];
            let key_seed = seed.wrapping_add(i).wrapping_mul(0x517cc1b727220a95);
            seed_bytes[..8].copy_from_slice(&key_seed.to_le_bytes());
            seed_bytes[8..16].copy_from_slice(&i.to_le_bytes());
            seed_bytes[16..24].copy_from_slice(b"treesig!");
            KeyPair::from_seed(&seed_bytes)
        })
        .collect()
}

/// Fresh random key pairs for `size` nodes.
pub fn random_keys(size: usize) -> Vec<KeyPair> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| KeyPair::generate(&mut rng)).collect()
}
