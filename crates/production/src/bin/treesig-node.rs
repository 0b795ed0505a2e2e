//! Treesig demo node
//!
//! Spins up an in-process signing tree, signs messages and verifies the
//! resulting collective signatures.
//!
//! # Usage
//!
//! ```bash
//! # Eight nodes, one message
//! treesig-node --nodes 8 --message "hello world"
//!
//! # From a configuration file, crashing two leaves first
//! treesig-node --config cluster.toml --kill 6 --kill 7 --rounds 3
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use treesig_production::{
    init_logging, random_keys, seeded_keys, LocalCluster, NodeExit, NodeFileConfig,
};
use treesig_types::NodeId;

/// Treesig demo node
///
/// Runs a local collective signing tree and prints each signature.
#[derive(Parser, Debug)]
#[command(name = "treesig-node")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of nodes (overrides config)
    #[arg(long)]
    nodes: Option<usize>,

    /// Key derivation seed (overrides config)
    #[arg(long)]
    seed: Option<u64>,

    /// Message to sign
    #[arg(short, long, default_value = "hello world")]
    message: String,

    /// Number of rounds to run
    #[arg(long, default_value_t = 1)]
    rounds: u32,

    /// Crash these nodes before signing (can be specified multiple times)
    #[arg(long)]
    kill: Vec<u64>,

    /// Per-round timeout in milliseconds
    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,

    /// Log level filter (overrides RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn load_config(&self) -> Result<NodeFileConfig> {
        let mut config = match &self.config {
            Some(path) => NodeFileConfig::load(path)
                .with_context(|| format!("Failed to load config file: {}", path.display()))?,
            None => NodeFileConfig::default(),
        };

        if let Some(nodes) = self.nodes {
            config.cluster.size = nodes;
        }
        if let Some(seed) = self.seed {
            config.cluster.seed = Some(seed);
        }
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, true).context("Failed to initialise logging")?;

    let config = cli.load_config()?;
    let cosi_config = config.cosi_config();
    info!(
        nodes = config.cluster.size,
        branching = cosi_config.branching_factor,
        scheme = ?cosi_config.scheme,
        "Configuration loaded"
    );

    let keys = match config.cluster.seed {
        Some(seed) => seeded_keys(seed, config.cluster.size),
        None => random_keys(config.cluster.size),
    };
    let cluster = LocalCluster::start(keys, cosi_config).context("Failed to start cluster")?;

    for id in &cli.kill {
        cluster
            .kill(NodeId(*id))
            .with_context(|| format!("Cannot kill node {id}"))?;
        warn!(node = id, "Killed node");
    }

    let timeout = Duration::from_millis(cli.timeout_ms);
    let public_keys = cluster.public_keys();
    for round in 0..cli.rounds {
        let message = if cli.rounds == 1 {
            cli.message.clone()
        } else {
            format!("{} #{round}", cli.message)
        };

        let delivered = cluster
            .sign(message.as_bytes(), timeout)
            .await
            .with_context(|| format!("Round {round} did not produce a signature"))?;
        let signature = &delivered.signature;

        if let Err(e) = signature.verify(&public_keys) {
            bail!("Signature for round {round} does not verify: {e}");
        }

        println!("round      {}", signature.round);
        println!("view       {}", signature.view);
        println!("message    {message}");
        println!("challenge  {}", hex::encode(signature.challenge.to_bytes()));
        println!("response   {}", hex::encode(signature.response.to_bytes()));
        println!(
            "signers    {}/{}",
            signature.signer_count(public_keys.len()),
            public_keys.len()
        );
        for key in &signature.exceptions {
            println!("excepted   {}", hex::encode(key.to_bytes()));
        }
        if let Some(root) = &signature.merkle_root {
            println!("merkle     {root}");
        }
        println!();
    }

    let exits = cluster.close_all(Duration::from_secs(2)).await;
    let closed = exits.values().filter(|e| **e == NodeExit::Closed).count();
    info!(closed, total = exits.len(), "Cluster shut down");
    Ok(())
}
