//! Production runner with async I/O.
//!
//! This crate wraps the deterministic [`CosiNode`](treesig_cosi::CosiNode)
//! state machine with real async I/O:
//!
//! - Envelopes via tokio channels, wire-encoded like a socket transport
//! - Timers via tokio sleep tasks
//! - Voting rounds started from cancellable background tasks
//! - Signatures delivered through a single-slot watch channel
//! - Node status published through `ArcSwap` for lock-free reads
//!
//! # Architecture
//!
//! Uses the event aggregator pattern: a single task owns each node's state
//! machine and receives events over channels. This avoids mutex contention.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                          LocalCluster                             │
//! │                                                                   │
//! │   NodeLoop 0          NodeLoop 1          NodeLoop n              │
//! │   ┌──────────┐        ┌──────────┐        ┌──────────┐            │
//! │   │ CosiNode │        │ CosiNode │   ...  │ CosiNode │            │
//! │   └────┬─────┘        └────┬─────┘        └────┬─────┘            │
//! │        │ encoded bytes     │                   │                  │
//! │   ─────┴───────────────────┴───── ChannelHub ──┴─────             │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use treesig_cosi::CosiConfig;
//! use treesig_production::{seeded_keys, LocalCluster};
//!
//! # async fn demo() -> Result<(), treesig_production::RunnerError> {
//! let cluster = LocalCluster::start(seeded_keys(7, 8), CosiConfig::default())?;
//! let delivered = cluster.sign(b"hello world", Duration::from_secs(5)).await?;
//! assert!(delivered.signature.verify(&cluster.public_keys()).is_ok());
//! cluster.close_all(Duration::from_secs(1)).await;
//! # Ok(())
//! # }
//! ```

mod cluster;
pub mod config;
mod runner;
mod status;
pub mod telemetry;
mod timers;
mod transport;

pub use cluster::{random_keys, seeded_keys, LocalCluster};
pub use config::{ConfigError, NodeFileConfig};
pub use runner::{spawn_node, NodeExit, NodeHandle, RunnerError, SignatureWatch};
pub use status::{Delivered, NodeSnapshot};
pub use telemetry::{init_logging, TelemetryError};
pub use timers::TimerManager;
pub use transport::{ChannelHub, ChannelTransport, Inbox};
