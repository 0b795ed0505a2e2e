//! TOML node configuration.
//!
//! Example:
//!
//! ```toml
//! [cluster]
//! size = 16
//! seed = 7
//!
//! [consensus]
//! scheme = "proof"
//! branching_factor = 3
//! child_wait_ms = 250
//! heartbeat_timeout_ms = 2000
//! rounds_per_view = 10
//! threshold = 12
//! verify_partial = true
//! ```
//!
//! Every field has a default, so an empty file is a valid configuration.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use treesig_cosi::{CosiConfig, MerkleScheme};

/// Upper bound for every millisecond wait in the file (one hour).
pub const MAX_WAIT_MS: u64 = 3_600_000;

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level file layout.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeFileConfig {
    #[serde(default)]
    pub cluster: ClusterSection,

    #[serde(default)]
    pub consensus: ConsensusSection,
}

/// Shape of the in-process cluster.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterSection {
    /// Number of nodes.
    #[serde(default = "default_size")]
    pub size: usize,

    /// Seed for deterministic key derivation. `None` generates fresh keys.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_size() -> usize {
    4
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            size: default_size(),
            seed: None,
        }
    }
}

/// Merkle scheme as spelled in the file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemeName {
    #[default]
    PublicKey,
    Proof,
}

impl From<SchemeName> for MerkleScheme {
    fn from(name: SchemeName) -> Self {
        match name {
            SchemeName::PublicKey => MerkleScheme::PublicKey,
            SchemeName::Proof => MerkleScheme::Proof,
        }
    }
}

/// Protocol parameters; see [`CosiConfig`].
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsensusSection {
    #[serde(default)]
    pub scheme: SchemeName,

    #[serde(default = "default_branching_factor")]
    pub branching_factor: usize,

    #[serde(default = "default_child_wait_ms")]
    pub child_wait_ms: u64,

    #[serde(default)]
    pub heartbeat_timeout_ms: Option<u64>,

    #[serde(default)]
    pub rounds_per_view: u64,

    #[serde(default)]
    pub threshold: Option<usize>,

    #[serde(default)]
    pub verify_partial: bool,

    #[serde(default = "default_max_retained_proofs")]
    pub max_retained_proofs: usize,
}

fn default_branching_factor() -> usize {
    2
}

fn default_child_wait_ms() -> u64 {
    500
}

fn default_max_retained_proofs() -> usize {
    64
}

impl Default for ConsensusSection {
    fn default() -> Self {
        Self {
            scheme: SchemeName::default(),
            branching_factor: default_branching_factor(),
            child_wait_ms: default_child_wait_ms(),
            heartbeat_timeout_ms: None,
            rounds_per_view: 0,
            threshold: None,
            verify_partial: false,
            max_retained_proofs: default_max_retained_proofs(),
        }
    }
}

impl NodeFileConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from TOML text.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster.size == 0 {
            return Err(ConfigError::Invalid("cluster.size must be at least 1".into()));
        }
        if self.consensus.branching_factor == 0 {
            return Err(ConfigError::Invalid(
                "consensus.branching_factor must be at least 1".into(),
            ));
        }
        if self.consensus.child_wait_ms > MAX_WAIT_MS {
            return Err(ConfigError::Invalid(format!(
                "consensus.child_wait_ms {} exceeds {MAX_WAIT_MS}",
                self.consensus.child_wait_ms
            )));
        }
        if let Some(ms) = self.consensus.heartbeat_timeout_ms {
            if ms == 0 || ms > MAX_WAIT_MS {
                return Err(ConfigError::Invalid(format!(
                    "consensus.heartbeat_timeout_ms must be within 1..={MAX_WAIT_MS}, got {ms}"
                )));
            }
        }
        if let Some(threshold) = self.consensus.threshold {
            if threshold > self.cluster.size {
                return Err(ConfigError::Invalid(format!(
                    "consensus.threshold {threshold} exceeds cluster.size {}",
                    self.cluster.size
                )));
            }
        }
        Ok(())
    }

    /// Protocol configuration for every node of the cluster.
    pub fn cosi_config(&self) -> CosiConfig {
        let consensus = &self.consensus;
        let mut config = CosiConfig::default()
            .with_scheme(consensus.scheme.into())
            .with_branching_factor(consensus.branching_factor)
            .with_child_wait(Duration::from_millis(consensus.child_wait_ms))
            .with_rounds_per_view(consensus.rounds_per_view)
            .with_partial_verification(consensus.verify_partial);
        if let Some(ms) = consensus.heartbeat_timeout_ms {
            config = config.with_heartbeat_timeout(Duration::from_millis(ms));
        }
        if let Some(threshold) = consensus.threshold {
            config = config.with_threshold(threshold);
        }
        config.max_retained_proofs = consensus.max_retained_proofs;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = NodeFileConfig::parse("").unwrap();
        assert_eq!(config.cluster.size, 4);
        assert_eq!(config.cluster.seed, None);

        let cosi = config.cosi_config();
        assert_eq!(cosi.scheme, MerkleScheme::PublicKey);
        assert_eq!(cosi.branching_factor, 2);
        assert_eq!(cosi.child_wait, Duration::from_millis(500));
        assert_eq!(cosi.heartbeat_timeout, None);
        assert_eq!(cosi.threshold, None);
    }

    #[test]
    fn test_full_file() {
        let config = NodeFileConfig::parse(
            r#"
            [cluster]
            size = 16
            seed = 7

            [consensus]
            scheme = "proof"
            branching_factor = 3
            child_wait_ms = 250
            heartbeat_timeout_ms = 2000
            rounds_per_view = 10
            threshold = 12
            verify_partial = true
            max_retained_proofs = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.cluster.seed, Some(7));
        let cosi = config.cosi_config();
        assert_eq!(cosi.scheme, MerkleScheme::Proof);
        assert_eq!(cosi.branching_factor, 3);
        assert_eq!(cosi.child_wait, Duration::from_millis(250));
        assert_eq!(cosi.heartbeat_timeout, Some(Duration::from_secs(2)));
        assert_eq!(cosi.rounds_per_view, 10);
        assert_eq!(cosi.threshold, Some(12));
        assert!(cosi.verify_partial);
        assert_eq!(cosi.max_retained_proofs, 8);
    }

    #[test]
    fn test_rejects_unknown_and_invalid_fields() {
        assert!(matches!(
            NodeFileConfig::parse("[consensus]\nchild_wait = 3\n"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            NodeFileConfig::parse("[cluster]\nsize = 0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            NodeFileConfig::parse("[cluster]\nsize = 3\n[consensus]\nthreshold = 4\n"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_rejects_oversized_waits() {
        let huge = format!("[consensus]\nchild_wait_ms = {}\n", MAX_WAIT_MS + 1);
        assert!(matches!(
            NodeFileConfig::parse(&huge),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            NodeFileConfig::parse("[consensus]\nheartbeat_timeout_ms = 0\n"),
            Err(ConfigError::Invalid(_))
        ));

        let at_limit = format!("[consensus]\nchild_wait_ms = {MAX_WAIT_MS}\n");
        let config = NodeFileConfig::parse(&at_limit).unwrap();
        assert_eq!(
            config.cosi_config().child_wait,
            Duration::from_millis(MAX_WAIT_MS)
        );
    }
}
