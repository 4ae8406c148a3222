//! Configuration for gossip rounds.

use crate::error::{GossipError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// When a round re-reads membership and reconciles the summary stores.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilePolicy {
    /// Every round.
    Always,
    /// Only when the previous snapshot said membership will change again,
    /// on the first round, or after `force_recheck`.
    WhenFlagged,
}

/// Configuration for gossip behavior.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GossipConfig {
    /// How often each feed runs a round (in milliseconds).
    pub round_interval_ms: u64,
    /// When rounds reconcile against membership.
    pub reconcile_policy: ReconcilePolicy,
    /// Capacity of a node's inbound summary queue.
    pub inbox_capacity: usize,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            round_interval_ms: 100,
            reconcile_policy: ReconcilePolicy::Always,
            inbox_capacity: 1024,
        }
    }
}

impl GossipConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: GossipConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.round_interval_ms == 0 {
            return Err(GossipError::InvalidConfig(
                "round_interval_ms must be positive".to_string(),
            ));
        }
        if self.inbox_capacity == 0 {
            return Err(GossipError::InvalidConfig(
                "inbox_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn round_interval(&self) -> Duration {
        Duration::from_millis(self.round_interval_ms)
    }
}

/// Builder for gossip configuration.
pub struct GossipConfigBuilder {
    config: GossipConfig,
}

impl GossipConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: GossipConfig::default(),
        }
    }

    pub fn round_interval(mut self, ms: u64) -> Self {
        self.config.round_interval_ms = ms;
        self
    }

    pub fn reconcile_policy(mut self, policy: ReconcilePolicy) -> Self {
        self.config.reconcile_policy = policy;
        self
    }

    pub fn inbox_capacity(mut self, capacity: usize) -> Self {
        self.config.inbox_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<GossipConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for GossipConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
