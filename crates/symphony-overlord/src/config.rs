//! Overlord configuration.
//!
//! Defaults reproduce the reference overlay parameters. Every struct has
//! `with_*` builders; with the `serde` feature the whole tree can be loaded
//! from JSON, missing fields falling back to their defaults.

use std::time::Duration;

use crate::error::{OverlordError, Result};

/// Exponential retry backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RetryConfig {
    /// First wait between attempts, restored after any topology change.
    pub initial: Duration,
    /// Upper bound for the doubling wait.
    pub max: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(10),
            max: Duration::from_secs(60),
        }
    }
}

/// Bootstrap (leaf) link policy.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LeafConfig {
    /// Leaf links wanted while the node has no quiet ring membership.
    pub desired_connections: usize,
    /// Time after the last ring event over which the target decays to zero.
    pub decay_window: Duration,
    /// How often surplus leaves are considered for trimming.
    pub trim_interval: Duration,
    /// Endpoints offered to the connector per attempt.
    pub endpoints_per_attempt: usize,
    /// Known remote endpoints to bootstrap from.
    pub bootstrap: Vec<String>,
    pub retry: RetryConfig,
}

impl Default for LeafConfig {
    fn default() -> Self {
        Self {
            desired_connections: 3,
            decay_window: Duration::from_secs(600),
            trim_interval: Duration::from_secs(120),
            endpoints_per_attempt: 8,
            bootstrap: Vec::new(),
            retry: RetryConfig::default(),
        }
    }
}

impl LeafConfig {
    #[must_use]
    pub fn with_desired_connections(mut self, n: usize) -> Self {
        self.desired_connections = n;
        self
    }

    #[must_use]
    pub fn with_decay_window(mut self, window: Duration) -> Self {
        self.decay_window = window;
        self
    }

    #[must_use]
    pub fn with_bootstrap(mut self, endpoints: Vec<String>) -> Self {
        self.bootstrap = endpoints;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Immediate ring neighbour policy.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct NearConfig {
    /// Neighbours wanted on each side (`k`).
    pub desired_neighbors: usize,
    /// Quiet period required before redundant near links are trimmed.
    pub trim_delay: Duration,
    /// Connect-to responses awaited for a self-probe through a leaf.
    pub self_probe_responses: usize,
    pub retry: RetryConfig,
}

impl Default for NearConfig {
    fn default() -> Self {
        Self {
            desired_neighbors: 2,
            trim_delay: Duration::from_secs(30),
            self_probe_responses: 2,
            retry: RetryConfig::default(),
        }
    }
}

impl NearConfig {
    #[must_use]
    pub fn with_desired_neighbors(mut self, k: usize) -> Self {
        self.desired_neighbors = k;
        self
    }

    #[must_use]
    pub fn with_trim_delay(mut self, delay: Duration) -> Self {
        self.trim_delay = delay;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Long-range shortcut and bypass policy.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ShortcutConfig {
    /// Estimated size at or below which no shortcuts are wanted.
    pub min_network_size: usize,
    /// Near neighbours per side; shortcuts within this rank don't count.
    pub desired_neighbors: usize,
    /// Interval between optimality audits.
    pub optimize_interval: Duration,
    /// Quiet period required before surplus shortcuts are trimmed.
    pub trim_delay: Duration,
    /// Consecutive audits a candidate missing from the scores survives.
    pub max_doubt_benefits: u32,
    /// Share of the score table that still counts as near-optimal.
    pub optimal_rank_fraction: f64,
    /// Accepted score ratio against the best candidate.
    pub score_tolerance: f64,
    pub retry: RetryConfig,
}

impl Default for ShortcutConfig {
    fn default() -> Self {
        Self {
            min_network_size: 10,
            desired_neighbors: 2,
            optimize_interval: Duration::from_secs(300),
            trim_delay: Duration::from_secs(30),
            max_doubt_benefits: 2,
            optimal_rank_fraction: 0.2,
            score_tolerance: 1.1,
            retry: RetryConfig::default(),
        }
    }
}

impl ShortcutConfig {
    #[must_use]
    pub fn with_optimize_interval(mut self, interval: Duration) -> Self {
        self.optimize_interval = interval;
        self
    }

    #[must_use]
    pub fn with_trim_delay(mut self, delay: Duration) -> Self {
        self.trim_delay = delay;
        self
    }

    #[must_use]
    pub fn with_max_doubt_benefits(mut self, n: u32) -> Self {
        self.max_doubt_benefits = n;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Configuration for the full set of overlords.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct OverlordConfig {
    /// Period of the heartbeat tick delivered to every overlord.
    pub heartbeat: Duration,
    /// Seed for the overlords' random choices; entropy when unset.
    pub seed: Option<u64>,
    pub leaf: LeafConfig,
    pub near: NearConfig,
    pub shortcut: ShortcutConfig,
}

impl Default for OverlordConfig {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(1),
            seed: None,
            leaf: LeafConfig::default(),
            near: NearConfig::default(),
            shortcut: ShortcutConfig::default(),
        }
    }
}

impl OverlordConfig {
    /// Deterministic config for simulations and tests.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    #[must_use]
    pub fn with_leaf(mut self, leaf: LeafConfig) -> Self {
        self.leaf = leaf;
        self
    }

    #[must_use]
    pub fn with_near(mut self, near: NearConfig) -> Self {
        self.near = near;
        self
    }

    #[must_use]
    pub fn with_shortcut(mut self, shortcut: ShortcutConfig) -> Self {
        self.shortcut = shortcut;
        self
    }

    /// Reject values the overlords cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat.is_zero() {
            return Err(OverlordError::InvalidConfig("heartbeat must be non-zero".into()));
        }
        if self.near.desired_neighbors == 0 {
            return Err(OverlordError::InvalidConfig(
                "near.desired_neighbors must be at least 1".into(),
            ));
        }
        if self.near.desired_neighbors != self.shortcut.desired_neighbors {
            return Err(OverlordError::InvalidConfig(format!(
                "shortcut.desired_neighbors ({}) must match near.desired_neighbors ({})",
                self.shortcut.desired_neighbors, self.near.desired_neighbors
            )));
        }
        for (name, retry) in [
            ("leaf", &self.leaf.retry),
            ("near", &self.near.retry),
            ("shortcut", &self.shortcut.retry),
        ] {
            if retry.initial.is_zero() || retry.max < retry.initial {
                return Err(OverlordError::InvalidConfig(format!(
                    "{name}.retry needs 0 < initial <= max"
                )));
            }
        }
        let fraction = self.shortcut.optimal_rank_fraction;
        if !(0.0..=1.0).contains(&fraction) {
            return Err(OverlordError::InvalidConfig(
                "shortcut.optimal_rank_fraction must be within [0, 1]".into(),
            ));
        }
        let tolerance = self.shortcut.score_tolerance;
        if tolerance.is_nan() || tolerance < 1.0 {
            return Err(OverlordError::InvalidConfig(
                "shortcut.score_tolerance must be at least 1.0".into(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a JSON document.
    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = OverlordConfig::default();
        config.validate().unwrap();
        assert_eq!(config.leaf.desired_connections, 3);
        assert_eq!(config.near.desired_neighbors, 2);
        assert_eq!(config.shortcut.max_doubt_benefits, 2);
        assert_eq!(config.shortcut.optimize_interval, Duration::from_secs(300));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let config = OverlordConfig::default().with_heartbeat(Duration::ZERO);
        assert!(config.validate().is_err());

        let config =
            OverlordConfig::default().with_near(NearConfig::default().with_desired_neighbors(3));
        assert!(config.validate().is_err());

        let retry = RetryConfig {
            initial: Duration::from_secs(10),
            max: Duration::from_secs(1),
        };
        let config = OverlordConfig::default().with_leaf(LeafConfig::default().with_retry(retry));
        assert!(config.validate().is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn partial_json_uses_defaults() {
        let config =
            OverlordConfig::from_json(r#"{"seed": 7, "leaf": {"desired_connections": 5}}"#)
                .unwrap();
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.leaf.desired_connections, 5);
        assert_eq!(config.near, NearConfig::default());
    }
}
