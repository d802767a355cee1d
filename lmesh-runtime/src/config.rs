//! Node and simulation configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use lmesh_core::{LinkQualityConfig, LossPolicy, DEFAULT_CACHE_CAPACITY};

fn random_identity() -> u64 {
    rand::random()
}

/// Protocol timing and sizing of one node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Stable hardware identity, random when not configured
    #[serde(default = "random_identity")]
    pub identity: u64,
    /// Delay before the first wake after (re)start
    pub wake_delay_ms: u64,
    /// Delay before a failed node incarnation is restarted
    pub restart_delay_ms: u64,
    /// Controller connectivity check
    pub status_check_period_ms: u64,
    pub status_check_delay_ms: u64,
    /// Hello broadcast, carries trace announcements
    pub hello_period_ms: u64,
    pub hello_delay_ms: u64,
    /// Mesh channel announcement on the rendezvous channel
    pub rendezvous_period_ms: u64,
    pub rendezvous_delay_ms: u64,
    /// Upstream link quality report
    pub link_report_period_ms: u64,
    pub link_report_delay_ms: u64,
    /// Time to wait for Hellos of a freshly invited node before resending the invite
    pub invite_response_timeout_ms: u64,
    /// Resends of an invite before giving up
    pub max_invite_attempts: u32,
    /// Hellos per join volley
    pub join_volley: u32,
    /// Time to collect a join volley before reporting it upward
    pub join_report_delay_ms: u64,
    /// Time to wait for an invite before repeating the join volley
    pub join_timeout_ms: u64,
    /// Hellos that carry each trace announcement
    pub tracing_volley: u32,
    /// Whether Hellos carry trace announcements
    pub tracing_enabled: bool,
    pub cache_capacity: usize,
    /// Neighbours below this estimate are left out of link reports
    pub report_threshold: f64,
    /// Largest payload in bytes the radio carries
    pub max_payload: usize,
    pub loss_policy: LossPolicy,
    pub link_quality: LinkQualityConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            identity: random_identity(),
            wake_delay_ms: 50,
            restart_delay_ms: 1000,
            status_check_period_ms: 60_000,
            status_check_delay_ms: 32_000,
            hello_period_ms: 20_000,
            hello_delay_ms: 0,
            rendezvous_period_ms: 65_000,
            rendezvous_delay_ms: 0,
            link_report_period_ms: 120_000,
            link_report_delay_ms: 107_000,
            invite_response_timeout_ms: 40_100,
            max_invite_attempts: 10,
            join_volley: 10,
            join_report_delay_ms: 1000,
            join_timeout_ms: 3000,
            tracing_volley: 10,
            tracing_enabled: true,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            report_threshold: 0.2,
            max_payload: 12,
            loss_policy: LossPolicy::default(),
            link_quality: LinkQualityConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load a configuration from JSON, missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_identity(mut self, identity: u64) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.tracing_enabled = enabled;
        self
    }

    pub fn with_loss_policy(mut self, policy: LossPolicy) -> Self {
        self.loss_policy = policy;
        self
    }

    pub fn with_report_threshold(mut self, threshold: f64) -> Self {
        self.report_threshold = threshold;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn wake_delay(&self) -> Duration {
        Duration::from_millis(self.wake_delay_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn invite_response_timeout(&self) -> Duration {
        Duration::from_millis(self.invite_response_timeout_ms)
    }

    pub fn join_report_delay(&self) -> Duration {
        Duration::from_millis(self.join_report_delay_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Trace announcements that fit one Hello payload
    pub fn announcements_per_hello(&self) -> usize {
        self.max_payload / 2
    }
}

/// Simulated radio medium
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Time on air of one frame, transports send one frame at a time
    pub airtime_ms: u64,
    /// Reception probability of station pairs without an explicit link
    pub default_reception: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            airtime_ms: 50,
            default_reception: 0.0,
        }
    }
}

impl SimulationConfig {
    pub fn airtime(&self) -> Duration {
        Duration::from_millis(self.airtime_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.join_volley, 10);
        assert_eq!(config.cache_capacity, 64);
        assert_eq!(config.announcements_per_hello(), 6);
        assert_eq!(config.link_report_delay_ms, 107_000);
    }

    #[test]
    fn test_from_json() {
        let config = NodeConfig::from_json(r#"{"identity": 77, "hello_period_ms": 5000}"#).unwrap();
        assert_eq!(config.identity, 77);
        assert_eq!(config.hello_period_ms, 5000);
        assert_eq!(config.join_timeout_ms, 3000);

        let loss = NodeConfig::from_json(r#"{"loss_policy": "report_outstanding"}"#).unwrap();
        assert_eq!(loss.loss_policy, LossPolicy::ReportOutstanding);
    }

    #[test]
    fn test_missing_identity_is_random() {
        let first = NodeConfig::from_json("{}").unwrap();
        let second = NodeConfig::from_json("{}").unwrap();
        assert_ne!(first.identity, second.identity);
    }
}
