//! Configuration for the gossip engine

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for rumor mongering and anti-entropy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipConfig {
    /// How long to wait for a partner's status before re-sending a hot rumor
    pub resend_timeout: Duration,

    /// Interval between anti-entropy status pushes
    pub anti_entropy_period: Duration,

    /// Number of fixed gossip partners picked at startup
    pub neighbor_fanout: usize,

    /// Maximum datagram payload size in bytes
    pub max_packet_size: usize,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            resend_timeout: Duration::from_secs(1),
            anti_entropy_period: Duration::from_secs(10),
            neighbor_fanout: 2,
            max_packet_size: 8192,
        }
    }
}

impl GossipConfig {
    /// Create a new gossip configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the hot-rumor resend timeout
    pub fn with_resend_timeout(mut self, timeout: Duration) -> Self {
        self.resend_timeout = timeout;
        self
    }

    /// Set the anti-entropy period
    pub fn with_anti_entropy_period(mut self, period: Duration) -> Self {
        self.anti_entropy_period = period;
        self
    }

    /// Set the neighbor fanout
    pub fn with_neighbor_fanout(mut self, fanout: usize) -> Self {
        self.neighbor_fanout = fanout;
        self
    }

    /// Set the maximum datagram payload size
    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.resend_timeout.is_zero() {
            return Err("Resend timeout must be greater than zero".to_string());
        }

        if self.anti_entropy_period.is_zero() {
            return Err("Anti-entropy period must be greater than zero".to_string());
        }

        if self.neighbor_fanout == 0 {
            return Err("Neighbor fanout must be greater than zero".to_string());
        }

        if self.max_packet_size < 512 {
            return Err("Max packet size must be at least 512 bytes".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GossipConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.neighbor_fanout, 2);
        assert_eq!(config.anti_entropy_period, Duration::from_secs(10));
        assert!(config.resend_timeout < config.anti_entropy_period);
    }

    #[test]
    fn test_config_builder() {
        let config = GossipConfig::new()
            .with_resend_timeout(Duration::from_millis(250))
            .with_anti_entropy_period(Duration::from_secs(2))
            .with_neighbor_fanout(3);

        assert_eq!(config.resend_timeout, Duration::from_millis(250));
        assert_eq!(config.anti_entropy_period, Duration::from_secs(2));
        assert_eq!(config.neighbor_fanout, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = GossipConfig::default();
        config.resend_timeout = Duration::from_millis(0);
        assert!(config.validate().is_err());

        config = GossipConfig::default();
        config.neighbor_fanout = 0;
        assert!(config.validate().is_err());

        config = GossipConfig::default();
        config.max_packet_size = 100;
        assert!(config.validate().is_err());
    }
}
