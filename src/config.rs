// Node Configuration
//
// Runtime configuration for a single membership node, plus the protocol
// constants shared by every node in the cluster.

use std::path::PathBuf;
use std::time::Duration;

/// Number of ring successors each node monitors and gossips to.
pub const NUM_MONITORS: usize = 3;

/// Receive buffer size; one message must fit in a single datagram.
/// Payloads are truncated at MAX_DATAGRAM - 1 bytes.
pub const MAX_DATAGRAM: usize = 1024;

/// Default port for the HTTP control surface.
pub const DEFAULT_CONTROL_PORT: u16 = 7777;

/// Default URL of the downstream membership-change hook.
pub const DEFAULT_NOTIFY_URL: &str = "http://localhost:7778/hooks/membership";

/// Default path of the cluster-shared introducer file.
pub const DEFAULT_DNS_PATH: &str = "./cluster_dns.txt";

/// Per-node runtime configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Unique machine identifier; becomes the prefix of the member id
    pub machine_id: u32,

    /// Whether this node starts as the well-known introducer
    pub introducer: bool,

    /// UDP port for the membership protocol (uniform across the cluster)
    pub port: u16,

    /// Interval between failure-detector rounds
    pub ping_rate: Duration,

    /// Consecutive unanswered pings tolerated before a peer is declared failed
    pub drop_threshold: u32,

    /// Probability in [0, 1] that an outbound datagram is dropped locally
    pub loss_rate: f64,

    /// Path of the cluster-shared introducer file
    pub dns_path: PathBuf,

    /// Port for the HTTP control surface
    pub control_port: u16,

    /// URL notified on every membership change
    pub notify_url: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            machine_id: 0,
            introducer: false,
            port: 4321,
            ping_rate: Duration::from_secs(1),
            drop_threshold: 3,
            loss_rate: 0.0,
            dns_path: PathBuf::from(DEFAULT_DNS_PATH),
            control_port: DEFAULT_CONTROL_PORT,
            notify_url: DEFAULT_NOTIFY_URL.to_string(),
        }
    }
}

impl NodeConfig {
    /// Applies `RING_DNS_PATH`, `RING_CONTROL_PORT` and `RING_NOTIFY_URL`
    /// environment overrides on top of the current values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(path) = std::env::var("RING_DNS_PATH") {
            self.dns_path = PathBuf::from(path);
        }
        if let Some(port) = std::env::var("RING_CONTROL_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
        {
            self.control_port = port;
        }
        if let Ok(url) = std::env::var("RING_NOTIFY_URL") {
            self.notify_url = url;
        }
        self
    }
}

/// Hostname of the local machine as reported by the OS.
///
/// Falls back to the all-ones address when the lookup fails, so the caller
/// always has something to put in a member record.
pub fn local_hostname() -> String {
    match sys_info::hostname() {
        Ok(name) => name,
        Err(e) => {
            tracing::error!("could not read hostname: {}", e);
            "255.255.255.255".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.ping_rate, Duration::from_secs(1));
        assert_eq!(config.drop_threshold, 3);
        assert_eq!(config.loss_rate, 0.0);
        assert_eq!(config.control_port, DEFAULT_CONTROL_PORT);
    }

    #[test]
    fn test_local_hostname_is_nonempty() {
        assert!(!local_hostname().is_empty());
    }
}
