//! Service configuration with per-field defaults.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub signaling: SignalingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// UDP port the discovery socket binds (and announces to).
    #[serde(default = "default_discovery_port")]
    pub port: u16,
    /// Where announcements are sent; the subnet broadcast address in
    /// production, a peer's unicast address in point-to-point setups.
    #[serde(default = "default_broadcast_addr")]
    pub broadcast_addr: String,
    /// Announce to a different port than the bind port. Defaults to the
    /// bind port; mainly useful when two endpoints share one host.
    #[serde(default)]
    pub broadcast_port: Option<u16>,
    /// Interval between presence announcements.
    #[serde(default = "default_broadcast_interval_ms")]
    pub interval_ms: u64,
    /// How long the one-shot discovery client waits for a source response.
    #[serde(default = "default_client_timeout_ms")]
    pub client_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// UDP port for signaling traffic, distinct from the discovery port.
    #[serde(default = "default_signaling_port")]
    pub port: u16,
}

impl DiscoveryConfig {
    /// Port announcements are addressed to.
    pub fn announce_port(&self) -> u16 {
        self.broadcast_port.unwrap_or(self.port)
    }
}

fn default_discovery_port() -> u16 {
    7777
}

fn default_signaling_port() -> u16 {
    9999
}

fn default_broadcast_addr() -> String {
    "255.255.255.255".to_string()
}

fn default_broadcast_interval_ms() -> u64 {
    3000
}

fn default_client_timeout_ms() -> u64 {
    5000
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: default_discovery_port(),
            broadcast_addr: default_broadcast_addr(),
            broadcast_port: None,
            interval_ms: default_broadcast_interval_ms(),
            client_timeout_ms: default_client_timeout_ms(),
        }
    }
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            port: default_signaling_port(),
        }
    }
}
