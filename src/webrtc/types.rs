//! Wire types for LAN discovery and signaling.
//!
//! Discovery announcements travel as `"WEBRTC_PEER:" + JSON` broadcast
//! datagrams; signaling payloads as `"WEBRTC_SIGNAL:" + <opaque>` unicast.
//! Source/availability traffic on the discovery port is raw JSON with a
//! `type` discriminator.

use serde::{Deserialize, Serialize};

/// Prefix for peer presence announcements on the discovery port.
pub const PEER_PREFIX: &str = "WEBRTC_PEER:";

/// Prefix for signaling payloads on the signaling port.
pub const SIGNAL_PREFIX: &str = "WEBRTC_SIGNAL:";

/// Receive buffer for discovery packets.
pub const DISCOVERY_BUF_SIZE: usize = 1024;

/// Receive buffer for signaling packets (SDP offers can get long).
pub const SIGNALING_BUF_SIZE: usize = 4096;

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Generate a short base36 salt for device ids.
pub fn generate_salt() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..6)
        .map(|_| char::from_digit(rng.gen_range(0..36), 36).unwrap())
        .collect()
}

/// Local device identity, injected into every service.
///
/// The application decides how the local IP is obtained; this subsystem only
/// uses it to suppress its own broadcast traffic and to fill in payloads.
#[derive(Debug, Clone)]
pub struct Identity {
    pub device_id: String,
    pub local_ip: String,
}

impl Identity {
    pub fn new(device_id: impl Into<String>, local_ip: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            local_ip: local_ip.into(),
        }
    }

    /// Derive an identity from the hostname plus a random salt.
    pub fn generate(local_ip: impl Into<String>) -> Self {
        let model = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "lancast-device".into());
        Self {
            device_id: format!("{model}_{}", generate_salt()),
            local_ip: local_ip.into(),
        }
    }
}

/// Periodic presence announcement, sent prefixed with [`PEER_PREFIX`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Announcement {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: i64,
}

impl Announcement {
    pub fn new(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            kind: "webrtc_peer".to_string(),
            timestamp: now_millis(),
        }
    }

    /// Encode as a discovery datagram: prefix + JSON.
    pub fn encode(&self) -> String {
        // Announcement serialization cannot fail: all fields are plain data.
        format!("{PEER_PREFIX}{}", serde_json::to_string(self).unwrap())
    }

    /// Parse a discovery datagram. Returns `None` for payloads without the
    /// prefix, undecodable JSON, or a missing/empty `deviceId`.
    pub fn decode(raw: &str) -> Option<Self> {
        let body = raw.strip_prefix(PEER_PREFIX)?;
        let ann: Announcement = serde_json::from_str(body).ok()?;
        if ann.device_id.is_empty() {
            return None;
        }
        Some(ann)
    }
}

/// Un-prefixed JSON messages exchanged on the discovery port by the
/// broadcast-server / discovery-client pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SourceMessage {
    /// A mirroring source advertising itself and its signaling port.
    #[serde(rename = "webrtc_source_available")]
    SourceAvailable {
        #[serde(rename = "deviceId")]
        device_id: String,
        #[serde(rename = "localIP")]
        local_ip: String,
        #[serde(rename = "signalingPort")]
        signaling_port: u16,
        timestamp: i64,
    },
    /// A viewer asking whether any source is on the subnet.
    #[serde(rename = "webrtc_discovery_request")]
    DiscoveryRequest {
        #[serde(rename = "deviceId")]
        device_id: String,
        #[serde(rename = "localIP")]
        local_ip: String,
        timestamp: i64,
    },
    /// One-shot toggle broadcast when screen sharing starts or stops.
    #[serde(rename = "screen_share_availability")]
    ScreenShareAvailability {
        #[serde(rename = "deviceId")]
        device_id: String,
        #[serde(rename = "localIP")]
        local_ip: String,
        available: bool,
        timestamp: i64,
    },
}

impl SourceMessage {
    pub fn source_available(identity: &Identity, signaling_port: u16) -> Self {
        SourceMessage::SourceAvailable {
            device_id: identity.device_id.clone(),
            local_ip: identity.local_ip.clone(),
            signaling_port,
            timestamp: now_millis(),
        }
    }

    pub fn discovery_request(identity: &Identity) -> Self {
        SourceMessage::DiscoveryRequest {
            device_id: identity.device_id.clone(),
            local_ip: identity.local_ip.clone(),
            timestamp: now_millis(),
        }
    }

    pub fn screen_share(identity: &Identity, available: bool) -> Self {
        SourceMessage::ScreenShareAvailability {
            device_id: identity.device_id.clone(),
            local_ip: identity.local_ip.clone(),
            available,
            timestamp: now_millis(),
        }
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap()
    }

    pub fn decode(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }
}

/// Strip the signaling prefix from an inbound datagram.
///
/// The inner payload stays opaque; the relay never parses it.
pub fn strip_signal_prefix(raw: &str) -> Option<&str> {
    raw.strip_prefix(SIGNAL_PREFIX)
}

/// Wrap an outbound signaling payload with the wire prefix.
pub fn wrap_signal(payload: &str) -> String {
    format!("{SIGNAL_PREFIX}{payload}")
}

/// Lifecycle state of a network service.
///
/// At most one transition is in flight per service: `stop` finishes its
/// Stopping→Stopped transition before returning, so callers only ever
/// observe Stopped, Starting, or Running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceState::Stopped => write!(f, "stopped"),
            ServiceState::Starting => write!(f, "starting"),
            ServiceState::Running => write!(f, "running"),
            ServiceState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Role the local end plays in the upcoming WebRTC negotiation.
///
/// Recorded for the application's use; the relay behaves identically either
/// way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingRole {
    Offerer,
    Answerer,
}

impl std::fmt::Display for SignalingRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalingRole::Offerer => write!(f, "offerer"),
            SignalingRole::Answerer => write!(f, "answerer"),
        }
    }
}
