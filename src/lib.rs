pub mod config;
pub mod webrtc;

pub use config::{Config, DiscoveryConfig, SignalingConfig};
pub use webrtc::{
    CommandError, Event, EventKind, Identity, PeerRecord, RelayError, ServiceState,
    SignalingRole, WebRtcController,
};
