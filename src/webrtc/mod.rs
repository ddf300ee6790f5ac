//! LAN WebRTC discovery and signaling subsystem.
//!
//! Peers find each other through periodic UDP broadcast announcements and
//! exchange opaque negotiation payloads over a unicast signaling relay.
//! The [`WebRtcController`] exposes the whole thing as an idempotent
//! command surface plus a single FIFO event stream.

pub mod broadcast;
pub mod controller;
pub mod discovery;
pub mod error;
pub mod events;
pub mod peers;
pub mod signaling;
pub mod types;

pub use broadcast::BroadcastServer;
pub use controller::WebRtcController;
pub use discovery::DiscoveryService;
pub use error::{CommandError, RelayError};
pub use events::{Event, EventKind, EventSender};
pub use peers::{PeerRecord, PeerTable};
pub use signaling::SignalingRelay;
pub use types::{Announcement, Identity, ServiceState, SignalingRole, SourceMessage};
