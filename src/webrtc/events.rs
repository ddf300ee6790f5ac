//! Event stream from the network services to the application.
//!
//! A single unbounded mpsc channel; one consumer, strict FIFO across all
//! enqueued events. Late subscribers miss prior events (no replay buffer).

use serde_json::Value;
use tokio::sync::mpsc;

use super::types::now_millis;

/// Kinds of events delivered to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Ready,
    PeerDiscovered,
    DiscoveryStopped,
    SignalingStarted,
    SignalingStopped,
    SignalingSent,
    SignalingMessage,
    BroadcastServerStarted,
    BroadcastServerStopped,
    DiscoveryClientStarted,
    SourceDiscovered,
    NoSourcesFound,
    ScreenCaptureStarted,
    ScreenCaptureStopped,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Ready => "webrtc_ready",
            EventKind::PeerDiscovered => "peer_discovered",
            EventKind::DiscoveryStopped => "discovery_stopped",
            EventKind::SignalingStarted => "signaling_started",
            EventKind::SignalingStopped => "signaling_stopped",
            EventKind::SignalingSent => "signaling_sent",
            EventKind::SignalingMessage => "signaling_message",
            EventKind::BroadcastServerStarted => "broadcast_server_started",
            EventKind::BroadcastServerStopped => "broadcast_server_stopped",
            EventKind::DiscoveryClientStarted => "discovery_client_started",
            EventKind::SourceDiscovered => "webrtc_source_discovered",
            EventKind::NoSourcesFound => "no_sources_found",
            EventKind::ScreenCaptureStarted => "screen_capture_started",
            EventKind::ScreenCaptureStopped => "screen_capture_stopped",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single notification record.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub data: Value,
    pub timestamp: i64,
}

impl Event {
    pub fn new(kind: EventKind, data: Value) -> Self {
        Self {
            kind,
            data,
            timestamp: now_millis(),
        }
    }

    /// The `{type, data, timestamp}` shape handed to the application layer.
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "type": self.kind.as_str(),
            "data": self.data,
            "timestamp": self.timestamp,
        })
    }
}

/// Sending half handed to every service.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSender {
    /// Emit an event. A closed channel (application went away) is not an
    /// error for the emitting service.
    pub fn emit(&self, kind: EventKind, data: Value) {
        let _ = self.tx.send(Event::new(kind, data));
    }
}

/// Create the event channel: one sender (cloneable), one consumer.
pub fn event_channel() -> (EventSender, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}
