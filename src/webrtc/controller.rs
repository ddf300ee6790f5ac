//! Command surface over the discovery and signaling services.
//!
//! Owns every service as instance state (no process globals), so a whole
//! controller can be constructed and torn down per test. Every command
//! returns either a JSON success value or a [`CommandError`] with a
//! machine-readable code; none panic or leave a service half-started.

use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::broadcast::{broadcast_screen_share, run_discovery_client, BroadcastServer};
use super::discovery::DiscoveryService;
use super::error::CommandError;
use super::events::{event_channel, Event, EventKind, EventSender};
use super::peers::PeerRecord;
use super::signaling::SignalingRelay;
use super::types::{now_millis, Identity, ServiceState, SignalingRole};
use crate::config::Config;

/// Top-level controller for the LAN mirroring network services.
pub struct WebRtcController {
    identity: Identity,
    config: Config,
    events: EventSender,
    discovery: DiscoveryService,
    signaling: SignalingRelay,
    broadcast: BroadcastServer,
    screen_share: AtomicBool,
}

impl WebRtcController {
    /// Build a controller and hand back the single event consumer.
    pub fn new(identity: Identity, config: Config) -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (events, rx) = event_channel();
        let controller = Self {
            discovery: DiscoveryService::new(
                identity.clone(),
                config.discovery.clone(),
                events.clone(),
            ),
            signaling: SignalingRelay::new(
                identity.clone(),
                config.signaling.clone(),
                events.clone(),
            ),
            broadcast: BroadcastServer::new(
                identity.clone(),
                config.discovery.clone(),
                config.signaling.port,
                events.clone(),
            ),
            identity,
            config,
            events,
            screen_share: AtomicBool::new(false),
        };
        (controller, rx)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub async fn discovery_state(&self) -> ServiceState {
        self.discovery.state().await
    }

    pub async fn signaling_state(&self) -> ServiceState {
        self.signaling.state().await
    }

    /// Announce readiness to the application.
    pub fn initialize(&self) -> Result<Value, CommandError> {
        self.events.emit(
            EventKind::Ready,
            json!({
                "deviceId": self.identity.device_id,
                "localIP": self.identity.local_ip,
                "timestamp": now_millis(),
            }),
        );
        Ok(json!({
            "deviceId": self.identity.device_id,
            "localIP": self.identity.local_ip,
            "initialized": true,
        }))
    }

    pub async fn start_discovery(&self) -> Result<Value, CommandError> {
        self.discovery
            .start()
            .await
            .map_err(|e| CommandError::wrap("DISCOVERY_ERROR", &e))?;
        Ok(json!(true))
    }

    pub async fn stop_discovery(&self) -> Result<Value, CommandError> {
        self.discovery.stop().await;
        Ok(json!(true))
    }

    pub async fn start_signaling(&self, role: SignalingRole) -> Result<Value, CommandError> {
        self.signaling
            .start(role)
            .await
            .map_err(|e| CommandError::wrap("SIGNALING_ERROR", &e))?;
        Ok(json!(true))
    }

    pub async fn stop_signaling(&self) -> Result<Value, CommandError> {
        self.signaling.stop().await;
        Ok(json!(true))
    }

    pub async fn send_signaling(
        &self,
        payload: &str,
        target: &str,
    ) -> Result<Value, CommandError> {
        self.signaling
            .send(payload, target)
            .await
            .map_err(|e| CommandError::wrap("SIGNALING_SEND_ERROR", &e))?;
        Ok(json!(true))
    }

    /// The injected identity; anything richer (SSID, link speed) belongs to
    /// the platform layer that injected it.
    pub fn get_local_network_info(&self) -> Result<Value, CommandError> {
        Ok(json!({
            "deviceId": self.identity.device_id,
            "localIP": self.identity.local_ip,
        }))
    }

    pub async fn get_discovered_peers(&self) -> Result<Value, CommandError> {
        let peers: Vec<Value> = self
            .snapshot_peers()
            .await
            .into_iter()
            .map(|p| json!({ "peerId": p.peer_id, "peerIP": p.address }))
            .collect();
        Ok(json!(peers))
    }

    pub async fn snapshot_peers(&self) -> Vec<PeerRecord> {
        self.discovery.snapshot_peers().await
    }

    pub async fn start_broadcast_server(&self) -> Result<Value, CommandError> {
        self.broadcast
            .start()
            .await
            .map_err(|e| CommandError::wrap("WEBRTC_BROADCAST_ERROR", &e))?;
        Ok(json!({ "status": "started", "port": self.config.discovery.port }))
    }

    pub async fn stop_broadcast_server(&self) -> Result<Value, CommandError> {
        self.broadcast.stop().await;
        Ok(json!({ "status": "stopped" }))
    }

    /// Fire the one-shot discovery request in the background; the outcome
    /// arrives as a `webrtc_source_discovered` or `no_sources_found` event.
    pub fn start_discovery_client(&self) -> Result<Value, CommandError> {
        let identity = self.identity.clone();
        let config = self.config.discovery.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            if let Err(e) = run_discovery_client(identity, config, events).await {
                warn!("discovery client failed: {e}");
            }
        });

        self.events.emit(
            EventKind::DiscoveryClientStarted,
            json!({ "deviceId": self.identity.device_id }),
        );
        Ok(json!({ "status": "started" }))
    }

    /// Mark the screen as shareable and tell the subnet. The actual capture
    /// pipeline lives outside this subsystem.
    pub fn start_screen_capture(&self) -> Result<Value, CommandError> {
        self.screen_share.store(true, Ordering::SeqCst);
        self.broadcast_availability(true);

        self.events.emit(
            EventKind::ScreenCaptureStarted,
            json!({
                "deviceId": self.identity.device_id,
                "localIP": self.identity.local_ip,
                "ready": true,
            }),
        );
        Ok(json!({
            "status": "started",
            "deviceId": self.identity.device_id,
            "localIP": self.identity.local_ip,
        }))
    }

    pub fn stop_screen_capture(&self) -> Result<Value, CommandError> {
        self.screen_share.store(false, Ordering::SeqCst);
        self.broadcast_availability(false);

        self.events.emit(
            EventKind::ScreenCaptureStopped,
            json!({ "deviceId": self.identity.device_id }),
        );
        Ok(json!({ "status": "stopped" }))
    }

    pub fn screen_share_active(&self) -> bool {
        self.screen_share.load(Ordering::SeqCst)
    }

    /// Stop everything: screen-share flag, broadcast server, discovery,
    /// signaling. Each stop is independently safe regardless of the others.
    pub async fn stop_all(&self) -> Result<Value, CommandError> {
        if self.screen_share.swap(false, Ordering::SeqCst) {
            self.broadcast_availability(false);
        }
        self.broadcast.stop().await;
        self.discovery.stop().await;
        self.signaling.stop().await;
        info!("all network services stopped");
        Ok(json!(true))
    }

    fn broadcast_availability(&self, available: bool) {
        let identity = self.identity.clone();
        let config = self.config.discovery.clone();
        tokio::spawn(async move {
            if let Err(e) = broadcast_screen_share(&identity, &config, available).await {
                warn!("screen share availability broadcast failed: {e}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiscoveryConfig;

    fn controller(
        discovery_port: u16,
        signaling_port: u16,
    ) -> (WebRtcController, mpsc::UnboundedReceiver<Event>) {
        let config = Config {
            discovery: DiscoveryConfig {
                port: discovery_port,
                broadcast_addr: "127.0.0.1".to_string(),
                broadcast_port: None,
                interval_ms: 200,
                client_timeout_ms: 500,
            },
            signaling: crate::config::SignalingConfig {
                port: signaling_port,
            },
        };
        WebRtcController::new(Identity::new("ctrl_dev", "192.168.1.90"), config)
    }

    #[tokio::test]
    async fn initialize_reports_identity_and_emits_ready() {
        let (ctrl, mut rx) = controller(40741, 40742);
        let value = ctrl.initialize().unwrap();
        assert_eq!(value["deviceId"], "ctrl_dev");
        assert_eq!(value["initialized"], true);

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::Ready);
        assert_eq!(ev.data["localIP"], "192.168.1.90");
    }

    #[tokio::test]
    async fn discovery_lifecycle_via_commands() {
        let (ctrl, _rx) = controller(40743, 40744);

        ctrl.start_discovery().await.unwrap();
        ctrl.start_discovery().await.unwrap();
        assert_eq!(ctrl.discovery_state().await, ServiceState::Running);

        let peers = ctrl.get_discovered_peers().await.unwrap();
        assert_eq!(peers, json!([]));

        ctrl.stop_discovery().await.unwrap();
        ctrl.stop_discovery().await.unwrap();
        assert_eq!(ctrl.discovery_state().await, ServiceState::Stopped);
    }

    #[tokio::test]
    async fn discovery_and_broadcast_server_are_exclusive() {
        let (ctrl, _rx) = controller(40745, 40746);

        ctrl.start_discovery().await.unwrap();
        let err = ctrl.start_broadcast_server().await.unwrap_err();
        assert_eq!(err.code, "WEBRTC_BROADCAST_ERROR");
        assert!(err.message.contains("BIND_ERROR"));

        // The failed start left nothing half-open; stop_all still works.
        ctrl.stop_all().await.unwrap();
        assert_eq!(ctrl.discovery_state().await, ServiceState::Stopped);

        // And the port is free for the broadcast server now.
        ctrl.start_broadcast_server().await.unwrap();
        ctrl.stop_broadcast_server().await.unwrap();
    }

    #[tokio::test]
    async fn send_signaling_surfaces_resolution_failure() {
        let (ctrl, _rx) = controller(40747, 40748);
        let err = ctrl
            .send_signaling("offer-sdp", "no-such-host.invalid")
            .await
            .unwrap_err();
        assert_eq!(err.code, "SIGNALING_SEND_ERROR");
    }

    #[tokio::test]
    async fn stop_all_is_safe_on_fresh_controller() {
        let (ctrl, _rx) = controller(40749, 40750);
        ctrl.stop_all().await.unwrap();
        ctrl.stop_all().await.unwrap();
        assert_eq!(ctrl.discovery_state().await, ServiceState::Stopped);
        assert_eq!(ctrl.signaling_state().await, ServiceState::Stopped);
    }

    #[tokio::test]
    async fn screen_capture_flag_cleared_by_stop_all() {
        let (ctrl, _rx) = controller(40751, 40752);
        ctrl.start_screen_capture().unwrap();
        assert!(ctrl.screen_share_active());
        ctrl.stop_all().await.unwrap();
        assert!(!ctrl.screen_share_active());
    }

    #[tokio::test]
    async fn network_info_is_the_injected_identity() {
        let (ctrl, _rx) = controller(40753, 40754);
        let info = ctrl.get_local_network_info().unwrap();
        assert_eq!(info["deviceId"], "ctrl_dev");
        assert_eq!(info["localIP"], "192.168.1.90");
    }
}
