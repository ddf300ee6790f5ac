//! Source announcement server and one-shot discovery client.
//!
//! A mirroring source runs the [`BroadcastServer`]: it advertises
//! `webrtc_source_available` (with its signaling port) on the discovery port
//! every interval, and answers `webrtc_discovery_request` datagrams directly
//! to the requester. A viewer runs the one-shot client: broadcast one
//! request, wait a bounded time for one source, report either way.

use std::sync::Arc;

use serde_json::json;
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::discovery::bind_broadcast;
use super::error::RelayError;
use super::events::{EventKind, EventSender};
use super::types::{Identity, ServiceState, SourceMessage, DISCOVERY_BUF_SIZE};
use crate::config::DiscoveryConfig;

struct Inner {
    state: ServiceState,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

/// Periodic `webrtc_source_available` broadcaster.
///
/// Shares the discovery port with [`super::discovery::DiscoveryService`];
/// the two are mutually exclusive modes, and starting the second surfaces a
/// bind error.
pub struct BroadcastServer {
    identity: Identity,
    config: DiscoveryConfig,
    signaling_port: u16,
    events: EventSender,
    inner: Mutex<Inner>,
}

impl BroadcastServer {
    pub fn new(
        identity: Identity,
        config: DiscoveryConfig,
        signaling_port: u16,
        events: EventSender,
    ) -> Self {
        Self {
            identity,
            config,
            signaling_port,
            events,
            inner: Mutex::new(Inner {
                state: ServiceState::Stopped,
                shutdown: None,
                task: None,
            }),
        }
    }

    pub async fn state(&self) -> ServiceState {
        self.inner.lock().await.state
    }

    /// Bind the discovery port and start advertising. Idempotent.
    pub async fn start(&self) -> Result<(), RelayError> {
        let mut inner = self.inner.lock().await;
        if matches!(inner.state, ServiceState::Running | ServiceState::Starting) {
            debug!("broadcast server already running");
            return Ok(());
        }
        inner.state = ServiceState::Starting;

        let socket = match bind_broadcast(self.config.port).await {
            Ok(s) => Arc::new(s),
            Err(e) => {
                inner.state = ServiceState::Stopped;
                return Err(e);
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(serve_loop(
            socket,
            self.identity.clone(),
            self.config.clone(),
            self.signaling_port,
            shutdown_rx,
        ));

        inner.shutdown = Some(shutdown_tx);
        inner.task = Some(task);
        inner.state = ServiceState::Running;

        self.events.emit(
            EventKind::BroadcastServerStarted,
            json!({
                "port": self.config.port,
                "deviceId": self.identity.device_id,
            }),
        );
        info!("broadcast server started on port {}", self.config.port);
        Ok(())
    }

    /// Stop advertising and release the port. Idempotent.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        if matches!(inner.state, ServiceState::Stopped | ServiceState::Stopping) {
            return;
        }
        inner.state = ServiceState::Stopping;

        if let Some(shutdown) = inner.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(task) = inner.task.take() {
            let _ = task.await;
        }
        inner.state = ServiceState::Stopped;

        self.events.emit(
            EventKind::BroadcastServerStopped,
            json!({ "deviceId": self.identity.device_id }),
        );
        info!("broadcast server stopped");
    }
}

async fn serve_loop(
    socket: Arc<UdpSocket>,
    identity: Identity,
    config: DiscoveryConfig,
    signaling_port: u16,
    mut shutdown: watch::Receiver<bool>,
) {
    let target = (config.broadcast_addr.clone(), config.announce_port());
    let mut buf = vec![0u8; DISCOVERY_BUF_SIZE];
    let mut ticker = interval(Duration::from_millis(config.interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let wire = SourceMessage::source_available(&identity, signaling_port).encode();
                if let Err(e) = socket.send_to(wire.as_bytes(), (target.0.as_str(), target.1)).await {
                    warn!("source broadcast failed: {e}");
                }
            }
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, src)) => {
                        let raw = String::from_utf8_lossy(&buf[..len]);
                        let Some(SourceMessage::DiscoveryRequest { device_id, .. }) =
                            SourceMessage::decode(&raw)
                        else {
                            continue;
                        };
                        if device_id == identity.device_id {
                            continue;
                        }
                        // Answer the requester directly at its source address.
                        let reply = SourceMessage::source_available(&identity, signaling_port)
                            .encode();
                        if let Err(e) = socket.send_to(reply.as_bytes(), src).await {
                            warn!("discovery request reply to {src} failed: {e}");
                        } else {
                            debug!("answered discovery request from {device_id} at {src}");
                        }
                    }
                    Err(e) => {
                        if *shutdown.borrow() {
                            break;
                        }
                        warn!("broadcast server receive error: {e}");
                    }
                }
            }
        }
    }
    debug!("broadcast server loop exited");
}

/// One-shot discovery client: broadcast a request, wait for one source.
///
/// A timeout is a normal outcome reported as `no_sources_found`, not an
/// error. Runs to completion; the controller spawns it in the background.
pub async fn run_discovery_client(
    identity: Identity,
    config: DiscoveryConfig,
    events: EventSender,
) -> Result<(), RelayError> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
    socket.set_broadcast(true)?;

    let request = SourceMessage::discovery_request(&identity).encode();
    socket
        .send_to(
            request.as_bytes(),
            (config.broadcast_addr.as_str(), config.announce_port()),
        )
        .await
        .map_err(|source| RelayError::Send {
            dest: format!("{}:{}", config.broadcast_addr, config.announce_port()),
            source,
        })?;
    debug!("discovery request sent, waiting for sources");

    let deadline = Instant::now() + Duration::from_millis(config.client_timeout_ms);
    let mut buf = vec![0u8; DISCOVERY_BUF_SIZE];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let Ok(result) = tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await else {
            break;
        };
        let (len, src) = match result {
            Ok(ok) => ok,
            Err(e) => {
                warn!("discovery client receive error: {e}");
                continue;
            }
        };

        let raw = String::from_utf8_lossy(&buf[..len]);
        if let Some(SourceMessage::SourceAvailable {
            device_id,
            local_ip,
            signaling_port,
            ..
        }) = SourceMessage::decode(&raw)
        {
            if device_id == identity.device_id {
                continue;
            }
            info!("discovered source {device_id} at {local_ip} (via {src})");
            events.emit(
                EventKind::SourceDiscovered,
                json!({
                    "sourceIP": local_ip,
                    "sourceDeviceId": device_id,
                    "signalingPort": signaling_port,
                }),
            );
            return Ok(());
        }
    }

    debug!("discovery client timed out, no sources found");
    events.emit(
        EventKind::NoSourcesFound,
        json!({ "deviceId": identity.device_id }),
    );
    Ok(())
}

/// One-shot broadcast flipping the screen-share availability flag for the
/// subnet. Sent from an ephemeral socket; nothing listens for replies.
pub async fn broadcast_screen_share(
    identity: &Identity,
    config: &DiscoveryConfig,
    available: bool,
) -> Result<(), RelayError> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
    socket.set_broadcast(true)?;

    let wire = SourceMessage::screen_share(identity, available).encode();
    socket
        .send_to(
            wire.as_bytes(),
            (config.broadcast_addr.as_str(), config.announce_port()),
        )
        .await
        .map_err(|source| RelayError::Send {
            dest: format!("{}:{}", config.broadcast_addr, config.announce_port()),
            source,
        })?;
    debug!("broadcast screen share availability: {available}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webrtc::events::event_channel;

    fn loopback_config(port: u16, timeout_ms: u64) -> DiscoveryConfig {
        DiscoveryConfig {
            port,
            broadcast_addr: "127.0.0.1".to_string(),
            broadcast_port: None,
            interval_ms: 500,
            client_timeout_ms: timeout_ms,
        }
    }

    #[tokio::test]
    async fn server_start_stop_idempotent() {
        let (events, mut rx) = event_channel();
        let server = BroadcastServer::new(
            Identity::new("src_dev", "192.168.1.5"),
            loopback_config(40731, 1000),
            9999,
            events,
        );

        server.start().await.unwrap();
        server.start().await.unwrap();
        assert_eq!(server.state().await, ServiceState::Running);
        server.stop().await;
        server.stop().await;
        assert_eq!(server.state().await, ServiceState::Stopped);

        let started = rx.recv().await.unwrap();
        assert_eq!(started.kind, EventKind::BroadcastServerStarted);
        assert_eq!(started.data["port"], 40731);
        assert_eq!(
            rx.recv().await.unwrap().kind,
            EventKind::BroadcastServerStopped
        );
    }

    #[tokio::test]
    async fn client_finds_running_source() {
        let (server_events, _srx) = event_channel();
        let server = BroadcastServer::new(
            Identity::new("src_dev", "192.168.1.5"),
            loopback_config(40732, 1000),
            9999,
            server_events,
        );
        server.start().await.unwrap();

        let (client_events, mut crx) = event_channel();
        run_discovery_client(
            Identity::new("viewer_dev", "192.168.1.6"),
            loopback_config(40732, 3000),
            client_events,
        )
        .await
        .unwrap();

        let ev = crx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::SourceDiscovered);
        assert_eq!(ev.data["sourceDeviceId"], "src_dev");
        assert_eq!(ev.data["sourceIP"], "192.168.1.5");
        assert_eq!(ev.data["signalingPort"], 9999);

        server.stop().await;
    }

    #[tokio::test]
    async fn client_times_out_without_source() {
        let (events, mut rx) = event_channel();
        let started = std::time::Instant::now();
        run_discovery_client(
            Identity::new("viewer_dev", "192.168.1.6"),
            loopback_config(40733, 300),
            events,
        )
        .await
        .unwrap();
        assert!(started.elapsed() >= std::time::Duration::from_millis(300));

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::NoSourcesFound);
    }

    #[tokio::test]
    async fn screen_share_broadcast_reaches_subnet() {
        let listener = UdpSocket::bind("127.0.0.1:40734").await.unwrap();

        broadcast_screen_share(
            &Identity::new("src_dev", "192.168.1.5"),
            &loopback_config(40734, 1000),
            true,
        )
        .await
        .unwrap();

        let mut buf = vec![0u8; DISCOVERY_BUF_SIZE];
        let (len, _) = tokio::time::timeout(
            Duration::from_secs(2),
            listener.recv_from(&mut buf),
        )
        .await
        .unwrap()
        .unwrap();

        let raw = String::from_utf8_lossy(&buf[..len]);
        match SourceMessage::decode(&raw).unwrap() {
            SourceMessage::ScreenShareAvailability {
                device_id,
                available,
                ..
            } => {
                assert_eq!(device_id, "src_dev");
                assert!(available);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
