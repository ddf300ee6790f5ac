//! Peer discovery over UDP broadcast.
//!
//! One broadcast-enabled socket, two loops: a receive loop that upserts the
//! peer table from `WEBRTC_PEER:` announcements, and a timer loop that
//! announces the local identity to the subnet every few seconds. Both run
//! until `stop()`, which is the sole cancellation signal.

use std::sync::Arc;

use serde_json::json;
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::error::RelayError;
use super::events::{EventKind, EventSender};
use super::peers::{PeerRecord, PeerTable};
use super::types::{now_millis, Announcement, Identity, ServiceState, DISCOVERY_BUF_SIZE};
use crate::config::DiscoveryConfig;

struct Inner {
    state: ServiceState,
    shutdown: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

/// Broadcast-based peer discovery service.
pub struct DiscoveryService {
    identity: Identity,
    config: DiscoveryConfig,
    peers: Arc<PeerTable>,
    events: EventSender,
    inner: Mutex<Inner>,
}

impl DiscoveryService {
    pub fn new(identity: Identity, config: DiscoveryConfig, events: EventSender) -> Self {
        Self {
            identity,
            config,
            peers: Arc::new(PeerTable::new()),
            events,
            inner: Mutex::new(Inner {
                state: ServiceState::Stopped,
                shutdown: None,
                tasks: Vec::new(),
            }),
        }
    }

    pub async fn state(&self) -> ServiceState {
        self.inner.lock().await.state
    }

    /// Immutable copy of the current peer table.
    pub async fn snapshot_peers(&self) -> Vec<PeerRecord> {
        self.peers.snapshot().await
    }

    /// Bind the discovery socket and launch the receive and announce loops.
    ///
    /// Idempotent: a no-op success when already running. A bind failure
    /// leaves the service Stopped.
    pub async fn start(&self) -> Result<(), RelayError> {
        let mut inner = self.inner.lock().await;
        if matches!(inner.state, ServiceState::Running | ServiceState::Starting) {
            debug!("discovery already running");
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

        let recv_task = tokio::spawn(receive_loop(
            socket.clone(),
            self.identity.clone(),
            self.peers.clone(),
            self.events.clone(),
            shutdown_rx.clone(),
        ));
        let announce_task = tokio::spawn(announce_loop(
            socket,
            self.identity.clone(),
            self.config.clone(),
            shutdown_rx,
        ));

        inner.shutdown = Some(shutdown_tx);
        inner.tasks = vec![recv_task, announce_task];
        inner.state = ServiceState::Running;

        info!("discovery started on port {}", self.config.port);
        Ok(())
    }

    /// Stop the loops, drop the socket, and clear the peer table.
    ///
    /// Idempotent; cancellation completes before this returns.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        if matches!(inner.state, ServiceState::Stopped | ServiceState::Stopping) {
            return;
        }
        inner.state = ServiceState::Stopping;

        if let Some(shutdown) = inner.shutdown.take() {
            let _ = shutdown.send(true);
        }
        for task in inner.tasks.drain(..) {
            let _ = task.await;
        }

        self.peers.clear().await;
        inner.state = ServiceState::Stopped;

        self.events.emit(
            EventKind::DiscoveryStopped,
            json!({ "timestamp": now_millis() }),
        );
        info!("discovery stopped");
    }
}

/// Bind a broadcast-capable UDP socket on the given port.
pub(crate) async fn bind_broadcast(port: u16) -> Result<UdpSocket, RelayError> {
    let socket = UdpSocket::bind(("0.0.0.0", port))
        .await
        .map_err(|source| RelayError::Bind { port, source })?;
    socket.set_broadcast(true)?;
    Ok(socket)
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    identity: Identity,
    peers: Arc<PeerTable>,
    events: EventSender,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; DISCOVERY_BUF_SIZE];

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, src)) => {
                        let raw = String::from_utf8_lossy(&buf[..len]);
                        handle_announcement(&raw, &src.ip().to_string(), &identity, &peers, &events)
                            .await;
                    }
                    Err(e) => {
                        // Expected once during shutdown; transient otherwise.
                        if *shutdown.borrow() {
                            break;
                        }
                        warn!("discovery receive error: {e}");
                    }
                }
            }
        }
    }
    debug!("discovery receive loop exited");
}

async fn handle_announcement(
    raw: &str,
    sender_ip: &str,
    identity: &Identity,
    peers: &PeerTable,
    events: &EventSender,
) {
    let Some(ann) = Announcement::decode(raw) else {
        if raw.starts_with(super::types::PEER_PREFIX) {
            debug!("dropping malformed announcement from {sender_ip}");
        }
        return;
    };

    // Our own broadcasts come back to us; drop them by address and by id.
    if sender_ip == identity.local_ip || ann.device_id == identity.device_id {
        return;
    }

    let is_new = peers.upsert(&ann.device_id, sender_ip).await;
    events.emit(
        EventKind::PeerDiscovered,
        json!({
            "peerId": ann.device_id,
            "peerIP": sender_ip,
            "timestamp": now_millis(),
        }),
    );
    if is_new {
        info!("discovered peer {} at {sender_ip}", ann.device_id);
    } else {
        debug!("refreshed peer {} at {sender_ip}", ann.device_id);
    }
}

async fn announce_loop(
    socket: Arc<UdpSocket>,
    identity: Identity,
    config: DiscoveryConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let target = (config.broadcast_addr.clone(), config.announce_port());
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
                let wire = Announcement::new(&identity.device_id).encode();
                if let Err(e) = socket.send_to(wire.as_bytes(), (target.0.as_str(), target.1)).await {
                    warn!("announce broadcast failed: {e}");
                }
            }
        }
    }
    debug!("discovery announce loop exited");
}
