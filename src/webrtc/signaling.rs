//! Signaling relay: forwards opaque negotiation payloads over UDP unicast.
//!
//! Inbound `WEBRTC_SIGNAL:` datagrams are stripped of their prefix and
//! surfaced verbatim as `signaling_message` events with the sender address.
//! Outbound sends are fire-and-forget single datagrams.

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::json;
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::RelayError;
use super::events::{EventKind, EventSender};
use super::types::{
    now_millis, strip_signal_prefix, wrap_signal, Identity, ServiceState, SignalingRole,
    SIGNALING_BUF_SIZE,
};
use crate::config::SignalingConfig;

struct Inner {
    state: ServiceState,
    role: Option<SignalingRole>,
    socket: Option<Arc<UdpSocket>>,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

/// UDP signaling relay.
pub struct SignalingRelay {
    identity: Identity,
    config: SignalingConfig,
    events: EventSender,
    inner: Mutex<Inner>,
}

impl SignalingRelay {
    pub fn new(identity: Identity, config: SignalingConfig, events: EventSender) -> Self {
        Self {
            identity,
            config,
            events,
            inner: Mutex::new(Inner {
                state: ServiceState::Stopped,
                role: None,
                socket: None,
                shutdown: None,
                task: None,
            }),
        }
    }

    pub async fn state(&self) -> ServiceState {
        self.inner.lock().await.state
    }

    /// Role recorded at the last `start`; does not alter relay behavior.
    pub async fn role(&self) -> Option<SignalingRole> {
        self.inner.lock().await.role
    }

    /// Bind the signaling socket and launch the receive loop. Idempotent.
    pub async fn start(&self, role: SignalingRole) -> Result<(), RelayError> {
        let mut inner = self.inner.lock().await;
        if matches!(inner.state, ServiceState::Running | ServiceState::Starting) {
            debug!("signaling already running");
            return Ok(());
        }
        inner.state = ServiceState::Starting;

        let port = self.config.port;
        let socket = match UdpSocket::bind(("0.0.0.0", port)).await {
            Ok(s) => Arc::new(s),
            Err(source) => {
                inner.state = ServiceState::Stopped;
                return Err(RelayError::Bind { port, source });
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(receive_loop(
            socket.clone(),
            self.identity.clone(),
            self.events.clone(),
            shutdown_rx,
        ));

        inner.socket = Some(socket);
        inner.shutdown = Some(shutdown_tx);
        inner.task = Some(task);
        inner.role = Some(role);
        inner.state = ServiceState::Running;

        self.events.emit(
            EventKind::SignalingStarted,
            json!({
                "isOfferer": role == SignalingRole::Offerer,
                "port": port,
                "timestamp": now_millis(),
            }),
        );
        info!("signaling started on port {port} as {role}");
        Ok(())
    }

    /// Close the socket and terminate the receive loop. Idempotent.
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
        inner.socket = None;
        inner.role = None;
        inner.state = ServiceState::Stopped;

        self.events.emit(
            EventKind::SignalingStopped,
            json!({ "timestamp": now_millis() }),
        );
        info!("signaling stopped");
    }

    /// Send one signaling datagram to `destination`.
    ///
    /// `destination` is an address or `address:port`; a bare address gets the
    /// configured signaling port. Fire-and-forget: no acknowledgement, no
    /// retry. Never blocks the caller on resolution or socket contention.
    pub async fn send(&self, payload: &str, destination: &str) -> Result<(), RelayError> {
        let target = self.resolve(destination).await?;
        let wire = wrap_signal(payload);

        // Use the relay socket while running so replies see a stable source
        // port; otherwise a one-shot ephemeral socket does the job.
        let socket = self.inner.lock().await.socket.clone();
        let result = match socket {
            Some(socket) => socket.send_to(wire.as_bytes(), target).await,
            None => {
                let ephemeral = UdpSocket::bind(("0.0.0.0", 0)).await?;
                ephemeral.send_to(wire.as_bytes(), target).await
            }
        };
        result.map_err(|source| RelayError::Send {
            dest: destination.to_string(),
            source,
        })?;

        self.events.emit(
            EventKind::SignalingSent,
            json!({
                "targetIP": destination,
                "timestamp": now_millis(),
            }),
        );
        debug!("sent signaling to {destination}");
        Ok(())
    }

    async fn resolve(&self, destination: &str) -> Result<SocketAddr, RelayError> {
        let with_port = if destination.contains(':') {
            destination.to_string()
        } else {
            format!("{destination}:{}", self.config.port)
        };
        lookup_host(&with_port)
            .await
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| RelayError::UnresolvableAddress(destination.to_string()))
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    identity: Identity,
    events: EventSender,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; SIGNALING_BUF_SIZE];

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
                        let sender_ip = src.ip().to_string();

                        let Some(payload) = strip_signal_prefix(&raw) else {
                            debug!("ignoring non-signaling packet from {sender_ip}");
                            continue;
                        };
                        if sender_ip == identity.local_ip {
                            continue;
                        }

                        events.emit(
                            EventKind::SignalingMessage,
                            json!({
                                "message": payload,
                                "fromIP": sender_ip,
                                "timestamp": now_millis(),
                            }),
                        );
                        debug!("received signaling from {sender_ip}");
                    }
                    Err(e) => {
                        if *shutdown.borrow() {
                            break;
                        }
                        warn!("signaling receive error: {e}");
                    }
                }
            }
        }
    }
    debug!("signaling receive loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webrtc::events::{event_channel, Event};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn make_relay(port: u16) -> (SignalingRelay, UnboundedReceiver<Event>) {
        let (events, rx) = event_channel();
        let relay = SignalingRelay::new(
            Identity::new("dev_sig", "192.168.1.77"),
            SignalingConfig { port },
            events,
        );
        (relay, rx)
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let (relay, mut rx) = make_relay(40721);
        relay.start(SignalingRole::Offerer).await.unwrap();
        relay.start(SignalingRole::Answerer).await.unwrap();
        assert_eq!(relay.state().await, ServiceState::Running);
        // Second start did not rebind or overwrite the role.
        assert_eq!(relay.role().await, Some(SignalingRole::Offerer));

        relay.stop().await;
        relay.stop().await;
        assert_eq!(relay.state().await, ServiceState::Stopped);
        assert_eq!(relay.role().await, None);

        let started = rx.recv().await.unwrap();
        assert_eq!(started.kind, EventKind::SignalingStarted);
        assert_eq!(started.data["isOfferer"], true);
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::SignalingStopped);
    }

    #[tokio::test]
    async fn send_fails_on_unresolvable_destination() {
        let (relay, _rx) = make_relay(40722);
        let err = relay
            .send("offer-sdp", "no-such-host.invalid")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::UnresolvableAddress(_)));
        assert_eq!(err.code(), "ADDRESS_RESOLUTION_ERROR");
    }

    #[tokio::test]
    async fn send_works_without_running_relay() {
        // Fire-and-forget through an ephemeral socket; the peer end is a
        // plain test socket.
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let (relay, _rx) = make_relay(40723);
        relay
            .send("candidate-1", &peer_addr.to_string())
            .await
            .unwrap();

        let mut buf = vec![0u8; 256];
        let (len, _) = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            peer.recv_from(&mut buf),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(
            String::from_utf8_lossy(&buf[..len]),
            "WEBRTC_SIGNAL:candidate-1"
        );
    }

    #[tokio::test]
    async fn bare_destination_gets_configured_port() {
        let (relay, _rx) = make_relay(40724);
        let addr = relay.resolve("127.0.0.1").await.unwrap();
        assert_eq!(addr.port(), 40724);

        let addr = relay.resolve("127.0.0.1:50000").await.unwrap();
        assert_eq!(addr.port(), 50000);
    }
}
