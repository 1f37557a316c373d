//! quinn-backed [`Transport`] for the reachability engine.
//!
//! The engine is synchronous; this crate owns a private tokio runtime and drives one task per
//! connection on it. Every attempt gets its own client endpoint on a fresh ephemeral socket, so
//! datagram and flight counts can be taken at the socket for that connection alone.
//!
//! The negotiated version is the one the client offers.

mod socket;
mod tls;

use socket::{CountingSocket, FlightLog};

use quic_probe::{
    ConnectRequest, ConnectionEvent, ConnectionHandle, EventSink, PeerStream, QuicVersion, ReachConfig, Statistics,
    Transport, TransportError, TransportSettings,
};
use quinn::{Connecting, Connection, VarInt};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio::sync::Notify;
use tracing::{debug, trace};

const QUIC_V1: u32 = 0x0000_0001;

pub struct QuicTransport {
    runtime: Runtime,
    client_config: quinn::ClientConfig,
    local_address: Option<SocketAddr>,
}

impl QuicTransport {
    pub fn new(config: &ReachConfig) -> Result<Self, TransportError> {
        if let Some(local) = config.local_address.filter(|a| a.port() != 0) {
            // Each attempt binds its own socket; a fixed port would collide.
            return Err(TransportError::Config(format!("local address {local} must not name a port")));
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("quic-io")
            .build()?;
        let crypto = tls::client_crypto(config.credentials, &config.alpn)?;
        let mut client_config = quinn::ClientConfig::new(Arc::new(crypto));
        client_config.transport_config(Arc::new(transport_config(&config.settings)?));
        client_config.version(QUIC_V1);
        debug!(credentials = ?config.credentials, alpn = ?config.alpn, "quic transport ready");
        Ok(QuicTransport {
            runtime,
            client_config,
            local_address: config.local_address,
        })
    }

    fn resolve(&self, request: &ConnectRequest) -> Result<SocketAddr, TransportError> {
        if let Some(addr) = request.remote_override {
            return Ok(addr);
        }
        let resolve_err = |reason: String| TransportError::Resolve { host: request.host.clone(), reason };
        let addrs: Vec<SocketAddr> = (request.host.as_str(), request.port)
            .to_socket_addrs()
            .map_err(|e| resolve_err(e.to_string()))?
            .collect();
        // A bound local address pins the family.
        let picked = match self.local_address {
            Some(local) => addrs.iter().find(|a| a.is_ipv4() == local.is_ipv4()),
            None => addrs.first(),
        };
        picked.copied().ok_or_else(|| resolve_err("no usable addresses".into()))
    }

    /// A client endpoint on a new socket whose traffic is tallied into `log`. Must be called
    /// inside the runtime.
    fn endpoint_for(&self, remote: &SocketAddr, log: Arc<FlightLog>) -> Result<quinn::Endpoint, TransportError> {
        let bind = self.local_address.unwrap_or_else(|| {
            if remote.is_ipv4() {
                (Ipv4Addr::UNSPECIFIED, 0).into()
            } else {
                (Ipv6Addr::UNSPECIFIED, 0).into()
            }
        });
        let udp = std::net::UdpSocket::bind(bind)?;
        let runtime: Arc<dyn quinn::Runtime> = Arc::new(quinn::TokioRuntime);
        let socket = Arc::new(CountingSocket::new(runtime.wrap_udp_socket(udp)?, log));
        let endpoint = quinn::Endpoint::new_with_abstract_socket(quinn::EndpointConfig::default(), None, socket, runtime)?;
        trace!(local = ?endpoint.local_addr().ok(), "client endpoint bound");
        Ok(endpoint)
    }
}

impl Transport for QuicTransport {
    fn start(&self, request: &ConnectRequest, events: Arc<dyn EventSink>) -> Result<Box<dyn ConnectionHandle>, TransportError> {
        let remote = self.resolve(request)?;
        let flights = Arc::new(FlightLog::default());
        let started = Instant::now();
        let (endpoint, connecting) = {
            let _rt = self.runtime.enter();
            let endpoint = self.endpoint_for(&remote, flights.clone())?;
            trace!(host = %request.host, %remote, "connecting");
            let connecting = endpoint
                .connect_with(self.client_config.clone(), remote, &request.host)
                .map_err(|e| TransportError::Rejected(e.to_string()))?;
            (endpoint, connecting)
        };
        let stop = Arc::new(Notify::new());
        let connected = Arc::new(AtomicBool::new(false));
        let task = Task { endpoint, flights: flights.clone(), started, events, stop: stop.clone(), connected: connected.clone() };
        self.runtime.spawn(drive(connecting, task));
        Ok(Box::new(QuicHandle { stop, flights, connected }))
    }
}

struct QuicHandle {
    stop: Arc<Notify>,
    flights: Arc<FlightLog>,
    connected: Arc<AtomicBool>,
}

impl ConnectionHandle for QuicHandle {
    fn shutdown(&self) {
        self.stop.notify_one();
    }

    fn statistics(&self) -> Option<Statistics> {
        self.connected.load(Ordering::Acquire).then(|| self.flights.totals())
    }
}

/// What a connection's driver task owns besides the handshake itself. Holding the endpoint
/// keeps the socket open until the connection is closed.
struct Task {
    endpoint: quinn::Endpoint,
    flights: Arc<FlightLog>,
    started: Instant,
    events: Arc<dyn EventSink>,
    stop: Arc<Notify>,
    connected: Arc<AtomicBool>,
}

#[derive(Debug)]
enum QuicPeerStream {
    Uni(quinn::RecvStream),
    Bi(quinn::SendStream, quinn::RecvStream),
}

impl PeerStream for QuicPeerStream {
    fn close(self: Box<Self>) {
        // Already-closed streams are fine to ignore.
        match *self {
            QuicPeerStream::Uni(mut recv) => {
                let _ = recv.stop(VarInt::from_u32(0));
            }
            QuicPeerStream::Bi(mut send, mut recv) => {
                let _ = send.reset(VarInt::from_u32(0));
                let _ = recv.stop(VarInt::from_u32(0));
            }
        }
    }
}

/// One connection's lifecycle. Always ends by delivering `ShutdownComplete`.
async fn drive(connecting: Connecting, task: Task) {
    let events = task.events.clone();
    if let Some(connection) = handshake(connecting, &task).await {
        serve(connection, &task).await;
    }
    task.endpoint.close(VarInt::from_u32(0), b"");
    events.deliver(ConnectionEvent::ShutdownComplete);
}

/// Runs the handshake and reports `Connected`. `None` if it failed or was abandoned.
async fn handshake(mut connecting: Connecting, task: &Task) -> Option<Connection> {
    let Task { started, events, stop, flights, connected, .. } = task;
    let initial_end = tokio::select! {
        _ = stop.notified() => {
            trace!("handshake abandoned");
            return None;
        }
        data = connecting.handshake_data() => data.ok().map(|_| started.elapsed()),
    };
    let result = tokio::select! {
        _ = stop.notified() => {
            trace!("handshake abandoned");
            return None;
        }
        result = connecting => result,
    };
    let connection = match result {
        Ok(c) => c,
        Err(e) => {
            debug!(error = %e, "handshake failed");
            return None;
        }
    };
    let handshake_end = started.elapsed();
    let stats = Statistics {
        rtt_us: micros(connection.rtt()),
        timing_start_us: 0,
        timing_initial_flight_end_us: micros(initial_end.unwrap_or(handshake_end)),
        timing_handshake_flight_end_us: micros(handshake_end),
        ..flights.handshake()
    };
    connected.store(true, Ordering::Release);
    events.deliver(ConnectionEvent::Connected {
        stats,
        remote: connection.remote_address(),
        version: QuicVersion::from_wire(QUIC_V1),
    });
    Some(connection)
}

/// Turns away peer streams until asked to stop, then closes the connection.
async fn serve(connection: Connection, task: &Task) {
    let Task { events, stop, .. } = task;
    loop {
        tokio::select! {
            _ = stop.notified() => {
                connection.close(VarInt::from_u32(0), b"");
                break;
            }
            uni = connection.accept_uni() => match uni {
                Ok(recv) => events.deliver(ConnectionEvent::PeerStreamStarted(Box::new(QuicPeerStream::Uni(recv)))),
                Err(_) => break,
            },
            bi = connection.accept_bi() => match bi {
                Ok((send, recv)) => events.deliver(ConnectionEvent::PeerStreamStarted(Box::new(QuicPeerStream::Bi(send, recv)))),
                Err(_) => break,
            },
        }
    }
    let reason = connection.closed().await;
    debug!(%reason, "connection closed");
}

fn micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

fn transport_config(settings: &TransportSettings) -> Result<quinn::TransportConfig, TransportError> {
    let idle = quinn::IdleTimeout::try_from(settings.handshake_idle_timeout)
        .map_err(|e| TransportError::Config(format!("idle timeout out of range: {e:?}")))?;
    let mut mtu_discovery = quinn::MtuDiscoveryConfig::default();
    mtu_discovery.upper_bound(settings.max_mtu);

    let mut transport = quinn::TransportConfig::default();
    transport
        .max_idle_timeout(Some(idle))
        .initial_mtu(settings.min_mtu)
        .min_mtu(settings.min_mtu)
        .mtu_discovery_config(Some(mtu_discovery))
        .max_concurrent_uni_streams(VarInt::from_u32(settings.peer_unidi_streams));
    Ok(transport)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use quic_probe::CredentialMode;
    use std::sync::mpsc;

    struct Channel(Mutex<mpsc::Sender<&'static str>>);

    impl EventSink for Channel {
        fn deliver(&self, event: ConnectionEvent) {
            let name = match event {
                ConnectionEvent::Connected { .. } => "connected",
                ConnectionEvent::ShutdownComplete => "shutdown",
                ConnectionEvent::PeerStreamStarted(s) => {
                    s.close();
                    "stream"
                }
            };
            let _ = self.0.lock().send(name);
        }
    }

    fn config() -> ReachConfig {
        let mut config = ReachConfig::new(vec!["localhost".into()]);
        config.credentials = CredentialMode::Unsecure;
        config.settings.handshake_idle_timeout = Duration::from_millis(200);
        config
    }

    #[test]
    fn transport_settings_apply() {
        assert!(transport_config(&TransportSettings::default()).is_ok());
    }

    #[test]
    fn fixed_local_port_is_refused() {
        let mut config = config();
        config.local_address = Some("127.0.0.1:4433".parse().unwrap());
        assert!(matches!(QuicTransport::new(&config), Err(TransportError::Config(_))));
        config.local_address = Some("127.0.0.1:0".parse().unwrap());
        assert!(QuicTransport::new(&config).is_ok());
    }

    #[test]
    fn each_attempt_gets_its_own_socket() {
        let transport = QuicTransport::new(&config()).unwrap();
        let remote: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let _rt = transport.runtime.enter();
        let a = transport.endpoint_for(&remote, Arc::default()).unwrap();
        let b = transport.endpoint_for(&remote, Arc::default()).unwrap();
        assert_ne!(a.local_addr().unwrap().port(), b.local_addr().unwrap().port());
    }

    #[test]
    fn unresolvable_host_is_rejected_synchronously() {
        let transport = QuicTransport::new(&config()).unwrap();
        let (tx, _rx) = mpsc::channel();
        let request = ConnectRequest { host: "nonexistent.invalid".into(), port: 443, remote_override: None };
        let err = transport.start(&request, Arc::new(Channel(Mutex::new(tx)))).err().unwrap();
        assert!(matches!(err, TransportError::Resolve { .. }));
    }

    #[test]
    fn silent_peer_ends_in_shutdown_without_connect() {
        let transport = QuicTransport::new(&config()).unwrap();
        // Nothing answers QUIC on the loopback discard port.
        let request = ConnectRequest {
            host: "localhost".into(),
            port: 9,
            remote_override: Some("127.0.0.1:9".parse().unwrap()),
        };
        let (tx, rx) = mpsc::channel();
        let handle = transport.start(&request, Arc::new(Channel(Mutex::new(tx)))).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "shutdown");
        assert!(handle.statistics().is_none());
        handle.shutdown();
    }

    #[test]
    fn shutdown_during_handshake_completes() {
        let transport = QuicTransport::new(&config()).unwrap();
        let request = ConnectRequest {
            host: "localhost".into(),
            port: 9,
            remote_override: Some("127.0.0.1:9".parse().unwrap()),
        };
        let (tx, rx) = mpsc::channel();
        let handle = transport.start(&request, Arc::new(Channel(Mutex::new(tx)))).unwrap();
        handle.shutdown();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "shutdown");
    }
}
