//! The seam between the engine and whatever actually speaks QUIC.
//!
//! A [`Transport`] starts one connection per [`ConnectRequest`] and reports its lifecycle to an
//! [`EventSink`]. Events for one connection arrive serially, but events for different
//! connections may arrive concurrently on threads the engine does not own.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

/// Per-attempt connection parameters. Protocol offer, credentials and tuning are fixed when the
/// transport is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub host: String,
    pub port: u16,
    pub remote_override: Option<SocketAddr>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to resolve {host}: {reason}")]
    Resolve { host: String, reason: String },
    #[error("connection rejected: {0}")]
    Rejected(String),
    #[error("endpoint unavailable: {0}")]
    Endpoint(#[from] std::io::Error),
    #[error("transport configuration failed: {0}")]
    Config(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuicVersion {
    V1,
    V2,
    Other(u32),
}

impl QuicVersion {
    pub fn from_wire(v: u32) -> Self {
        match v {
            0x0000_0001 => QuicVersion::V1,
            0x6b33_43cf => QuicVersion::V2,
            other => QuicVersion::Other(other),
        }
    }
}

impl fmt::Display for QuicVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuicVersion::V1 => write!(f, "v1"),
            QuicVersion::V2 => write!(f, "v2"),
            QuicVersion::Other(v) => write!(f, "0x{v:08x}"),
        }
    }
}

/// Transport counters captured when the handshake completes. Timings are microseconds on the
/// transport's own clock; only differences between them are meaningful.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statistics {
    pub rtt_us: u64,
    pub timing_start_us: u64,
    pub timing_initial_flight_end_us: u64,
    pub timing_handshake_flight_end_us: u64,
    pub send_total_packets: u64,
    pub recv_total_packets: u64,
    pub send_total_bytes: u64,
    pub recv_total_bytes: u64,
    pub stateless_retry: bool,
    pub client_flight1_bytes: Option<u32>,
    pub server_flight1_bytes: Option<u32>,
}

/// A stream the peer opened during the probe. Probes never read application data.
pub trait PeerStream: Send + fmt::Debug {
    fn close(self: Box<Self>);
}

pub enum ConnectionEvent {
    Connected { stats: Statistics, remote: SocketAddr, version: QuicVersion },
    ShutdownComplete,
    PeerStreamStarted(Box<dyn PeerStream>),
}

impl fmt::Debug for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionEvent::Connected { remote, version, .. } => f
                .debug_struct("Connected")
                .field("remote", remote)
                .field("version", version)
                .finish_non_exhaustive(),
            ConnectionEvent::ShutdownComplete => f.write_str("ShutdownComplete"),
            ConnectionEvent::PeerStreamStarted(s) => f.debug_tuple("PeerStreamStarted").field(s).finish(),
        }
    }
}

/// Receives connection events. Called from transport threads.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: ConnectionEvent);
}

/// Exclusive handle to one started connection.
pub trait ConnectionHandle: Send {
    /// Ask the transport to tear the connection down. Safe to call more than once and in any
    /// state; a `ShutdownComplete` event follows eventually.
    fn shutdown(&self);

    /// Current counters, if the transport can report them at this point.
    fn statistics(&self) -> Option<Statistics> {
        None
    }
}

pub trait Transport: Send + Sync {
    /// Begin a handshake. An `Err` means the connection never started and no events follow.
    fn start(
        &self,
        request: &ConnectRequest,
        events: Arc<dyn EventSink>,
    ) -> Result<Box<dyn ConnectionHandle>, TransportError>;
}
