//! A UDP socket wrapper that tallies one connection's datagrams as they cross the socket.
//!
//! quinn only keeps running totals, and by the time the handshake future resolves they already
//! include the client's final flight. Counting at the socket lets the handshake statistics stop
//! at the last datagram the server sent before the client finished.

use parking_lot::Mutex;
use quic_probe::Statistics;
use quinn::udp::{RecvMeta, Transmit};
use quinn::{AsyncUdpSocket, UdpPoller};
use std::io::{self, IoSliceMut};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Tally {
    datagrams: u64,
    bytes: u64,
}

impl Tally {
    fn add(&mut self, datagrams: u64, bytes: u64) {
        self.datagrams = self.datagrams.saturating_add(datagrams);
        self.bytes = self.bytes.saturating_add(bytes);
    }
}

#[derive(Debug, Default)]
struct Flights {
    sent: Tally,
    received: Tally,
    /// `sent` as it stood when the latest datagram arrived.
    sent_at_last_recv: Tally,
    client_first: u64,
    server_first: u64,
    /// Set by the first send that follows a receive.
    client_replied: bool,
    retry: bool,
}

/// Per-connection datagram log, shared between the socket and the connection's handle.
#[derive(Debug, Default)]
pub(crate) struct FlightLog(Mutex<Flights>);

impl FlightLog {
    fn sent(&self, datagrams: u64, bytes: u64) {
        let mut f = self.0.lock();
        if f.received.datagrams == 0 {
            f.client_first = f.client_first.saturating_add(bytes);
        } else {
            f.client_replied = true;
        }
        f.sent.add(datagrams, bytes);
    }

    fn received(&self, datagram: &[u8]) {
        let bytes = datagram.len() as u64;
        let mut f = self.0.lock();
        if !f.client_replied {
            f.server_first = f.server_first.saturating_add(bytes);
        }
        f.retry |= is_retry(datagram);
        f.received.add(1, bytes);
        f.sent_at_last_recv = f.sent;
    }

    /// Counters as of handshake completion. Whatever the client sent after the server's last
    /// datagram is its closing flight and is left out.
    pub(crate) fn handshake(&self) -> Statistics {
        let f = self.0.lock();
        Statistics {
            send_total_packets: f.sent_at_last_recv.datagrams,
            send_total_bytes: f.sent_at_last_recv.bytes,
            recv_total_packets: f.received.datagrams,
            recv_total_bytes: f.received.bytes,
            stateless_retry: f.retry,
            client_flight1_bytes: (f.sent.datagrams > 0).then(|| saturate(f.client_first)),
            server_flight1_bytes: (f.received.datagrams > 0).then(|| saturate(f.server_first)),
            ..Statistics::default()
        }
    }

    /// Everything seen so far.
    pub(crate) fn totals(&self) -> Statistics {
        let f = self.0.lock();
        Statistics {
            send_total_packets: f.sent.datagrams,
            send_total_bytes: f.sent.bytes,
            recv_total_packets: f.received.datagrams,
            recv_total_bytes: f.received.bytes,
            stateless_retry: f.retry,
            ..Statistics::default()
        }
    }
}

fn saturate(v: u64) -> u32 {
    u32::try_from(v).unwrap_or(u32::MAX)
}

/// QUIC v1 Retry: long header with packet type 3 and a nonzero version. The type bits are not
/// covered by header protection.
fn is_retry(datagram: &[u8]) -> bool {
    datagram.len() >= 5 && datagram[0] & 0xb0 == 0xb0 && datagram[1..5] != [0; 4]
}

#[derive(Debug)]
pub(crate) struct CountingSocket {
    inner: Arc<dyn AsyncUdpSocket>,
    log: Arc<FlightLog>,
}

impl CountingSocket {
    pub(crate) fn new(inner: Arc<dyn AsyncUdpSocket>, log: Arc<FlightLog>) -> Self {
        CountingSocket { inner, log }
    }
}

impl AsyncUdpSocket for CountingSocket {
    fn create_io_poller(self: Arc<Self>) -> Pin<Box<dyn UdpPoller>> {
        self.inner.clone().create_io_poller()
    }

    fn try_send(&self, transmit: &Transmit) -> io::Result<()> {
        self.inner.try_send(transmit)?;
        let bytes = transmit.contents.len();
        let datagrams = match transmit.segment_size {
            Some(size) if size > 0 => bytes.div_ceil(size),
            _ => 1,
        };
        self.log.sent(datagrams as u64, bytes as u64);
        Ok(())
    }

    fn poll_recv(
        &self,
        cx: &mut Context,
        bufs: &mut [IoSliceMut<'_>],
        meta: &mut [RecvMeta],
    ) -> Poll<io::Result<usize>> {
        let n = match self.inner.poll_recv(cx, bufs, meta) {
            Poll::Ready(Ok(n)) => n,
            other => return other,
        };
        for (buf, m) in bufs.iter().zip(meta.iter()).take(n) {
            // GRO packs several datagrams into one buffer at `stride` offsets.
            let stride = if m.stride == 0 { m.len } else { m.stride };
            for datagram in buf[..m.len].chunks(stride.max(1)) {
                self.log.received(datagram);
            }
        }
        Poll::Ready(Ok(n))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    fn max_transmit_segments(&self) -> usize {
        self.inner.max_transmit_segments()
    }

    fn max_receive_segments(&self) -> usize {
        self.inner.max_receive_segments()
    }

    fn may_fragment(&self) -> bool {
        self.inner.may_fragment()
    }
}
