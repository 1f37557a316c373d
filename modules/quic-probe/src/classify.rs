//! Turns a connected attempt's counters into health signals.

use crate::transport::{QuicVersion, Statistics};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// Anti-amplification limit from RFC 9000 §8.1.
pub const AMPLIFICATION_LIMIT: f64 = 3.0;
/// Practical ceiling above which amplification is flagged as severe.
pub const SEVERE_AMPLIFICATION_LIMIT: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl From<&SocketAddr> for AddressFamily {
    fn from(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(_) => AddressFamily::Ipv4,
            SocketAddr::V6(v6) if v6.ip().to_ipv4_mapped().is_some() => AddressFamily::Ipv4,
            SocketAddr::V6(_) => AddressFamily::Ipv6,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::Ipv4 => write!(f, "IPv4"),
            AddressFamily::Ipv6 => write!(f, "IPv6"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub stats: Statistics,
    pub remote: SocketAddr,
    pub family: AddressFamily,
    pub version: QuicVersion,
    pub initial_time: Duration,
    pub handshake_time: Duration,
    /// Bytes received over bytes sent.
    pub amplification: f64,
    /// More than one client packet was needed; amplification is not judged.
    pub multi_rtt: bool,
    pub excess_amplification: bool,
    pub severe_amplification: bool,
    pub retry: bool,
}

pub fn classify(stats: &Statistics, remote: SocketAddr, version: QuicVersion) -> Classification {
    let amplification = if stats.send_total_bytes == 0 {
        0.0
    } else {
        stats.recv_total_bytes as f64 / stats.send_total_bytes as f64
    };
    let multi_rtt = stats.send_total_packets != 1;
    let excess_amplification = !multi_rtt && amplification > AMPLIFICATION_LIMIT;
    let severe_amplification = excess_amplification && amplification > SEVERE_AMPLIFICATION_LIMIT;

    Classification {
        stats: stats.clone(),
        remote,
        family: AddressFamily::from(&remote),
        version,
        initial_time: since_start(stats, stats.timing_initial_flight_end_us),
        handshake_time: since_start(stats, stats.timing_handshake_flight_end_us),
        amplification,
        multi_rtt,
        excess_amplification,
        severe_amplification,
        retry: stats.stateless_retry,
    }
}

fn since_start(stats: &Statistics, milestone_us: u64) -> Duration {
    Duration::from_micros(milestone_us.saturating_sub(stats.timing_start_us))
}

impl Classification {
    /// Two status characters: `!` excess amplification or `*` multi-RTT, then `R` for retry.
    pub fn tags(&self) -> [char; 2] {
        let first = if self.excess_amplification {
            '!'
        } else if self.multi_rtt {
            '*'
        } else {
            ' '
        };
        [first, if self.retry { 'R' } else { ' ' }]
    }

    pub fn tag_string(&self) -> String {
        self.tags().iter().collect()
    }
}
