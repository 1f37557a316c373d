use crate::attempt::{AttemptOutcome, Verdict};
use crate::classify::AddressFamily;
use crate::transport::QuicVersion;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};

/// Run-wide tallies, bumped concurrently by finishing attempts.
///
/// Each field only ever increments (until [`reset`](Counters::reset)) and sticks at
/// `u32::MAX` rather than wrapping, which long cumulative repeat runs can reach. Reads taken while
/// attempts are still finishing may mix counts from different attempts; after the admission
/// gate drains they are exact.
#[derive(Debug, Default)]
pub struct Counters {
    total: AtomicU32,
    reachable: AtomicU32,
    too_much: AtomicU32,
    way_too_much: AtomicU32,
    multi_rtt: AtomicU32,
    retry: AtomicU32,
    ipv6: AtomicU32,
    quic_v2: AtomicU32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub total: u32,
    pub reachable: u32,
    pub too_much: u32,
    pub way_too_much: u32,
    pub multi_rtt: u32,
    pub retry: u32,
    pub ipv6: u32,
    pub quic_v2: u32,
}

fn bump(c: &AtomicU32) {
    let _ = c.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_add(1));
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr_total(&self) { bump(&self.total) }
    pub fn incr_reachable(&self) { bump(&self.reachable) }
    pub fn incr_too_much(&self) { bump(&self.too_much) }
    pub fn incr_way_too_much(&self) { bump(&self.way_too_much) }
    pub fn incr_multi_rtt(&self) { bump(&self.multi_rtt) }
    pub fn incr_retry(&self) { bump(&self.retry) }
    pub fn incr_ipv6(&self) { bump(&self.ipv6) }
    pub fn incr_quic_v2(&self) { bump(&self.quic_v2) }

    /// Count one finished attempt.
    pub fn record(&self, outcome: &AttemptOutcome) {
        self.incr_total();
        let Verdict::Reachable(c) = &outcome.verdict else { return };
        self.incr_reachable();
        if c.multi_rtt {
            self.incr_multi_rtt();
        }
        if c.excess_amplification {
            self.incr_too_much();
        }
        if c.severe_amplification {
            self.incr_way_too_much();
        }
        if c.retry {
            self.incr_retry();
        }
        if c.family == AddressFamily::Ipv6 {
            self.incr_ipv6();
        }
        if c.version == QuicVersion::V2 {
            self.incr_quic_v2();
        }
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let get = |c: &AtomicU32| c.load(Ordering::Relaxed);
        CounterSnapshot {
            total: get(&self.total),
            reachable: get(&self.reachable),
            too_much: get(&self.too_much),
            way_too_much: get(&self.way_too_much),
            multi_rtt: get(&self.multi_rtt),
            retry: get(&self.retry),
            ipv6: get(&self.ipv6),
            quic_v2: get(&self.quic_v2),
        }
    }

    /// Zero every counter. Only call while no attempts are in flight.
    pub fn reset(&self) {
        for c in [
            &self.total,
            &self.reachable,
            &self.too_much,
            &self.way_too_much,
            &self.multi_rtt,
            &self.retry,
            &self.ipv6,
            &self.quic_v2,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }
}

impl CounterSnapshot {
    /// Run verdict. `expected` is how many attempts a fully reachable run would have counted.
    pub fn verdict(&self, require_all: bool, expected: usize) -> bool {
        if require_all {
            self.reachable as usize == expected
        } else {
            self.reachable != 0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attempt::FailureReason;
    use crate::classify::classify;
    use crate::transport::Statistics;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn reachable(packets: u64, sent: u64, recv: u64, remote: &str, version: QuicVersion) -> AttemptOutcome {
        let stats = Statistics {
            send_total_packets: packets,
            send_total_bytes: sent,
            recv_total_bytes: recv,
            ..Statistics::default()
        };
        AttemptOutcome {
            index: 0,
            host: "h".into(),
            elapsed: Duration::ZERO,
            verdict: Verdict::Reachable(classify(&stats, remote.parse().unwrap(), version)),
        }
    }

    fn failed() -> AttemptOutcome {
        AttemptOutcome {
            index: 0,
            host: "h".into(),
            elapsed: Duration::ZERO,
            verdict: Verdict::Unreachable(FailureReason::TimedOut),
        }
    }

    #[test]
    fn record_sets_matching_counters() {
        let c = Counters::new();
        c.record(&reachable(1, 1000, 6000, "[2001:db8::1]:443", QuicVersion::V2));
        c.record(&reachable(2, 1000, 6000, "192.0.2.1:443", QuicVersion::V1));
        c.record(&failed());
        let s = c.snapshot();
        assert_eq!(s.total, 3);
        assert_eq!(s.reachable, 2);
        assert_eq!(s.too_much, 1);
        assert_eq!(s.way_too_much, 1);
        assert_eq!(s.multi_rtt, 1);
        assert_eq!(s.ipv6, 1);
        assert_eq!(s.quic_v2, 1);
        assert_eq!(s.retry, 0);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let c = Arc::new(Counters::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = c.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        c.incr_total();
                        c.incr_reachable();
                    }
                })
            })
            .collect();
        for h in handles { h.join().unwrap(); }
        let s = c.snapshot();
        assert_eq!(s.total, 8000);
        assert_eq!(s.reachable, 8000);
    }

    #[test]
    fn saturated_counter_stays_at_max() {
        let c = Counters::new();
        c.total.store(u32::MAX - 1, Ordering::Relaxed);
        c.record(&failed());
        c.record(&failed());
        c.record(&failed());
        assert_eq!(c.snapshot().total, u32::MAX);
        assert_eq!(c.snapshot().reachable, 0);
    }

    #[test]
    fn reset_zeroes() {
        let c = Counters::new();
        c.record(&reachable(1, 1, 1, "192.0.2.1:443", QuicVersion::V1));
        c.reset();
        assert_eq!(c.snapshot(), CounterSnapshot::default());
    }

    #[test]
    fn verdict_modes() {
        let s = CounterSnapshot { total: 5, reachable: 3, ..Default::default() };
        assert!(s.verdict(false, 5));
        assert!(!s.verdict(true, 5));
        let none = CounterSnapshot { total: 1, ..Default::default() };
        assert!(!none.verdict(false, 1));
        assert!(!none.verdict(true, 1));
        let all = CounterSnapshot { total: 2, reachable: 2, ..Default::default() };
        assert!(all.verdict(true, 2));
    }
}
