//! One probe of one host: start a connection, wait (bounded) for the verdict, count it once.

use crate::classify::{classify, Classification};
use crate::config::ReachConfig;
use crate::counters::Counters;
use crate::transport::{
    ConnectRequest, ConnectionEvent, EventSink, QuicVersion, Statistics, Transport,
};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Created,
    Pending,
    Connected,
    Failed,
}

impl AttemptState {
    pub fn is_terminal(self) -> bool {
        matches!(self, AttemptState::Connected | AttemptState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The transport refused to start the connection.
    Rejected(String),
    /// The transport shut the connection down before the handshake completed.
    HandshakeFailed,
    /// Nothing terminal arrived before the local deadline.
    TimedOut,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Rejected(why) => write!(f, "rejected: {why}"),
            FailureReason::HandshakeFailed => write!(f, "handshake failed"),
            FailureReason::TimedOut => write!(f, "timed out"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Reachable(Classification),
    Unreachable(FailureReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttemptOutcome {
    /// Position of the host in the pass.
    pub index: usize,
    pub host: String,
    pub elapsed: Duration,
    pub verdict: Verdict,
}

impl AttemptOutcome {
    pub fn is_reachable(&self) -> bool {
        matches!(self.verdict, Verdict::Reachable(_))
    }

    pub fn classification(&self) -> Option<&Classification> {
        match &self.verdict {
            Verdict::Reachable(c) => Some(c),
            Verdict::Unreachable(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptLimits {
    /// Ceiling from creation to a terminal state.
    pub timeout: Duration,
    /// How long a connected attempt waits for shutdown to complete.
    pub shutdown_grace: Duration,
}

impl AttemptLimits {
    pub fn from_config(cfg: &ReachConfig) -> Self {
        Self { timeout: cfg.attempt_timeout(), shutdown_grace: cfg.shutdown_grace() }
    }
}

struct Progress {
    state: AttemptState,
    connected: Option<(Statistics, SocketAddr, QuicVersion)>,
    failure: Option<FailureReason>,
    shutdown_complete: bool,
    finalized: bool,
}

struct Tracker {
    host: String,
    progress: Mutex<Progress>,
    changed: Condvar,
}

impl Tracker {
    fn wait_until(&self, deadline: Instant, done: impl Fn(&Progress) -> bool) -> bool {
        let mut p = self.progress.lock();
        while !done(&p) {
            if self.changed.wait_until(&mut p, deadline).timed_out() {
                return done(&p);
            }
        }
        true
    }

    fn mark_pending(&self) {
        let mut p = self.progress.lock();
        if p.state == AttemptState::Created {
            p.state = AttemptState::Pending;
        }
    }

    /// Fail a still-pending attempt on local timeout. Returns false if a verdict beat us to it.
    fn expire(&self) -> bool {
        let mut p = self.progress.lock();
        if p.state.is_terminal() {
            return false;
        }
        p.state = AttemptState::Failed;
        p.failure = Some(FailureReason::TimedOut);
        true
    }
}

impl EventSink for Tracker {
    fn deliver(&self, event: ConnectionEvent) {
        let mut p = self.progress.lock();
        if p.finalized {
            drop(p);
            debug!(host = %self.host, ?event, "event after finalization ignored");
            if let ConnectionEvent::PeerStreamStarted(stream) = event {
                stream.close();
            }
            return;
        }
        match event {
            ConnectionEvent::Connected { stats, remote, version } => {
                if matches!(p.state, AttemptState::Created | AttemptState::Pending) {
                    debug!(host = %self.host, %remote, %version, "handshake complete");
                    p.state = AttemptState::Connected;
                    p.connected = Some((stats, remote, version));
                } else {
                    debug!(host = %self.host, state = ?p.state, "connected event ignored");
                }
            }
            ConnectionEvent::ShutdownComplete => {
                p.shutdown_complete = true;
                if matches!(p.state, AttemptState::Created | AttemptState::Pending) {
                    debug!(host = %self.host, "shut down before handshake completed");
                    p.state = AttemptState::Failed;
                    p.failure.get_or_insert(FailureReason::HandshakeFailed);
                }
            }
            ConnectionEvent::PeerStreamStarted(stream) => {
                drop(p);
                debug!(host = %self.host, "closing peer-initiated stream");
                stream.close();
                return;
            }
        }
        drop(p);
        self.changed.notify_all();
    }
}

pub struct Attempt {
    index: usize,
    host: String,
    created: Instant,
    tracker: Arc<Tracker>,
}

impl Attempt {
    pub fn new(index: usize, host: impl Into<String>) -> Self {
        let host = host.into();
        Attempt {
            index,
            host: host.clone(),
            created: Instant::now(),
            tracker: Arc::new(Tracker {
                host,
                progress: Mutex::new(Progress {
                    state: AttemptState::Created,
                    connected: None,
                    failure: None,
                    shutdown_complete: false,
                    finalized: false,
                }),
                changed: Condvar::new(),
            }),
        }
    }

    pub fn state(&self) -> AttemptState {
        self.tracker.progress.lock().state
    }

    /// The sink the transport reports this attempt's events to.
    pub fn events(&self) -> Arc<dyn EventSink> {
        self.tracker.clone()
    }

    /// Drive the attempt to a verdict and count it.
    ///
    /// Events may arrive before `start` returns; a `Connected` seen while still `Created` is
    /// taken as is. Whatever happens, the connection is asked to shut down before returning.
    pub fn run(
        &self,
        transport: &dyn Transport,
        request: &ConnectRequest,
        limits: AttemptLimits,
        counters: &Counters,
    ) -> Option<AttemptOutcome> {
        let handle = match transport.start(request, self.events()) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(host = %self.host, error = %e, "connection start failed");
                return self.reject(e.to_string(), counters);
            }
        };
        self.tracker.mark_pending();

        let deadline = self.created + limits.timeout;
        if !self.tracker.wait_until(deadline, |p| p.state.is_terminal()) && self.tracker.expire() {
            warn!(host = %self.host, timeout = ?limits.timeout, "no handshake verdict before deadline");
            if let Some(s) = handle.statistics() {
                debug!(
                    host = %self.host,
                    sent = s.send_total_packets,
                    recv = s.recv_total_packets,
                    "counters at timeout"
                );
            }
        }

        handle.shutdown();
        if self.state() == AttemptState::Connected {
            let grace = Instant::now() + limits.shutdown_grace;
            if !self.tracker.wait_until(grace, |p| p.shutdown_complete) {
                debug!(host = %self.host, "shutdown did not complete within grace period");
            }
        }
        drop(handle);
        self.finalize(counters)
    }

    /// Fail the attempt without a connection, e.g. when the transport refused to start it.
    pub fn reject(&self, reason: impl Into<String>, counters: &Counters) -> Option<AttemptOutcome> {
        {
            let mut p = self.tracker.progress.lock();
            if !p.state.is_terminal() {
                p.state = AttemptState::Failed;
                p.failure = Some(FailureReason::Rejected(reason.into()));
            }
        }
        self.finalize(counters)
    }

    /// Fix the verdict and record it. Only the first call counts anything; later calls and any
    /// events that arrive afterwards are ignored. A still-pending attempt is finalized as timed out.
    pub fn finalize(&self, counters: &Counters) -> Option<AttemptOutcome> {
        let mut p = self.tracker.progress.lock();
        if p.finalized {
            return None;
        }
        p.finalized = true;
        if !p.state.is_terminal() {
            p.state = AttemptState::Failed;
            p.failure.get_or_insert(FailureReason::TimedOut);
        }
        let connected = p.connected.take();
        let failure = p.failure.clone();
        drop(p);

        let verdict = match connected {
            Some((stats, remote, version)) => Verdict::Reachable(classify(&stats, remote, version)),
            None => Verdict::Unreachable(failure.unwrap_or(FailureReason::HandshakeFailed)),
        };
        let outcome = AttemptOutcome {
            index: self.index,
            host: self.host.clone(),
            elapsed: self.created.elapsed(),
            verdict,
        };
        counters.record(&outcome);
        match &outcome.verdict {
            Verdict::Reachable(c) => debug!(host = %self.host, ratio = c.amplification, "reachable"),
            Verdict::Unreachable(why) => debug!(host = %self.host, %why, "unreachable"),
        }
        Some(outcome)
    }
}
