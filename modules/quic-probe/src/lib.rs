//! QUIC reachability engine: bounded-concurrency handshake probes against a list of hosts.
//!
//! The engine never touches the wire itself. A [`Transport`] starts connections and reports
//! their lifecycle through [`ConnectionEvent`]s; each [`Attempt`] turns those events into a
//! single verdict, the [`Counters`] aggregate verdicts, and the [`RunDriver`] sweeps the host
//! list under the parallelism cap, optionally repeating on an interval.

pub mod attempt;
pub mod classify;
pub mod config;
pub mod counters;
pub mod driver;
pub mod transport;

pub use attempt::{Attempt, AttemptLimits, AttemptOutcome, AttemptState, FailureReason, Verdict};
pub use classify::{
    classify, AddressFamily, Classification, AMPLIFICATION_LIMIT, SEVERE_AMPLIFICATION_LIMIT,
};
pub use config::{ConfigError, CounterMode, CredentialMode, ReachConfig, TransportSettings};
pub use counters::{CounterSnapshot, Counters};
pub use driver::{PassReport, RunDriver, RunReport};
pub use transport::{
    ConnectRequest, ConnectionEvent, ConnectionHandle, EventSink, PeerStream, QuicVersion,
    Statistics, Transport, TransportError,
};
