//! Sweeps the host list through the admission gate, once or on an interval.

use crate::attempt::{Attempt, AttemptLimits, AttemptOutcome};
use crate::config::{ConfigError, CounterMode, ReachConfig};
use crate::counters::{CounterSnapshot, Counters};
use crate::transport::{ConnectRequest, Transport};
use parking_lot::Mutex;
use reach_core::AdmissionGate;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// Everything known after one sweep over the host list.
#[derive(Debug, Clone)]
pub struct PassReport {
    /// 1-based pass number.
    pub pass: u64,
    pub started_at: OffsetDateTime,
    pub elapsed: Duration,
    pub counters: CounterSnapshot,
    /// One entry per host, in host-list order.
    pub outcomes: Vec<AttemptOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub passes: u64,
    pub counters: CounterSnapshot,
    pub success: bool,
}

pub struct RunDriver {
    config: Arc<ReachConfig>,
    transport: Arc<dyn Transport>,
    counters: Arc<Counters>,
    gate: AdmissionGate,
}

impl RunDriver {
    pub fn new(config: ReachConfig, transport: Arc<dyn Transport>) -> Result<Self, ConfigError> {
        config.validate()?;
        let gate = AdmissionGate::new(config.parallelism);
        Ok(RunDriver {
            config: Arc::new(config),
            transport,
            counters: Arc::new(Counters::new()),
            gate,
        })
    }

    pub fn config(&self) -> &ReachConfig {
        &self.config
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    /// Probe every host once and wait for all attempts to finish.
    pub fn run_pass(&self, pass: u64) -> PassReport {
        if self.config.counter_mode == CounterMode::PerPass {
            self.counters.reset();
        }
        let started_at = OffsetDateTime::now_utc();
        let start = Instant::now();
        let limits = AttemptLimits::from_config(&self.config);
        let outcomes = Arc::new(Mutex::new(Vec::with_capacity(self.config.hosts.len())));

        for (index, host) in self.config.hosts.iter().enumerate() {
            let permit = self.gate.acquire();
            let request = ConnectRequest {
                host: host.clone(),
                port: self.config.port,
                remote_override: self.config.remote_address,
            };
            let transport = self.transport.clone();
            let counters = self.counters.clone();
            let sink = outcomes.clone();
            let spawned = thread::Builder::new()
                .name(format!("reach-{index}"))
                .spawn(move || {
                    let attempt = Attempt::new(index, request.host.clone());
                    if let Some(outcome) = attempt.run(transport.as_ref(), &request, limits, &counters) {
                        sink.lock().push(outcome);
                    }
                    drop(permit);
                });
            if let Err(e) = spawned {
                // The closure, and with it the permit, was dropped by the failed spawn.
                warn!(%host, error = %e, "could not start attempt thread");
                if let Some(outcome) = Attempt::new(index, host.clone()).reject(e.to_string(), &self.counters) {
                    outcomes.lock().push(outcome);
                }
            }
        }
        self.gate.drain();

        let mut outcomes = std::mem::take(&mut *outcomes.lock());
        outcomes.sort_by_key(|o| o.index);
        let counters = self.counters.snapshot();
        info!(
            pass,
            total = counters.total,
            reachable = counters.reachable,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "pass complete"
        );
        PassReport { pass, started_at, elapsed: start.elapsed(), counters, outcomes }
    }

    /// Run passes until the configuration says stop (no repeat interval) or `on_pass` breaks.
    /// With a repeat interval the loop only ends through `on_pass`.
    pub fn run<F>(&self, mut on_pass: F) -> RunReport
    where
        F: FnMut(&PassReport) -> ControlFlow<()>,
    {
        let mut pass = 0u64;
        loop {
            pass += 1;
            let report = self.run_pass(pass);
            let flow = on_pass(&report);
            if flow.is_break() || !self.config.repeats() {
                return self.finish(pass, report.counters);
            }
            debug!(interval = ?self.config.repeat_interval, "sleeping before next pass");
            thread::sleep(self.config.repeat_interval);
        }
    }

    /// Verdict as of the end of `report`'s pass.
    pub fn pass_verdict(&self, report: &PassReport) -> bool {
        report.counters.verdict(self.config.require_all, self.expected(report.pass))
    }

    /// Attempts a fully reachable run would have counted after `passes` passes.
    fn expected(&self, passes: u64) -> usize {
        match self.config.counter_mode {
            CounterMode::PerPass => self.config.hosts.len(),
            CounterMode::Cumulative => self.config.hosts.len().saturating_mul(passes as usize),
        }
    }

    fn finish(&self, passes: u64, counters: CounterSnapshot) -> RunReport {
        let success = counters.verdict(self.config.require_all, self.expected(passes));
        RunReport { passes, counters, success }
    }
}
