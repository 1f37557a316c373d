use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use tracing::trace;

/// Caps the number of attempts in flight at once.
///
/// `acquire` blocks until a slot is free and hands back a [`Permit`]; dropping the
/// permit frees the slot and wakes anyone blocked in `acquire` or `drain`.
pub struct AdmissionGate {
    inner: Arc<Inner>,
}

struct Inner {
    limit: usize,
    state: Mutex<GateState>,
    changed: Condvar,
}

#[derive(Default)]
struct GateState {
    active: usize,
    peak: usize,
}

impl Clone for AdmissionGate {
    fn clone(&self) -> Self { AdmissionGate { inner: self.inner.clone() } }
}

impl AdmissionGate {
    /// A limit of zero is treated as one.
    pub fn new(limit: usize) -> Self {
        AdmissionGate {
            inner: Arc::new(Inner {
                limit: limit.max(1),
                state: Mutex::new(GateState::default()),
                changed: Condvar::new(),
            }),
        }
    }

    /// Number of permits currently held.
    pub fn active(&self) -> usize {
        self.inner.state.lock().active
    }

    /// Highest number of permits ever held at once.
    pub fn peak(&self) -> usize {
        self.inner.state.lock().peak
    }

    pub fn acquire(&self) -> Permit {
        let mut state = self.inner.state.lock();
        while state.active >= self.inner.limit {
            self.inner.changed.wait(&mut state);
        }
        self.admit(&mut state)
    }

    fn admit(&self, state: &mut GateState) -> Permit {
        state.active += 1;
        state.peak = state.peak.max(state.active);
        trace!(active = state.active, limit = self.inner.limit, "slot acquired");
        Permit { gate: self.clone() }
    }

    fn release(&self) {
        let mut state = self.inner.state.lock();
        debug_assert!(state.active > 0, "released more permits than acquired");
        state.active = state.active.saturating_sub(1);
        trace!(active = state.active, "slot released");
        drop(state);
        self.inner.changed.notify_all();
    }

    /// Block until every permit has been returned.
    pub fn drain(&self) {
        let mut state = self.inner.state.lock();
        while state.active > 0 {
            self.inner.changed.wait(&mut state);
        }
    }
}

/// One admitted slot. The slot is returned exactly once, on drop.
pub struct Permit {
    gate: AdmissionGate,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.gate.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn zero_limit_admits_one_at_a_time() {
        let gate = AdmissionGate::new(0);
        let held = gate.acquire();
        let g = gate.clone();
        let waiter = thread::spawn(move || drop(g.acquire()));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(gate.active(), 1);
        assert!(!waiter.is_finished());
        drop(held);
        waiter.join().unwrap();
        assert_eq!(gate.peak(), 1);
    }

    #[test]
    fn permits_are_counted_while_held() {
        let gate = AdmissionGate::new(2);
        let a = gate.acquire();
        let _b = gate.acquire();
        assert_eq!(gate.active(), 2);
        drop(a);
        assert_eq!(gate.active(), 1);
        assert_eq!(gate.peak(), 2);
    }

    #[test]
    fn acquire_blocks_until_release() {
        let gate = AdmissionGate::new(1);
        let held = gate.acquire();
        let g = gate.clone();
        let waiter = thread::spawn(move || {
            let _p = g.acquire();
            g.active()
        });
        thread::sleep(Duration::from_millis(50));
        assert_eq!(gate.active(), 1);
        drop(held);
        assert_eq!(waiter.join().unwrap(), 1);
        assert_eq!(gate.active(), 0);
        assert_eq!(gate.peak(), 1);
    }

    #[test]
    fn drain_waits_for_all_permits() {
        let gate = AdmissionGate::new(4);
        let mut handles = Vec::new();
        for i in 0..4u64 {
            let p = gate.acquire();
            handles.push(thread::spawn(move || {
                thread::sleep(Duration::from_millis(10 * (i + 1)));
                drop(p);
            }));
        }
        gate.drain();
        assert_eq!(gate.active(), 0);
        for h in handles { h.join().unwrap(); }
    }

    #[test]
    fn drain_on_empty_gate_returns_immediately() {
        let gate = AdmissionGate::new(3);
        gate.drain();
        assert_eq!(gate.active(), 0);
    }
}
