//! Per-operation circuit breaker.
//!
//! Every store call is wrapped in a breaker identified by an operation name
//! (e.g. `get:user:42`). A breaker starts CLOSED and counts outcomes over a
//! fixed observation window; when the window holds enough requests and the
//! failure rate crosses the configured threshold it trips OPEN, rejecting
//! calls instantly for a cooldown period. After cooldown it turns HALF-OPEN
//! and admits a bounded number of probe calls: any probe failure re-opens
//! it, a full set of probe successes re-closes it.
//!
//! Breakers are created lazily on first use of a name and retained for the
//! process lifetime. With the default per-key naming this means one breaker
//! per distinct key; see [`crate::cache::BreakerScope`] for the bounded
//! alternative.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

/// Tuning parameters for the breaker state machine.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Failure rate in `[0, 1]` at which a CLOSED breaker trips.
    pub error_rate: f64,
    /// Minimum requests observed in the current window before the rate is
    /// considered meaningful.
    pub min_requests: u64,
    /// Length of the observation window; counts reset when it elapses.
    pub window: Duration,
    /// How long an OPEN breaker rejects calls before probing.
    pub cooldown: Duration,
    /// Number of HALF-OPEN probe calls admitted; this many consecutive
    /// successes re-close the breaker.
    pub probes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            error_rate: 0.5,
            min_requests: 10,
            window: Duration::from_secs(10),
            cooldown: Duration::from_secs(5),
            probes: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Closed,
    Open,
    HalfOpen,
}

struct State {
    kind: Kind,
    /// Start of the current CLOSED observation window.
    window_start: Instant,
    total: u64,
    failures: u64,
    /// When the breaker last tripped OPEN.
    opened_at: Instant,
    probes_granted: u32,
    probe_successes: u32,
}

impl State {
    fn new(now: Instant) -> Self {
        Self {
            kind: Kind::Closed,
            window_start: now,
            total: 0,
            failures: 0,
            opened_at: now,
            probes_granted: 0,
            probe_successes: 0,
        }
    }

    fn roll_window(&mut self, window: Duration, now: Instant) {
        if now.duration_since(self.window_start) >= window {
            self.window_start = now;
            self.total = 0;
            self.failures = 0;
        }
    }

    fn close(&mut self, now: Instant) {
        self.kind = Kind::Closed;
        self.window_start = now;
        self.total = 0;
        self.failures = 0;
    }

    fn open(&mut self, now: Instant) {
        self.kind = Kind::Open;
        self.opened_at = now;
        self.probes_granted = 0;
        self.probe_successes = 0;
    }
}

/// A single breaker instance guarding one operation name.
pub struct Breaker {
    cfg: BreakerConfig,
    state: Mutex<State>,
}

impl Breaker {
    fn new(cfg: BreakerConfig) -> Self {
        let now = Instant::now();
        Self {
            cfg,
            state: Mutex::new(State::new(now)),
        }
    }

    /// Asks the breaker whether a call may proceed.
    ///
    /// Callers that receive `true` must report the call's outcome through
    /// [`Breaker::on_success`] or [`Breaker::on_failure`].
    pub fn allow(&self) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        match state.kind {
            Kind::Closed => true,
            Kind::Open => {
                if now.duration_since(state.opened_at) >= self.cfg.cooldown {
                    state.kind = Kind::HalfOpen;
                    state.probes_granted = 1;
                    state.probe_successes = 0;
                    true
                } else {
                    false
                }
            }
            Kind::HalfOpen => {
                if state.probes_granted < self.cfg.probes {
                    state.probes_granted += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Records a successful call.
    pub fn on_success(&self) {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        match state.kind {
            Kind::Closed => {
                state.roll_window(self.cfg.window, now);
                state.total += 1;
            }
            Kind::HalfOpen => {
                state.probe_successes += 1;
                if state.probe_successes >= self.cfg.probes {
                    state.close(now);
                }
            }
            // A late result from before the trip; the window restarts on close.
            Kind::Open => {}
        }
    }

    /// Records a failed call.
    pub fn on_failure(&self) {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        match state.kind {
            Kind::Closed => {
                state.roll_window(self.cfg.window, now);
                state.total += 1;
                state.failures += 1;
                if state.total >= self.cfg.min_requests
                    && state.failures as f64 / state.total as f64 >= self.cfg.error_rate
                {
                    state.open(now);
                }
            }
            Kind::HalfOpen => state.open(now),
            Kind::Open => {}
        }
    }

    #[cfg(test)]
    fn kind(&self) -> Kind {
        self.state.lock().unwrap().kind
    }
}

/// Lazily creates and retains one [`Breaker`] per operation name.
///
/// Breaker state is never reclaimed; with per-key naming, one instance exists
/// per distinct key for the process lifetime.
pub struct BreakerRegistry {
    cfg: BreakerConfig,
    breakers: Mutex<HashMap<String, Arc<Breaker>>>,
}

impl BreakerRegistry {
    /// Creates a registry whose breakers all share `cfg`.
    pub fn new(cfg: BreakerConfig) -> Self {
        Self {
            cfg,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the breaker for `name`, creating it on first use.
    pub fn acquire(&self, name: &str) -> Arc<Breaker> {
        let mut breakers = self.breakers.lock().unwrap();
        if let Some(breaker) = breakers.get(name) {
            return Arc::clone(breaker);
        }
        let breaker = Arc::new(Breaker::new(self.cfg.clone()));
        breakers.insert(name.to_owned(), Arc::clone(&breaker));
        breaker
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.breakers.lock().unwrap().len()
    }
}
