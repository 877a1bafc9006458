use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Per-endpoint circuit breaker: opens after 3 consecutive failures, stays
/// open for 30 s, then allows a single half-open probe. Success from
/// `Closed` or from the half-open probe closes it and resets the failure
/// count; failure re-opens it for another cooldown window.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

const FAILURE_THRESHOLD: u32 = 3;
const COOLDOWN: Duration = Duration::from_secs(30);

impl CircuitBreaker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Whether a request may be dispatched right now. Transitions
    /// `Open -> HalfOpen` once the cooldown has elapsed and reserves the
    /// single probe slot, so concurrent callers don't all pile onto the
    /// same recovering endpoint.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed() >= COOLDOWN)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    pub fn on_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.probe_in_flight = false;
        inner.consecutive_failures += 1;
        if inner.state == CircuitState::HalfOpen || inner.consecutive_failures >= FAILURE_THRESHOLD {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}
