use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::rpc::circuit::{CircuitBreaker, CircuitState};

const LATENCY_SAMPLES: usize = 32;

/// Per-endpoint health record: priority, circuit breaker, and a ring buffer
/// of recent latencies for p95 reporting.
pub struct EndpointHealth {
    pub url: String,
    pub priority: usize,
    breaker: CircuitBreaker,
    latencies: Mutex<VecDeque<Duration>>,
}

impl EndpointHealth {
    pub fn new(url: String, priority: usize) -> Self {
        Self {
            url,
            priority,
            breaker: CircuitBreaker::new(),
            latencies: Mutex::new(VecDeque::with_capacity(LATENCY_SAMPLES)),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(
            self.breaker.state(),
            CircuitState::Closed | CircuitState::HalfOpen
        )
    }

    pub fn allow_request(&self) -> bool {
        self.breaker.allow_request()
    }

    pub fn record_success(&self, latency: Duration) {
        self.push_latency(latency);
        self.breaker.on_success();
    }

    pub fn record_failure(&self) {
        self.breaker.on_failure();
    }

    fn push_latency(&self, latency: Duration) {
        let mut buf = self.latencies.lock().unwrap();
        if buf.len() == LATENCY_SAMPLES {
            buf.pop_front();
        }
        buf.push_back(latency);
    }

    /// 95th percentile of the last 32 samples, if any have been recorded.
    pub fn p95(&self) -> Option<Duration> {
        let buf = self.latencies.lock().unwrap();
        if buf.is_empty() {
            return None;
        }
        let mut sorted: Vec<Duration> = buf.iter().copied().collect();
        sorted.sort();
        let idx = ((sorted.len() as f64) * 0.95).ceil() as usize;
        let idx = idx.saturating_sub(1).min(sorted.len() - 1);
        Some(sorted[idx])
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }
}
