//! Shared circuit-breaker primitive (§4.1 "Global circuit breaker", §4.2
//! "Per-server circuit breakers"). One small state machine, reused by the
//! scheduler (one breaker, global) and the MCP transport (one breaker per
//! server name) rather than two bespoke implementations.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// A single breaker: trips `Open` after `failure_threshold` consecutive
/// failures, transitions to `HalfOpen` after `cooldown` elapses, and closes
/// again on the first success seen while half-open.
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Whether a call is currently allowed through. `Open` blocks unless the
    /// cooldown has elapsed, in which case the breaker advances to
    /// `HalfOpen` and allows exactly this one probe call.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed() >= self.cooldown)
                    .unwrap_or(false);
                if elapsed {
                    inner.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
            }
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap().state
    }
}

/// Named registry of breakers, one per MCP server (§4.2). Core-service
/// dependencies get a higher failure tolerance and shorter cooldown than
/// optional ones, matching the spec's "core vs non-core" distinction.
pub struct BreakerRegistry {
    breakers: DashMap<String, CircuitBreaker>,
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self {
            breakers: DashMap::new(),
        }
    }

    /// Thresholds per §4.2: core services tolerate more consecutive
    /// failures before tripping (they're load-bearing) but recover faster
    /// once they do (10 failures -> 30s cooldown, vs. 5 failures -> 60s for
    /// non-core).
    pub fn register(&self, name: impl Into<String>, core_service: bool) {
        let (threshold, cooldown) = if core_service {
            (10, Duration::from_secs(30))
        } else {
            (5, Duration::from_secs(60))
        };
        self.breakers
            .insert(name.into(), CircuitBreaker::new(threshold, cooldown));
    }

    /// Same as [`register`](Self::register) but with explicit thresholds,
    /// for callers (the MCP registry) that already know the exact numbers
    /// rather than just a core/non-core flag.
    pub fn register_with(&self, name: impl Into<String>, threshold: u32, cooldown: Duration) {
        self.breakers
            .insert(name.into(), CircuitBreaker::new(threshold, cooldown));
    }

    pub fn allow(&self, name: &str) -> bool {
        self.breakers.get(name).map(|b| b.allow()).unwrap_or(true)
    }

    pub fn record_success(&self, name: &str) {
        if let Some(b) = self.breakers.get(name) {
            b.record_success();
        }
    }

    pub fn record_failure(&self, name: &str) {
        if let Some(b) = self.breakers.get(name) {
            b.record_failure();
        }
    }

    pub fn state(&self, name: &str) -> Option<BreakerState> {
        self.breakers.get(name).map(|b| b.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_open_after_threshold_consecutive_failures() {
        let b = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(b.allow());
        b.record_failure();
        b.record_failure();
        assert!(b.allow());
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.allow());
    }

    #[test]
    fn success_resets_failure_count() {
        let b = CircuitBreaker::new(3, Duration::from_secs(60));
        b.record_failure();
        b.record_failure();
        b.record_success();
        b.record_failure();
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Closed, "counter reset by the success");
    }

    #[test]
    fn half_open_failure_reopens_immediately() {
        let b = CircuitBreaker::new(1, Duration::from_millis(1));
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
        std::thread::sleep(Duration::from_millis(5));
        assert!(b.allow());
        assert_eq!(b.state(), BreakerState::HalfOpen);
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[test]
    fn registry_applies_core_vs_noncore_thresholds() {
        let reg = BreakerRegistry::new();
        reg.register("core-fs", true);
        reg.register("optional-search", false);
        for _ in 0..5 {
            reg.record_failure("optional-search");
        }
        assert_eq!(reg.state("optional-search"), Some(BreakerState::Open));
        for _ in 0..5 {
            reg.record_failure("core-fs");
        }
        assert_eq!(
            reg.state("core-fs"),
            Some(BreakerState::Closed),
            "core services tolerate more failures before tripping"
        );
    }
}
