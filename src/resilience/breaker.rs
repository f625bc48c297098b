//! Circuit breaker.
//!
//! Per-scope three-state machine:
//!
//! - `closed` counts consecutive qualifying failures; reaching
//!   `failure_threshold` opens the circuit;
//! - `open` rejects all traffic until the cooldown elapses, then admits
//!   half-open probes;
//! - `half_open` allows up to `success_threshold` concurrent probes; every
//!   probe success consumes one slot, the last success closes the circuit,
//!   and any probe failure reopens it with a fresh timestamp.
//!
//! Transitions take one short mutex; callers never observe a torn state.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Public state snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
    /// Successful probes required to close from half-open.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            success_threshold: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn from_env() -> Self {
        fn env_u64(name: &str) -> Option<u64> {
            std::env::var(name).ok().and_then(|s| s.parse().ok())
        }
        let mut cfg = Self::default();
        if let Some(v) = env_u64("AI_LIB_BREAKER_FAILURE_THRESHOLD") {
            cfg.failure_threshold = v as u32;
        }
        if let Some(v) = env_u64("AI_LIB_BREAKER_COOLDOWN_SECS") {
            cfg.cooldown = Duration::from_secs(v);
        }
        cfg
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold.max(1);
        self
    }
}

#[derive(Debug)]
enum Inner {
    Closed {
        consecutive_failures: u32,
    },
    Open {
        since: Instant,
    },
    HalfOpen {
        /// Successes still needed to close.
        probes_remaining: u32,
        /// Probes currently on the wire.
        in_flight: u32,
    },
}

/// Snapshot of the breaker's counters for signals/observability.
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub open_remaining: Option<Duration>,
    pub probes_remaining: Option<u32>,
}

pub struct CircuitBreaker {
    cfg: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(cfg: CircuitBreakerConfig) -> Self {
        Self {
            cfg,
            inner: Mutex::new(Inner::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    /// Admit a request, reserving a probe slot when half-open.
    ///
    /// `Ok(true)` means the request rides as a half-open probe and the
    /// caller MUST report its outcome (or abort) exactly once.
    pub fn try_acquire(&self) -> Result<bool, Duration> {
        let mut inner = self.inner.lock().expect("breaker lock");
        match *inner {
            Inner::Closed { .. } => Ok(false),
            Inner::Open { since } => {
                let elapsed = since.elapsed();
                if elapsed >= self.cfg.cooldown {
                    *inner = Inner::HalfOpen {
                        probes_remaining: self.cfg.success_threshold,
                        in_flight: 1,
                    };
                    Ok(true)
                } else {
                    Err(self.cfg.cooldown - elapsed)
                }
            }
            Inner::HalfOpen {
                probes_remaining,
                ref mut in_flight,
            } => {
                if *in_flight < probes_remaining {
                    *in_flight += 1;
                    Ok(true)
                } else {
                    Err(Duration::ZERO)
                }
            }
        }
    }

    /// A probe slot was reserved but the request never reached the wire
    /// (later preflight gate refused, cancellation). Frees the slot with no
    /// state transition.
    pub fn abort_probe(&self) {
        let mut inner = self.inner.lock().expect("breaker lock");
        if let Inner::HalfOpen { ref mut in_flight, .. } = *inner {
            *in_flight = in_flight.saturating_sub(1);
        }
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock");
        match *inner {
            Inner::Closed { ref mut consecutive_failures } => *consecutive_failures = 0,
            Inner::HalfOpen {
                ref mut probes_remaining,
                ref mut in_flight,
            } => {
                *in_flight = in_flight.saturating_sub(1);
                *probes_remaining = probes_remaining.saturating_sub(1);
                if *probes_remaining == 0 {
                    *inner = Inner::Closed {
                        consecutive_failures: 0,
                    };
                }
            }
            Inner::Open { .. } => {}
        }
    }

    /// Record a qualifying (server-side, retryable-class) failure.
    pub fn on_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock");
        match *inner {
            Inner::Closed { ref mut consecutive_failures } => {
                *consecutive_failures += 1;
                if *consecutive_failures >= self.cfg.failure_threshold {
                    *inner = Inner::Open { since: Instant::now() };
                }
            }
            Inner::HalfOpen { .. } => {
                *inner = Inner::Open { since: Instant::now() };
            }
            Inner::Open { .. } => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        match *self.inner.lock().expect("breaker lock") {
            Inner::Closed { .. } => CircuitState::Closed,
            Inner::Open { .. } => CircuitState::Open,
            Inner::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().expect("breaker lock");
        match *inner {
            Inner::Closed { consecutive_failures } => BreakerSnapshot {
                state: CircuitState::Closed,
                consecutive_failures,
                open_remaining: None,
                probes_remaining: None,
            },
            Inner::Open { since } => BreakerSnapshot {
                state: CircuitState::Open,
                consecutive_failures: self.cfg.failure_threshold,
                open_remaining: self.cfg.cooldown.checked_sub(since.elapsed()),
                probes_remaining: None,
            },
            Inner::HalfOpen { probes_remaining, .. } => BreakerSnapshot {
                state: CircuitState::HalfOpen,
                consecutive_failures: 0,
                open_remaining: None,
                probes_remaining: Some(probes_remaining),
            },
        }
    }
}
