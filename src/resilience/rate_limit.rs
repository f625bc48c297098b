//! Token-bucket rate limiter with adaptive refill.
//!
//! Preflight waits cooperatively for a token up to a configured budget; a
//! request that cannot get one in time fails locally as `rate_limited`
//! without touching the wire. In adaptive mode, provider rate-limit headers
//! observed on responses pull the local refill rate toward what the
//! upstream is actually granting.

use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::cancel::CancelToken;

/// How strongly an observed provider rate pulls the local refill rate.
const ADAPT_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Bucket capacity (burst size), in tokens.
    pub capacity: f64,
    /// Refill rate, tokens per second. `<= 0` disables the limiter.
    pub refill_per_sec: f64,
    /// How long preflight may wait for a token before failing locally.
    pub wait_budget: Duration,
    /// Adjust the refill rate from provider headers.
    pub adaptive: bool,
}

impl RateLimiterConfig {
    pub fn from_rps(rps: f64) -> Self {
        Self {
            capacity: rps.max(1.0),
            refill_per_sec: rps,
            wait_budget: Duration::from_secs(5),
            adaptive: true,
        }
    }

    /// `AI_LIB_RPS`, when set and parseable.
    pub fn from_env() -> Option<Self> {
        let rps: f64 = std::env::var("AI_LIB_RPS").ok()?.parse().ok()?;
        if !rps.is_finite() || rps <= 0.0 {
            return None;
        }
        Some(Self::from_rps(rps))
    }

    pub fn with_capacity(mut self, capacity: f64) -> Self {
        self.capacity = capacity.max(1.0);
        self
    }

    pub fn with_wait_budget(mut self, budget: Duration) -> Self {
        self.wait_budget = budget;
        self
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
    /// Upstream said "stop until here".
    blocked_until: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct RateLimiterSnapshot {
    pub tokens: f64,
    pub refill_per_sec: f64,
    pub estimated_wait: Option<Duration>,
}

pub struct RateLimiter {
    cfg: RateLimiterConfig,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(cfg: RateLimiterConfig) -> Self {
        let bucket = Bucket {
            tokens: cfg.capacity,
            refill_per_sec: cfg.refill_per_sec,
            last_refill: Instant::now(),
            blocked_until: None,
        };
        Self {
            cfg,
            bucket: Mutex::new(bucket),
        }
    }

    fn refill(bucket: &mut Bucket, capacity: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            bucket.tokens = (bucket.tokens + elapsed * bucket.refill_per_sec).min(capacity);
            bucket.last_refill = now;
        }
    }

    /// Take one token, waiting cooperatively up to the configured budget.
    ///
    /// Returns the local wait that *would* be needed when the budget is
    /// exhausted, so callers can attach it as a retry hint.
    pub async fn acquire(&self, cancel: &CancelToken) -> Result<(), Duration> {
        let deadline = Instant::now() + self.cfg.wait_budget;
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                if bucket.refill_per_sec <= 0.0 {
                    return Ok(());
                }
                if let Some(until) = bucket.blocked_until {
                    let now = Instant::now();
                    if until > now {
                        until - now
                    } else {
                        bucket.blocked_until = None;
                        Duration::ZERO
                    }
                } else {
                    Self::refill(&mut bucket, self.cfg.capacity);
                    if bucket.tokens >= 1.0 {
                        bucket.tokens -= 1.0;
                        return Ok(());
                    }
                    let missing = 1.0 - bucket.tokens;
                    Duration::from_secs_f64(missing / bucket.refill_per_sec)
                }
            };

            if wait.is_zero() {
                continue;
            }
            let now = Instant::now();
            if now + wait > deadline {
                return Err(wait);
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(Duration::ZERO),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Non-blocking acquire for callers that prefer failing fast.
    pub async fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock().await;
        if bucket.refill_per_sec <= 0.0 {
            return true;
        }
        if matches!(bucket.blocked_until, Some(until) if until > Instant::now()) {
            return false;
        }
        Self::refill(&mut bucket, self.cfg.capacity);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Feed observed provider rate-limit state back into the bucket.
    ///
    /// `remaining == 0` blocks the bucket until `reset_after`; otherwise,
    /// when adaptive mode is on and both values are known, the refill rate
    /// moves toward `remaining / reset_after`.
    pub async fn observe(&self, remaining: Option<u64>, reset_after: Option<Duration>) {
        let mut bucket = self.bucket.lock().await;
        match remaining {
            Some(0) => {
                let after = reset_after.unwrap_or(Duration::from_secs(1));
                bucket.blocked_until = Some(Instant::now() + after);
            }
            Some(rem) => {
                bucket.blocked_until = None;
                if self.cfg.adaptive {
                    if let Some(reset) = reset_after {
                        let secs = reset.as_secs_f64();
                        if secs > 0.0 {
                            let observed = rem as f64 / secs;
                            bucket.refill_per_sec = bucket.refill_per_sec
                                * (1.0 - ADAPT_WEIGHT)
                                + observed * ADAPT_WEIGHT;
                        }
                    }
                }
            }
            None => {}
        }
    }

    pub async fn snapshot(&self) -> RateLimiterSnapshot {
        let mut bucket = self.bucket.lock().await;
        Self::refill(&mut bucket, self.cfg.capacity);
        let mut wait = None;
        if let Some(until) = bucket.blocked_until {
            let now = Instant::now();
            if until > now {
                wait = Some(until - now);
            }
        }
        if wait.is_none() && bucket.refill_per_sec > 0.0 && bucket.tokens < 1.0 {
            let missing = 1.0 - bucket.tokens;
            wait = Some(Duration::from_secs_f64(missing / bucket.refill_per_sec));
        }
        RateLimiterSnapshot {
            tokens: bucket.tokens,
            refill_per_sec: bucket.refill_per_sec,
            estimated_wait: wait,
        }
    }
}
