//! The composite preflight gate.
//!
//! Evaluated before any network call, in fixed order:
//!
//! 1. circuit breaker (cheapest; rejects known-bad targets outright);
//! 2. rate limiter (may wait, bounded by its budget);
//! 3. backpressure (may queue, bounded by its timeout).
//!
//! Whichever gate fails first determines the surfaced error kind, so when
//! more than one would fail, the report follows the declared order. A
//! reserved half-open probe slot is released if a later gate refuses.

use tokio::sync::OwnedSemaphorePermit;

use crate::cancel::CancelToken;
use crate::error::ErrorDetail;
use crate::resilience::backpressure::AcquireError;
use crate::resilience::hub::ScopeGates;
use crate::taxonomy::ErrorKind;
use crate::{Error, Result};

/// Evidence that a request passed preflight.
///
/// Holds the backpressure permit for the lifetime of the call and remembers
/// whether the request rides as a half-open probe; the executor reports
/// the probe outcome to the breaker exactly once.
#[derive(Debug)]
pub struct PreflightPass {
    pub permit: Option<OwnedSemaphorePermit>,
    pub is_probe: bool,
}

/// Composes the per-scope gates into one check.
pub struct PreflightChecker<'a> {
    gates: &'a ScopeGates,
}

impl<'a> PreflightChecker<'a> {
    pub fn new(gates: &'a ScopeGates) -> Self {
        Self { gates }
    }

    pub async fn check(&self, cancel: &CancelToken) -> Result<PreflightPass> {
        cancel.check()?;

        // 1. Circuit breaker.
        let is_probe = match &self.gates.breaker {
            Some(breaker) => match breaker.try_acquire() {
                Ok(probe) => probe,
                Err(remaining) => {
                    return Err(Error::with_detail(
                        ErrorKind::Overloaded,
                        "circuit breaker open",
                        ErrorDetail::new()
                            .with_retry_after_ms(remaining.as_millis() as u64)
                            .with_hint("the target is cooling down after consecutive failures"),
                    ));
                }
            },
            None => false,
        };

        let release_probe = |gates: &ScopeGates| {
            if is_probe {
                if let Some(ref breaker) = gates.breaker {
                    breaker.abort_probe();
                }
            }
        };

        // 2. Rate limiter.
        if let Some(ref limiter) = self.gates.limiter {
            if let Err(wait) = limiter.acquire(cancel).await {
                release_probe(self.gates);
                if cancel.is_cancelled() {
                    return Err(cancel.as_error());
                }
                return Err(Error::with_detail(
                    ErrorKind::RateLimited,
                    "local rate limit exceeded before reaching the wire",
                    ErrorDetail::new().with_retry_after_ms(wait.as_millis() as u64),
                ));
            }
        }

        // 3. Backpressure.
        let permit = match &self.gates.backpressure {
            Some(bp) => match bp.acquire(cancel).await {
                Ok(permit) => Some(permit),
                Err(AcquireError::Cancelled) => {
                    release_probe(self.gates);
                    return Err(cancel.as_error());
                }
                Err(AcquireError::QueueTimeout) => {
                    release_probe(self.gates);
                    return Err(Error::classified(
                        ErrorKind::Overloaded,
                        "in-flight limit reached and queue wait expired",
                    ));
                }
            },
            None => None,
        };

        Ok(PreflightPass { permit, is_probe })
    }
}
