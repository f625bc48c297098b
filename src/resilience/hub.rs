//! Process-wide resilience registry.
//!
//! Limiter, breaker and backpressure state must be shared by every request
//! targeting the same scope (normally the provider id), while remaining
//! invisible across scopes. The hub hands out per-scope gate bundles,
//! creating them from env-driven defaults on first use. Construction is
//! explicit (the hub lives inside the executor, not in a module-level
//! static) and [`ResilienceHub::reset`] tears everything down.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::resilience::backpressure::{Backpressure, BackpressureConfig};
use crate::resilience::breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::resilience::rate_limit::{RateLimiter, RateLimiterConfig};

/// The shared gate bundle for one scope.
#[derive(Clone, Default)]
pub struct ScopeGates {
    pub breaker: Option<Arc<CircuitBreaker>>,
    pub limiter: Option<Arc<RateLimiter>>,
    pub backpressure: Option<Arc<Backpressure>>,
}

/// Template the hub instantiates per scope.
#[derive(Clone)]
pub struct HubConfig {
    pub breaker: Option<CircuitBreakerConfig>,
    pub limiter: Option<RateLimiterConfig>,
    pub backpressure: Option<BackpressureConfig>,
}

impl HubConfig {
    /// Env-driven defaults: breaker and backpressure always on, rate
    /// limiting only when `AI_LIB_RPS` is set.
    pub fn from_env() -> Self {
        Self {
            breaker: Some(CircuitBreakerConfig::from_env()),
            limiter: RateLimiterConfig::from_env(),
            backpressure: Some(BackpressureConfig::from_env()),
        }
    }

    /// Everything off; useful in tests and for callers that bring their
    /// own gating.
    pub fn disabled() -> Self {
        Self {
            breaker: None,
            limiter: None,
            backpressure: None,
        }
    }
}

pub struct ResilienceHub {
    template: HubConfig,
    scopes: Mutex<HashMap<String, ScopeGates>>,
}

impl ResilienceHub {
    pub fn new(template: HubConfig) -> Self {
        Self {
            template,
            scopes: Mutex::new(HashMap::new()),
        }
    }

    /// The gates for a scope, created on first use.
    pub fn gates(&self, scope: &str) -> ScopeGates {
        let mut scopes = self.scopes.lock().expect("hub lock");
        scopes
            .entry(scope.to_string())
            .or_insert_with(|| ScopeGates {
                breaker: self
                    .template
                    .breaker
                    .clone()
                    .map(|cfg| Arc::new(CircuitBreaker::new(cfg))),
                limiter: self
                    .template
                    .limiter
                    .clone()
                    .map(|cfg| Arc::new(RateLimiter::new(cfg))),
                backpressure: self
                    .template
                    .backpressure
                    .clone()
                    .map(|cfg| Arc::new(Backpressure::new(cfg))),
            })
            .clone()
    }

    /// Drop all per-scope state (shutdown / test isolation).
    pub fn reset(&self) {
        self.scopes.lock().expect("hub lock").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_scope_shares_gates_distinct_scopes_do_not() {
        let hub = ResilienceHub::new(HubConfig::from_env());
        let a1 = hub.gates("openai");
        let a2 = hub.gates("openai");
        let b = hub.gates("anthropic");

        let a1_breaker = a1.breaker.unwrap();
        let a2_breaker = a2.breaker.unwrap();
        let b_breaker = b.breaker.unwrap();
        assert!(Arc::ptr_eq(&a1_breaker, &a2_breaker));
        assert!(!Arc::ptr_eq(&a1_breaker, &b_breaker));
    }

    #[test]
    fn reset_discards_scope_state() {
        let hub = ResilienceHub::new(HubConfig::from_env());
        let before = hub.gates("x").breaker.unwrap();
        hub.reset();
        let after = hub.gates("x").breaker.unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
    }
}
