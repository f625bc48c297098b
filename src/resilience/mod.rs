//! 弹性模块:重试、限流、熔断、背压与预检门控。
//!
//! Resilience primitives and their composition. Every network attempt
//! passes the preflight gate first; failures classify onto the taxonomy so
//! retry and fallback policies stay uniform.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`retry`] | Exponential backoff with jitter and `Retry-After` clamping |
//! | [`rate_limit`] | Token bucket with adaptive refill from provider headers |
//! | [`breaker`] | Three-state circuit breaker with half-open probes |
//! | [`backpressure`] | Bounded in-flight permits with queue-wait timeout |
//! | [`preflight`] | Composite gate: circuit → rate limiter → backpressure |
//! | [`hub`] | Process-wide per-scope registry of the shared components |
//!
//! Ownership: the limiter, breaker and backpressure semaphore are shared by
//! every request targeting the same scope key (normally the provider id);
//! retry state is per-attempt-loop and never shared.

pub mod backpressure;
pub mod breaker;
pub mod hub;
pub mod preflight;
pub mod rate_limit;
pub mod retry;

pub use backpressure::{Backpressure, BackpressureConfig};
pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use hub::{ResilienceHub, ScopeGates};
pub use preflight::{PreflightChecker, PreflightPass};
pub use rate_limit::{RateLimiter, RateLimiterConfig};
pub use retry::{Jitter, RetryPolicy};
