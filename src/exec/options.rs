//! Per-call execution options.

use crate::cancel::CancelToken;
use crate::resilience::retry::RetryPolicy;

/// Options for one logical request.
#[derive(Clone, Default)]
pub struct ExecOptions {
    /// Retry policy override; the executor default applies otherwise.
    pub retry: Option<RetryPolicy>,
    /// Explicit API key, winning over every other credential source.
    pub api_key: Option<String>,
    /// Expand multi-candidate streams instead of pinning candidate 0.
    /// Only effective when the manifest declares a fan-out path.
    pub expand_candidates: bool,
    /// Cooperative cancellation handle. A fresh token is used when absent.
    pub cancel: Option<CancelToken>,
}

impl ExecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_expand_candidates(mut self, expand: bool) -> Self {
        self.expand_candidates = expand;
        self
    }
}
