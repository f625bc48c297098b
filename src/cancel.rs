//! Cooperative cancellation.
//!
//! A [`CancelToken`] is threaded from the executor through preflight waits,
//! retry delays, the transport and the pipeline. Every suspension point
//! polls it; cancellation surfaces as `ErrorKind::Cancelled` (or a terminal
//! `StreamError` on event streams) and releases resources promptly because
//! dropping the wrapped stream closes the underlying connection.

use futures::StreamExt;
use std::sync::{Arc, Mutex, OnceLock};
use tokio_util::sync::CancellationToken;

use crate::types::events::CanonicalEvent;
use crate::BoxStream;

/// Why a request was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    UserRequest,
    Timeout,
    Error,
}

impl CancelReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelReason::UserRequest => "user_request",
            CancelReason::Timeout => "timeout",
            CancelReason::Error => "error",
        }
    }
}

type Callback = Box<dyn FnOnce(CancelReason) + Send>;

struct Inner {
    token: CancellationToken,
    reason: OnceLock<CancelReason>,
    callbacks: Mutex<Vec<Callback>>,
}

/// Cloneable cooperative cancellation handle.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                token: CancellationToken::new(),
                reason: OnceLock::new(),
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Request cancellation. Idempotent: the first reason sticks, and
    /// registered callbacks fire exactly once.
    pub fn cancel(&self, reason: CancelReason) {
        if self.inner.reason.set(reason).is_ok() {
            let callbacks: Vec<Callback> = {
                let mut guard = self.inner.callbacks.lock().expect("cancel callbacks lock");
                guard.drain(..).collect()
            };
            for cb in callbacks {
                cb(reason);
            }
            self.inner.token.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// The reason, once cancelled.
    pub fn reason(&self) -> Option<CancelReason> {
        self.inner.reason.get().copied()
    }

    /// Resolves when cancellation is requested.
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }

    /// Register a callback. Runs immediately if already cancelled.
    pub fn on_cancel(&self, cb: impl FnOnce(CancelReason) + Send + 'static) {
        if let Some(reason) = self.reason() {
            cb(reason);
            return;
        }
        let mut guard = self.inner.callbacks.lock().expect("cancel callbacks lock");
        // Racing cancel() may have drained between the check and the lock.
        if let Some(reason) = self.reason() {
            drop(guard);
            cb(reason);
        } else {
            guard.push(Box::new(cb));
        }
    }

    /// Error shorthand for suspension points.
    pub fn as_error(&self) -> crate::Error {
        let reason = self.reason().unwrap_or(CancelReason::UserRequest);
        crate::Error::cancelled(format!("request cancelled ({})", reason.as_str()))
    }

    /// Bail out if already cancelled. Call at every suspension boundary.
    pub fn check(&self) -> crate::Result<()> {
        if self.is_cancelled() {
            Err(self.as_error())
        } else {
            Ok(())
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

/// Wrap an event stream so cancellation yields one terminal
/// `StreamError { kind: cancelled }` and stops iteration. Dropping the
/// wrapper drops the source, which closes the transport connection.
pub fn cancellable_events(
    mut events: BoxStream<CanonicalEvent>,
    token: CancelToken,
) -> BoxStream<CanonicalEvent> {
    let stream = async_stream::stream! {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    let reason = token.reason().unwrap_or(CancelReason::UserRequest);
                    yield Ok(CanonicalEvent::StreamError {
                        kind: crate::taxonomy::ErrorKind::Cancelled,
                        message: format!("stream cancelled ({})", reason.as_str()),
                    });
                    break;
                }
                item = events.next() => {
                    match item {
                        Some(event) => yield event,
                        None => break,
                    }
                }
            }
        }
    };
    Box::pin(stream)
}
