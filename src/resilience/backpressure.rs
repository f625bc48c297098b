//! In-flight request limiting.
//!
//! A counting semaphore with `max_inflight` permits. The permit is held for
//! the whole call (streams included: it rides inside the stream wrapper and
//! releases on drop). Waiting in the queue is bounded; a timeout surfaces
//! as `overloaded` before the request touches the wire.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::cancel::CancelToken;

#[derive(Debug, Clone)]
pub struct BackpressureConfig {
    pub max_inflight: usize,
    /// How long a request may queue for a permit.
    pub queue_timeout: Duration,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            max_inflight: 64,
            queue_timeout: Duration::from_secs(10),
        }
    }
}

impl BackpressureConfig {
    /// `AI_LIB_MAX_INFLIGHT` override.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = std::env::var("AI_LIB_MAX_INFLIGHT")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        {
            cfg.max_inflight = v.max(1);
        }
        cfg
    }

    pub fn with_max_inflight(mut self, permits: usize) -> Self {
        self.max_inflight = permits.max(1);
        self
    }

    pub fn with_queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone)]
pub struct BackpressureSnapshot {
    pub max_inflight: usize,
    pub available: usize,
}

/// Acquisition failure: queue wait expired or the request was cancelled.
#[derive(Debug, PartialEq, Eq)]
pub enum AcquireError {
    QueueTimeout,
    Cancelled,
}

pub struct Backpressure {
    semaphore: Arc<Semaphore>,
    cfg: BackpressureConfig,
}

impl Backpressure {
    pub fn new(cfg: BackpressureConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(cfg.max_inflight)),
            cfg,
        }
    }

    /// Acquire an in-flight permit, waiting at most the queue timeout.
    pub async fn acquire(&self, cancel: &CancelToken) -> Result<OwnedSemaphorePermit, AcquireError> {
        let acquire = Arc::clone(&self.semaphore).acquire_owned();
        tokio::select! {
            _ = cancel.cancelled() => Err(AcquireError::Cancelled),
            outcome = tokio::time::timeout(self.cfg.queue_timeout, acquire) => match outcome {
                Ok(Ok(permit)) => Ok(permit),
                // Semaphore closed: treated as saturation.
                Ok(Err(_)) => Err(AcquireError::QueueTimeout),
                Err(_) => Err(AcquireError::QueueTimeout),
            },
        }
    }

    pub fn snapshot(&self) -> BackpressureSnapshot {
        BackpressureSnapshot {
            max_inflight: self.cfg.max_inflight,
            available: self.semaphore.available_permits(),
        }
    }
}
