//! 错误处理模块：统一错误类型与结构化错误上下文。
//!
//! Unified error type and structured error context.
//!
//! Every fallible operation in the crate surfaces a [`Error`], and every
//! error that reached (or tried to reach) the wire carries a classified
//! [`ErrorKind`](crate::taxonomy::ErrorKind) plus an [`ErrorDetail`] with the
//! observable facts: HTTP status, provider code, `Retry-After` hint, target,
//! attempt number and request id. When the executor exhausts a fallback
//! chain, the surfaced error additionally carries the full per-target
//! attempt history so callers can report why every path failed.

use crate::manifest::ManifestError;
use crate::pipeline::PipelineError;
use crate::taxonomy::ErrorKind;
use crate::transport::TransportError;
use thiserror::Error as ThisError;

/// Structured context attached to classified errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorDetail {
    /// HTTP status, if a response was received.
    pub http_status: Option<u16>,
    /// Provider-specific error code extracted from the response body.
    pub provider_code: Option<String>,
    /// Server-suggested retry delay in milliseconds.
    pub retry_after_ms: Option<u64>,
    /// `provider/model` the attempt targeted.
    pub target: Option<String>,
    /// Zero-based attempt number within the target.
    pub attempt: Option<u32>,
    /// Client-side correlation id.
    pub request_id: Option<String>,
    /// Offending field path for validation errors (e.g. `streaming.content_path`).
    pub field_path: Option<String>,
    /// Actionable hint for the caller.
    pub hint: Option<String>,
}

impl ErrorDetail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_provider_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn with_retry_after_ms(mut self, ms: u64) -> Self {
        self.retry_after_ms = Some(ms);
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// One classified attempt in an exhausted-chain history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub target: String,
    pub attempt: u32,
    pub kind: ErrorKind,
    pub http_status: Option<u16>,
    pub message: String,
}

/// Unified error for the runtime.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A classified failure: preflight rejection, upstream error response,
    /// pipeline fault or cancellation, after classification onto the
    /// taxonomy. This is the variant policy logic keys off.
    #[error("{kind}: {message}{}", format_detail(.detail))]
    Classified {
        kind: ErrorKind,
        message: String,
        detail: ErrorDetail,
        /// Per-target attempt history, populated when a fallback chain is
        /// exhausted (the last entry corresponds to this error).
        history: Vec<AttemptRecord>,
    },
}

fn format_detail(detail: &ErrorDetail) -> String {
    let mut parts = Vec::new();
    if let Some(status) = detail.http_status {
        parts.push(format!("status: {status}"));
    }
    if let Some(ref code) = detail.provider_code {
        parts.push(format!("code: {code}"));
    }
    if let Some(ref target) = detail.target {
        parts.push(format!("target: {target}"));
    }
    if let Some(attempt) = detail.attempt {
        parts.push(format!("attempt: {attempt}"));
    }
    if let Some(ref id) = detail.request_id {
        parts.push(format!("request_id: {id}"));
    }
    if let Some(ref path) = detail.field_path {
        parts.push(format!("field: {path}"));
    }
    let mut out = if parts.is_empty() {
        String::new()
    } else {
        format!(" [{}]", parts.join(", "))
    };
    if let Some(ref hint) = detail.hint {
        out.push_str("\n hint: ");
        out.push_str(hint);
    }
    out
}

impl Error {
    /// Build a classified error with empty detail.
    pub fn classified(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::with_detail(kind, message, ErrorDetail::new())
    }

    /// Build a classified error with detail.
    pub fn with_detail(kind: ErrorKind, message: impl Into<String>, detail: ErrorDetail) -> Self {
        Error::Classified {
            kind,
            message: message.into(),
            detail,
            history: Vec::new(),
        }
    }

    /// Shorthand for a cancellation error.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::classified(ErrorKind::Cancelled, reason)
    }

    /// The classified kind of this error.
    ///
    /// Errors that never reached classification (manifest problems, local
    /// serialization faults) map onto the taxonomy conservatively:
    /// manifest/config errors are `invalid_request` (user-facing, never
    /// retried), transport errors classify per their failure shape, and
    /// pipeline faults are `server_error`.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Classified { kind, .. } => *kind,
            Error::Manifest(_) | Error::Serialization(_) => ErrorKind::InvalidRequest,
            Error::Pipeline(_) => ErrorKind::ServerError,
            Error::Transport(t) => t.classify(),
            Error::Io(_) => ErrorKind::ServerError,
        }
    }

    /// `Retry-After` hint in milliseconds, if the server provided one.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Error::Classified { detail, .. } => detail.retry_after_ms,
            _ => None,
        }
    }

    /// Structured detail, when present.
    pub fn detail(&self) -> Option<&ErrorDetail> {
        match self {
            Error::Classified { detail, .. } => Some(detail),
            _ => None,
        }
    }

    /// Attempt history for exhausted fallback chains (empty otherwise).
    pub fn history(&self) -> &[AttemptRecord] {
        match self {
            Error::Classified { history, .. } => history,
            _ => &[],
        }
    }

    /// Attach an exhausted-chain attempt history.
    pub fn with_history(mut self, records: Vec<AttemptRecord>) -> Self {
        if let Error::Classified { ref mut history, .. } = self {
            *history = records;
        }
        self
    }

    /// Whether retry on the same target is permitted for this error.
    ///
    /// Pipeline faults are retryable (transient stream corruption) but not
    /// fallbackable: a malformed stream usually indicates a protocol
    /// mismatch that would repeat on other targets.
    pub fn retryable(&self) -> bool {
        match self {
            Error::Pipeline(_) => true,
            other => other.kind().retryable(),
        }
    }

    /// Whether advancing the fallback chain is permitted for this error.
    pub fn fallbackable(&self) -> bool {
        match self {
            Error::Pipeline(_) => false,
            other => other.kind().fallbackable(),
        }
    }
}
