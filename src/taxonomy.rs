//! 错误分类模块：13 个规范错误类别及其重试/回退语义与分类器。
//!
//! Error taxonomy: the closed set of thirteen canonical error kinds, each
//! carrying static `retryable` / `fallbackable` semantics, plus the pure
//! classifier that maps transport failures, HTTP statuses and provider
//! error codes onto the taxonomy.
//!
//! The taxonomy is the single vocabulary every policy component speaks:
//! retry loops, the fallback chain and the circuit breaker all key their
//! decisions off an [`ErrorKind`], never off raw statuses.

use std::collections::HashMap;
use std::fmt;

/// Canonical error kind.
///
/// The set is closed: providers may *alias* onto these kinds via their
/// manifest's `error_mapping`, but no new kinds can be introduced at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed request, invalid parameters, or missing required fields.
    InvalidRequest,
    /// Invalid, expired, or missing API key.
    Authentication,
    /// Valid credentials but insufficient permissions.
    PermissionDenied,
    /// Requested model, endpoint, or resource does not exist.
    NotFound,
    /// Input exceeds context window or payload size limit.
    RequestTooLarge,
    /// Request rate limit exceeded.
    RateLimited,
    /// Account usage quota or billing limit reached.
    QuotaExhausted,
    /// Internal server error on provider side.
    ServerError,
    /// Provider service temporarily overloaded.
    Overloaded,
    /// Request timed out before a response was received.
    Timeout,
    /// State conflict (e.g. concurrent modification).
    Conflict,
    /// Request was cancelled by the client.
    Cancelled,
    /// Error could not be classified.
    Unknown,
}

impl ErrorKind {
    /// All thirteen kinds, in stable declaration order.
    pub const ALL: [ErrorKind; 13] = [
        Self::InvalidRequest,
        Self::Authentication,
        Self::PermissionDenied,
        Self::NotFound,
        Self::RequestTooLarge,
        Self::RateLimited,
        Self::QuotaExhausted,
        Self::ServerError,
        Self::Overloaded,
        Self::Timeout,
        Self::Conflict,
        Self::Cancelled,
        Self::Unknown,
    ];

    /// Stable snake_case code (wire-format name used in manifests and logs).
    #[inline]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::Authentication => "authentication",
            Self::PermissionDenied => "permission_denied",
            Self::NotFound => "not_found",
            Self::RequestTooLarge => "request_too_large",
            Self::RateLimited => "rate_limited",
            Self::QuotaExhausted => "quota_exhausted",
            Self::ServerError => "server_error",
            Self::Overloaded => "overloaded",
            Self::Timeout => "timeout",
            Self::Conflict => "conflict",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the same target may be retried after this error.
    #[inline]
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ServerError | Self::Overloaded | Self::Timeout | Self::Conflict
        )
    }

    /// Whether the next target in a fallback chain should be attempted.
    #[inline]
    pub fn fallbackable(&self) -> bool {
        matches!(
            self,
            Self::Authentication
                | Self::RateLimited
                | Self::QuotaExhausted
                | Self::ServerError
                | Self::Overloaded
                | Self::Timeout
        )
    }

    /// Parse a stable code back into a kind. Unknown codes yield `None` so
    /// callers can distinguish "not a taxonomy name" from `Unknown`.
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.code() == code)
    }

    /// Fixed HTTP status table (spec-defined; manifest overrides win over
    /// this table, see [`classify`]).
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 | 422 => Self::InvalidRequest,
            401 => Self::Authentication,
            403 => Self::PermissionDenied,
            404 => Self::NotFound,
            408 => Self::Timeout,
            409 => Self::Conflict,
            413 => Self::RequestTooLarge,
            429 => Self::RateLimited,
            500 | 502 | 504 => Self::ServerError,
            // 529 is Anthropic's non-standard overload status.
            503 | 529 => Self::Overloaded,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl serde::Serialize for ErrorKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl<'de> serde::Deserialize<'de> for ErrorKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        ErrorKind::from_code(&code)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown error kind '{code}'")))
    }
}

/// Transport-level failure shape, as observed below HTTP status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailure {
    /// Connect / DNS / TLS failure before any response.
    Connect,
    /// Deadline exceeded (connect, request or inter-chunk idle).
    DeadlineExceeded,
    /// The caller cancelled the in-flight request.
    Cancelled,
    /// Anything else (reset, protocol error, body read failure).
    Other,
}

/// Classification input. All fields optional; the classifier is total.
#[derive(Debug, Default, Clone)]
pub struct ClassifyInput<'a> {
    pub http_status: Option<u16>,
    pub provider_code: Option<&'a str>,
    pub transport_failure: Option<TransportFailure>,
    /// Provider-specific `{code → kind}` overrides from the manifest.
    pub error_mapping: Option<&'a HashMap<String, String>>,
}

/// Map an observed failure to exactly one [`ErrorKind`].
///
/// Priority order:
/// 1. transport failures (deadline → `Timeout`, cancel → `Cancelled`,
///    everything else → `ServerError`);
/// 2. provider code through the manifest's `error_mapping`;
/// 3. provider code as a taxonomy name;
/// 4. the fixed HTTP status table;
/// 5. `Unknown`.
///
/// Pure and total: never panics, never errors.
pub fn classify(input: &ClassifyInput<'_>) -> ErrorKind {
    if let Some(tf) = input.transport_failure {
        return match tf {
            TransportFailure::DeadlineExceeded => ErrorKind::Timeout,
            TransportFailure::Cancelled => ErrorKind::Cancelled,
            TransportFailure::Connect | TransportFailure::Other => ErrorKind::ServerError,
        };
    }

    if let Some(code) = input.provider_code {
        if let Some(mapped) = input.error_mapping.and_then(|m| m.get(code)) {
            if let Some(kind) = ErrorKind::from_code(mapped) {
                return kind;
            }
        }
        if let Some(kind) = ErrorKind::from_code(code) {
            return kind;
        }
    }

    if let Some(status) = input.http_status {
        return ErrorKind::from_http_status(status);
    }

    ErrorKind::Unknown
}
