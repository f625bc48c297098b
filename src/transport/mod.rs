//! 传输模块：异步 HTTP 发送器与凭证解析。
//!
//! Async HTTP transport. Issues compiled wire requests over a pooled
//! `reqwest` client (HTTP/2 when the server supports it, HTTP/1.1
//! otherwise), returns full responses or byte streams, and resolves
//! credentials through the documented source chain.

pub mod auth;
pub mod http;

pub use auth::resolve_api_key;
pub use http::{HttpTransport, TransportConfig};

use crate::taxonomy::ErrorKind;
use thiserror::Error;

/// Transport-level failures, below HTTP status semantics.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("deadline exceeded: {0}")]
    Timeout(String),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Map onto the taxonomy: deadline → `timeout`, cancel → `cancelled`,
    /// everything else → `server_error`.
    pub fn classify(&self) -> ErrorKind {
        match self {
            TransportError::Timeout(_) => ErrorKind::Timeout,
            TransportError::Cancelled => ErrorKind::Cancelled,
            TransportError::Http(e) if e.is_timeout() => ErrorKind::Timeout,
            _ => ErrorKind::ServerError,
        }
    }
}
