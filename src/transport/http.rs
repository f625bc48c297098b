//! HTTP issuer built on `reqwest`.

use bytes::Bytes;
use futures::StreamExt;
use std::env;
use std::time::Duration;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::manifest::compile::WireRequest;
use crate::transport::TransportError;
use crate::{BoxStream, Error, Result};

/// Transport knobs; every field has an env-overridable default.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Per-request deadline (`AI_HTTP_TIMEOUT_SECS`).
    pub request_timeout: Duration,
    /// Connect timeout (`AI_HTTP_CONNECT_TIMEOUT_SECS`).
    pub connect_timeout: Duration,
    /// Inter-chunk idle timeout on streams (`AI_HTTP_IDLE_TIMEOUT_SECS`).
    pub idle_timeout: Duration,
    /// Honor proxy environment variables (`AI_HTTP_TRUST_ENV`).
    pub trust_env: bool,
    /// Pool sizing (`AI_HTTP_POOL_MAX_IDLE_PER_HOST`).
    pub pool_max_idle_per_host: usize,
}

impl TransportConfig {
    pub fn from_env() -> Self {
        fn env_u64(name: &str, default: u64) -> u64 {
            env::var(name).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
        }
        Self {
            request_timeout: Duration::from_secs(env_u64("AI_HTTP_TIMEOUT_SECS", 300)),
            connect_timeout: Duration::from_secs(env_u64("AI_HTTP_CONNECT_TIMEOUT_SECS", 10)),
            idle_timeout: Duration::from_secs(env_u64("AI_HTTP_IDLE_TIMEOUT_SECS", 120)),
            trust_env: env::var("AI_HTTP_TRUST_ENV").ok().as_deref() == Some("1"),
            pool_max_idle_per_host: env_u64("AI_HTTP_POOL_MAX_IDLE_PER_HOST", 32) as usize,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Shared, pooled HTTP issuer.
///
/// One instance serves all requests of an executor; it holds no per-request
/// state. Streaming deadlines are two-layered: the client-level request
/// timeout bounds the handshake-to-last-byte window, and
/// [`HttpTransport::byte_stream`] applies the inter-chunk idle timeout.
pub struct HttpTransport {
    client: reqwest::Client,
    idle_timeout: Duration,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        Self::with_config(TransportConfig::from_env())
    }

    pub fn with_config(cfg: TransportConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(cfg.request_timeout)
            .connect_timeout(cfg.connect_timeout)
            .pool_max_idle_per_host(cfg.pool_max_idle_per_host)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .http2_adaptive_window(true)
            .http2_keep_alive_interval(Some(Duration::from_secs(30)))
            .http2_keep_alive_timeout(Duration::from_secs(10));

        if !cfg.trust_env {
            builder = builder.no_proxy();
        }

        let client = builder
            .build()
            .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?;

        Ok(Self {
            client,
            idle_timeout: cfg.idle_timeout,
        })
    }

    /// Send a compiled wire request. Observes the cancel token for the full
    /// handshake; classification of HTTP statuses happens in the caller.
    pub async fn send(
        &self,
        wire: &WireRequest,
        request_id: &str,
        streaming: bool,
        cancel: &CancelToken,
    ) -> Result<reqwest::Response> {
        let mut req = match wire.method.as_str() {
            "POST" => self.client.post(&wire.url),
            "PUT" => self.client.put(&wire.url),
            "DELETE" => self.client.delete(&wire.url),
            _ => self.client.get(&wire.url),
        };
        for (name, value) in &wire.headers {
            req = req.header(name, value);
        }
        if streaming {
            req = req.header("accept", "text/event-stream");
        }
        // Correlation id; providers may ignore it.
        req = req.header("x-client-request-id", request_id);
        req = req.body(wire.body_bytes()?);

        debug!(url = wire.url.as_str(), streaming, "transport send");

        let send = req.send();
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Transport(TransportError::Cancelled)),
            resp = send => resp.map_err(|e| {
                if e.is_timeout() {
                    Error::Transport(TransportError::Timeout(e.to_string()))
                } else if e.is_connect() {
                    Error::Transport(TransportError::Connect(e.to_string()))
                } else {
                    Error::Transport(TransportError::Http(e))
                }
            }),
        }
    }

    /// Turn a response into a byte stream with the inter-chunk idle timeout
    /// applied. An idle expiry yields a terminal `timeout` transport error.
    pub fn byte_stream(&self, response: reqwest::Response) -> BoxStream<Bytes> {
        let idle = self.idle_timeout;
        let mut inner = response.bytes_stream();
        let stream = async_stream::stream! {
            loop {
                match tokio::time::timeout(idle, inner.next()).await {
                    Ok(Some(Ok(bytes))) => yield Ok(bytes),
                    Ok(Some(Err(e))) => {
                        let mapped = if e.is_timeout() {
                            TransportError::Timeout(e.to_string())
                        } else {
                            TransportError::Http(e)
                        };
                        yield Err(Error::Transport(mapped));
                        break;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        yield Err(Error::Transport(TransportError::Timeout(format!(
                            "no stream data within {}s", idle.as_secs()
                        ))));
                        break;
                    }
                }
            }
        };
        Box::pin(stream)
    }
}
