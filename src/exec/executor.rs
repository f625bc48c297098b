//! The resilient executor.

use futures::StreamExt;
use reqwest::header::HeaderMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use crate::cancel::{cancellable_events, CancelToken};
use crate::error::{AttemptRecord, ErrorDetail};
use crate::exec::options::ExecOptions;
use crate::exec::outcome::{fold_events, ChatOutcome, FoldReport};
use crate::manifest::compile::compile_request;
use crate::manifest::schema::ProtocolManifest;
use crate::manifest::ManifestLoader;
use crate::observe::{noop_sink, SharedSink, SinkEvent, SinkLevel};
use crate::pipeline::{map_complete_response, Pipeline};
use crate::resilience::hub::{HubConfig, ResilienceHub, ScopeGates};
use crate::resilience::preflight::{PreflightChecker, PreflightPass};
use crate::resilience::retry::RetryPolicy;
use crate::taxonomy::{classify, ClassifyInput, ErrorKind};
use crate::transport::{resolve_api_key, HttpTransport};
use crate::types::embedding::{EmbeddingRequest, EmbeddingResponse};
use crate::types::events::CanonicalEvent;
use crate::types::request::CanonicalRequest;
use crate::types::stats::CallStats;
use crate::types::target::ProviderTarget;
use crate::{BoxStream, Error, Result};

/// Orchestrates one logical request across preflight, transport, pipeline,
/// retry and the fallback chain.
pub struct ResilientExecutor {
    loader: Arc<ManifestLoader>,
    transport: Arc<HttpTransport>,
    hub: ResilienceHub,
    sink: SharedSink,
    default_retry: RetryPolicy,
}

/// What a single successful attempt produced.
enum AttemptOutput {
    Folded {
        report: FoldReport,
        upstream_request_id: Option<String>,
    },
    Stream {
        events: BoxStream<CanonicalEvent>,
        upstream_request_id: Option<String>,
    },
    Embedding {
        response: EmbeddingResponse,
        upstream_request_id: Option<String>,
    },
}

/// The work to perform at each target.
enum Payload<'a> {
    /// Chat folded into a final outcome.
    Chat(&'a CanonicalRequest),
    /// Chat returned as a live event stream.
    ChatStream(&'a CanonicalRequest),
    Embedding(&'a EmbeddingRequest),
}

impl ResilientExecutor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            loader: Arc::new(ManifestLoader::new()),
            transport: Arc::new(HttpTransport::new()?),
            hub: ResilienceHub::new(HubConfig::from_env()),
            sink: noop_sink(),
            default_retry: RetryPolicy::default(),
        })
    }

    pub fn with_loader(mut self, loader: Arc<ManifestLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_hub(mut self, hub: ResilienceHub) -> Self {
        self.hub = hub;
        self
    }

    pub fn with_default_retry(mut self, retry: RetryPolicy) -> Self {
        self.default_retry = retry;
        self
    }

    pub fn loader(&self) -> &Arc<ManifestLoader> {
        &self.loader
    }

    /// Execute a chat request and fold the response into a final outcome.
    pub async fn execute(
        &self,
        targets: &[ProviderTarget],
        request: &CanonicalRequest,
        options: &ExecOptions,
    ) -> Result<(ChatOutcome, CallStats)> {
        let (output, mut stats) = self
            .run_chain(targets, Payload::Chat(request), options)
            .await?;
        match output {
            AttemptOutput::Folded {
                report,
                upstream_request_id,
            } => {
                stats.time_to_first_event_ms = report.first_event_ms;
                stats.upstream_request_id = upstream_request_id;
                if let Some(ref usage) = report.outcome.usage {
                    stats.absorb_usage(usage);
                }
                Ok((report.outcome, stats))
            }
            _ => unreachable!("chat payload produces folded output"),
        }
    }

    /// Execute a chat request and return the live canonical event stream.
    ///
    /// Retry and fallback apply to the handshake; once the stream is handed
    /// out, errors surface as a terminal `StreamError` event.
    pub async fn execute_stream(
        &self,
        targets: &[ProviderTarget],
        request: &CanonicalRequest,
        options: &ExecOptions,
    ) -> Result<(BoxStream<CanonicalEvent>, CallStats)> {
        let (output, mut stats) = self
            .run_chain(targets, Payload::ChatStream(request), options)
            .await?;
        match output {
            AttemptOutput::Stream {
                events,
                upstream_request_id,
            } => {
                stats.upstream_request_id = upstream_request_id;
                Ok((events, stats))
            }
            _ => unreachable!("chat-stream payload produces stream output"),
        }
    }

    /// Execute an embedding request (always non-streaming).
    pub async fn execute_embedding(
        &self,
        targets: &[ProviderTarget],
        request: &EmbeddingRequest,
        options: &ExecOptions,
    ) -> Result<(EmbeddingResponse, CallStats)> {
        let (output, mut stats) = self
            .run_chain(targets, Payload::Embedding(request), options)
            .await?;
        match output {
            AttemptOutput::Embedding {
                response,
                upstream_request_id,
            } => {
                stats.upstream_request_id = upstream_request_id;
                if let Some(ref usage) = response.usage {
                    stats.absorb_usage(usage);
                }
                Ok((response, stats))
            }
            _ => unreachable!("embedding payload produces embedding output"),
        }
    }

    /// The chain driver: targets in order, retry within a target, fallback
    /// across targets, full attempt history on exhaustion.
    async fn run_chain(
        &self,
        targets: &[ProviderTarget],
        payload: Payload<'_>,
        options: &ExecOptions,
    ) -> Result<(AttemptOutput, CallStats)> {
        if targets.is_empty() {
            return Err(Error::classified(
                ErrorKind::InvalidRequest,
                "no targets given",
            ));
        }
        let chain = order_chain(targets);
        let cancel = options.cancel.clone().unwrap_or_default();
        let retry = options.retry.clone().unwrap_or_else(|| self.default_retry.clone());

        let request_id = Uuid::new_v4().to_string();
        let mut stats = CallStats::begin(request_id.clone());
        let started = Instant::now();
        let mut history: Vec<AttemptRecord> = Vec::new();

        self.sink.emit(
            SinkEvent::new("request_start")
                .attr("request_id", request_id.clone())
                .attr(
                    "targets",
                    chain.iter().map(|t| t.qualified()).collect::<Vec<_>>(),
                ),
        );

        let mut last_err: Option<Error> = None;

        'chain: for (position, target) in chain.iter().enumerate() {
            let has_next = position + 1 < chain.len();

            let manifest = match self.loader.load(&target.provider_id).await {
                Ok(m) => m,
                Err(e) => {
                    warn!(target = target.qualified().as_str(), error = %e,
                          "manifest unavailable, skipping target");
                    history.push(record(target, 0, &e));
                    last_err = Some(e);
                    continue 'chain;
                }
            };

            let gates = self.hub.gates(&target.provider_id);
            stats.retry_count = 0;
            let mut attempt: u32 = 0;

            loop {
                if cancel.is_cancelled() {
                    let e = cancel.as_error();
                    history.push(record(target, attempt, &e));
                    return Err(finish_with_history(e, history));
                }

                let result = self
                    .attempt(&manifest, target, &payload, options, &gates, &cancel, &request_id)
                    .await;

                match result {
                    Ok(output) => {
                        stats.latency_ms = started.elapsed().as_millis() as u64;
                        stats.target_used = target.qualified();
                        self.sink.emit(
                            SinkEvent::new("request_end")
                                .attr("request_id", request_id.clone())
                                .attr("target", target.qualified())
                                .attr("retry_count", stats.retry_count)
                                .attr("latency_ms", stats.latency_ms),
                        );
                        return Ok((output, stats));
                    }
                    Err(e) => {
                        history.push(record(target, attempt, &e));
                        if e.kind() == ErrorKind::Cancelled {
                            return Err(finish_with_history(e, history));
                        }

                        let circuit_open = gates
                            .breaker
                            .as_ref()
                            .map(|b| b.state() == crate::resilience::CircuitState::Open)
                            .unwrap_or(false);

                        if e.retryable() && retry.attempts_remain(attempt) && !circuit_open {
                            let hint = e.retry_after_ms().map(Duration::from_millis);
                            let delay = retry.delay_for(attempt, hint);
                            self.sink.emit(
                                SinkEvent::new("retry")
                                    .attr("target", target.qualified())
                                    .attr("attempt", attempt)
                                    .attr("delay_ms", delay.as_millis() as u64)
                                    .attr("kind", e.kind().code()),
                            );
                            stats.retry_count += 1;
                            tokio::select! {
                                _ = cancel.cancelled() => {
                                    let e = cancel.as_error();
                                    return Err(finish_with_history(e, history));
                                }
                                _ = tokio::time::sleep(delay) => {}
                            }
                            attempt += 1;
                            continue;
                        }

                        if e.fallbackable() && has_next {
                            self.sink.emit(
                                SinkEvent::new("fallback")
                                    .level(SinkLevel::Warn)
                                    .attr("from", target.qualified())
                                    .attr("kind", e.kind().code()),
                            );
                            last_err = Some(e);
                            continue 'chain;
                        }

                        return Err(finish_with_history(e, history));
                    }
                }
            }
        }

        let e = last_err
            .unwrap_or_else(|| Error::classified(ErrorKind::Unknown, "all targets exhausted"));
        Err(finish_with_history(e, history))
    }

    /// One attempt against one target: preflight → compile → transport →
    /// classification → payload-specific success handling.
    async fn attempt(
        &self,
        manifest: &Arc<ProtocolManifest>,
        target: &ProviderTarget,
        payload: &Payload<'_>,
        options: &ExecOptions,
        gates: &ScopeGates,
        cancel: &CancelToken,
        request_id: &str,
    ) -> Result<AttemptOutput> {
        let pass = match PreflightChecker::new(gates).check(cancel).await {
            Ok(pass) => {
                self.sink.emit(
                    SinkEvent::new("preflight_gate_result")
                        .attr("target", target.qualified())
                        .attr("passed", true),
                );
                pass
            }
            Err(e) => {
                self.sink.emit(
                    SinkEvent::new("preflight_gate_result")
                        .level(SinkLevel::Warn)
                        .attr("target", target.qualified())
                        .attr("passed", false)
                        .attr("kind", e.kind().code()),
                );
                return Err(e);
            }
        };

        let api_key = resolve_api_key(manifest, target, options.api_key.as_deref());

        let (wire, streaming, operation) = match payload {
            Payload::Chat(request) | Payload::ChatStream(request) => {
                let streaming = request.stream
                    && manifest.capabilities.streaming
                    && manifest.streaming.is_some();
                let mut req = (*request).clone();
                req.stream = streaming;
                let wire =
                    match compile_request(manifest, target, &req, "chat", api_key.as_deref()) {
                        Ok(w) => w,
                        Err(e) => {
                            abort_probe(gates, &pass);
                            return Err(e);
                        }
                    };
                (wire, streaming, "chat")
            }
            Payload::Embedding(request) => {
                let wire = match compile_embedding(manifest, target, request, api_key.as_deref()) {
                    Ok(w) => w,
                    Err(e) => {
                        abort_probe(gates, &pass);
                        return Err(e);
                    }
                };
                (wire, false, "embedding")
            }
        };

        self.sink.emit(
            SinkEvent::new("transport_request")
                .attr("target", target.qualified())
                .attr("operation", operation)
                .attr("url", wire.url.clone())
                .attr("streaming", streaming),
        );

        let send_started = Instant::now();
        let response = match self.transport.send(&wire, request_id, streaming, cancel).await {
            Ok(resp) => resp,
            Err(e) => {
                self.report_breaker(gates, &pass, Some(e.kind()), target);
                return Err(attach_detail(e, target, request_id));
            }
        };

        let status = response.status().as_u16();
        self.sink.emit(
            SinkEvent::new("transport_response")
                .attr("target", target.qualified())
                .attr("http_status", status)
                .attr("duration_ms", send_started.elapsed().as_millis() as u64),
        );

        self.observe_rate_headers(manifest, gates, response.headers()).await;
        let upstream_request_id = upstream_id(response.headers());

        if !response.status().is_success() {
            let retry_after = retry_after_ms(response.headers());
            let body = response.text().await.unwrap_or_default();
            let provider_code = provider_code_from_body(manifest, &body);

            let kind = classify(&ClassifyInput {
                http_status: Some(status),
                provider_code: provider_code.as_deref(),
                transport_failure: None,
                error_mapping: manifest.error_mapping.as_ref(),
            });
            self.report_breaker(gates, &pass, Some(kind), target);

            let mut detail = ErrorDetail::new()
                .with_http_status(status)
                .with_target(target.qualified())
                .with_request_id(request_id.to_string());
            if let Some(code) = provider_code {
                detail = detail.with_provider_code(code);
            }
            if let Some(ms) = retry_after {
                detail = detail.with_retry_after_ms(ms);
            }

            info!(
                http_status = status,
                kind = kind.code(),
                target = target.qualified().as_str(),
                "upstream request failed"
            );
            let message = truncate_body(&body);
            return Err(Error::with_detail(kind, message, detail));
        }

        self.report_breaker(gates, &pass, None, target);

        match payload {
            Payload::Chat(_) => {
                let report = if streaming {
                    let pipeline = Pipeline::build(manifest, options.expand_candidates)?;
                    let bytes = self.transport.byte_stream(response);
                    let events = cancellable_events(pipeline.run(bytes), cancel.clone());
                    fold_events(events).await?
                } else {
                    let body: serde_json::Value = response
                        .json()
                        .await
                        .map_err(|e| Error::Transport(e.into()))?;
                    let events = map_complete_response(manifest, &body)?;
                    let stream: BoxStream<CanonicalEvent> =
                        Box::pin(futures::stream::iter(events.into_iter().map(Ok)));
                    fold_events(stream).await?
                };
                drop(pass);
                Ok(AttemptOutput::Folded {
                    report,
                    upstream_request_id,
                })
            }
            Payload::ChatStream(_) => {
                let raw_events: BoxStream<CanonicalEvent> = if streaming {
                    let pipeline = Pipeline::build(manifest, options.expand_candidates)?;
                    let bytes = self.transport.byte_stream(response);
                    pipeline.run(bytes)
                } else {
                    // Uniform event surface for non-streaming upstreams.
                    let body: serde_json::Value = response
                        .json()
                        .await
                        .map_err(|e| Error::Transport(e.into()))?;
                    let events = map_complete_response(manifest, &body)?;
                    Box::pin(futures::stream::iter(events.into_iter().map(Ok)))
                };
                let events =
                    self.finalize_stream(raw_events, pass, cancel.clone());
                Ok(AttemptOutput::Stream {
                    events,
                    upstream_request_id,
                })
            }
            Payload::Embedding(_) => {
                let body: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| Error::Transport(e.into()))?;
                let parsed = parse_embedding_response(manifest, &body)?;
                drop(pass);
                Ok(AttemptOutput::Embedding {
                    response: parsed,
                    upstream_request_id,
                })
            }
        }
    }

    /// Public-stream finishing: upstream errors become one terminal
    /// `StreamError`, cancellation injects its own terminal event, the
    /// backpressure permit rides inside the stream, and the first event is
    /// reported to the sink.
    fn finalize_stream(
        &self,
        events: BoxStream<CanonicalEvent>,
        pass: PreflightPass,
        cancel: CancelToken,
    ) -> BoxStream<CanonicalEvent> {
        let sink = Arc::clone(&self.sink);
        let mut events = cancellable_events(terminalize(events), cancel);
        Box::pin(async_stream::stream! {
            let _permit = pass.permit;
            let mut first = true;
            while let Some(item) = events.next().await {
                if first {
                    sink.emit(SinkEvent::new("stream_first_event"));
                    first = false;
                }
                let terminal = matches!(&item, Ok(e) if e.is_terminal());
                yield item;
                if terminal {
                    break;
                }
            }
        })
    }

    /// Feed provider rate-limit headers into the scope's limiter.
    async fn observe_rate_headers(
        &self,
        manifest: &ProtocolManifest,
        gates: &ScopeGates,
        headers: &HeaderMap,
    ) {
        let Some(ref limiter) = gates.limiter else {
            return;
        };
        let spec = manifest.rate_limit_headers.clone().unwrap_or_default();
        let remaining_name = spec.remaining.as_deref().unwrap_or("x-ratelimit-remaining");
        let reset_name = spec.reset.as_deref().unwrap_or("x-ratelimit-reset");

        let remaining = header_value(headers, remaining_name).and_then(|v| v.parse::<u64>().ok());
        let reset_after = header_value(headers, reset_name)
            .and_then(|v| v.parse::<u64>().ok())
            .map(|v| {
                if v > 1_000_000_000 {
                    // Epoch timestamp rather than a relative window.
                    let now = std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .map(|d| d.as_secs())
                        .unwrap_or(v);
                    Duration::from_secs(v.saturating_sub(now))
                } else {
                    Duration::from_secs(v)
                }
            });

        if remaining.is_some() || reset_after.is_some() {
            limiter.observe(remaining, reset_after).await;
        }
    }

    /// Report an attempt outcome to the scope's breaker, emitting a state
    /// change event when one happens. Only server-side kinds count as
    /// breaker failures; others release a held probe slot without a
    /// transition.
    fn report_breaker(
        &self,
        gates: &ScopeGates,
        pass: &PreflightPass,
        failure: Option<ErrorKind>,
        target: &ProviderTarget,
    ) {
        let Some(ref breaker) = gates.breaker else {
            return;
        };
        let before = breaker.state();
        match failure {
            None => breaker.on_success(),
            Some(kind)
                if matches!(
                    kind,
                    ErrorKind::ServerError | ErrorKind::Overloaded | ErrorKind::Timeout
                ) =>
            {
                breaker.on_failure()
            }
            Some(_) if pass.is_probe => breaker.abort_probe(),
            Some(_) => {}
        }
        let after = breaker.state();
        if before != after {
            self.sink.emit(
                SinkEvent::new("circuit_state_change")
                    .level(SinkLevel::Warn)
                    .attr("provider", target.provider_id.clone())
                    .attr("from", format!("{before:?}"))
                    .attr("to", format!("{after:?}")),
            );
        }
    }
}

/// Stable order: weight descending, list position breaking ties.
fn order_chain(targets: &[ProviderTarget]) -> Vec<&ProviderTarget> {
    let mut chain: Vec<&ProviderTarget> = targets.iter().collect();
    chain.sort_by(|a, b| b.weight.cmp(&a.weight));
    chain
}

fn abort_probe(gates: &ScopeGates, pass: &PreflightPass) {
    if pass.is_probe {
        if let Some(ref breaker) = gates.breaker {
            breaker.abort_probe();
        }
    }
}

fn record(target: &ProviderTarget, attempt: u32, e: &Error) -> AttemptRecord {
    AttemptRecord {
        target: target.qualified(),
        attempt,
        kind: e.kind(),
        http_status: e.detail().and_then(|d| d.http_status),
        message: truncate_body(&e.to_string()),
    }
}

fn finish_with_history(e: Error, history: Vec<AttemptRecord>) -> Error {
    match e {
        e @ Error::Classified { .. } => e.with_history(history),
        other => {
            let kind = other.kind();
            Error::with_detail(kind, other.to_string(), ErrorDetail::new()).with_history(history)
        }
    }
}

fn attach_detail(e: Error, target: &ProviderTarget, request_id: &str) -> Error {
    let kind = e.kind();
    Error::with_detail(
        kind,
        e.to_string(),
        ErrorDetail::new()
            .with_target(target.qualified())
            .with_request_id(request_id.to_string()),
    )
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn upstream_id(headers: &HeaderMap) -> Option<String> {
    ["x-request-id", "request-id", "x-amzn-requestid", "cf-ray"]
        .iter()
        .find_map(|name| header_value(headers, name))
}

/// `Retry-After: <seconds>` only; the HTTP-date form is rare enough in LLM
/// APIs that it is ignored rather than mis-parsed.
fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    header_value(headers, "retry-after")?
        .parse::<u64>()
        .ok()
        .map(|secs| secs.saturating_mul(1000))
}

/// Pull a provider error code from the common error-body shapes.
fn provider_code_from_body(manifest: &ProtocolManifest, body: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    // Manifest error_mapping keys are matched against any of these.
    let candidates = [
        "/error/code",
        "/error/type",
        "/error/status",
        "/code",
        "/type",
    ];
    for pointer in candidates {
        if let Some(code) = json.pointer(pointer).and_then(|v| v.as_str()) {
            if manifest
                .error_mapping
                .as_ref()
                .map(|m| m.contains_key(code))
                .unwrap_or(true)
            {
                return Some(code.to_string());
            }
        }
    }
    // Fall back to the first candidate that exists at all.
    for pointer in candidates {
        if let Some(code) = json.pointer(pointer).and_then(|v| v.as_str()) {
            return Some(code.to_string());
        }
    }
    None
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 600;
    if body.len() <= MAX {
        body.to_string()
    } else {
        let mut cut = MAX;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}…", &body[..cut])
    }
}

/// Errors forwarded mid-stream become a single terminal `StreamError`.
fn terminalize(mut events: BoxStream<CanonicalEvent>) -> BoxStream<CanonicalEvent> {
    Box::pin(async_stream::stream! {
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => {
                    let terminal = event.is_terminal();
                    yield Ok(event);
                    if terminal {
                        return;
                    }
                }
                Err(e) => {
                    yield Ok(CanonicalEvent::StreamError {
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                    return;
                }
            }
        }
    })
}

/// Embeddings share auth and endpoint plumbing with chat but have a flat
/// body shape.
fn compile_embedding(
    manifest: &ProtocolManifest,
    target: &ProviderTarget,
    request: &EmbeddingRequest,
    api_key: Option<&str>,
) -> Result<crate::manifest::compile::WireRequest> {
    let mut canonical = CanonicalRequest::default();
    canonical
        .extensions
        .insert("input".to_string(), serde_json::json!(request.inputs));
    if let Some(dims) = request.dimensions {
        canonical
            .extensions
            .insert("dimensions".to_string(), serde_json::json!(dims));
    }
    let mut wire = compile_request(manifest, target, &canonical, "embedding", api_key)?;
    // Chat-only fields have no place in an embedding body.
    if let Some(obj) = wire.body.as_object_mut() {
        obj.remove(&manifest.request.messages_key);
        obj.remove(&manifest.request.stream_key);
    }
    Ok(wire)
}

fn parse_embedding_response(
    manifest: &ProtocolManifest,
    body: &serde_json::Value,
) -> Result<EmbeddingResponse> {
    let items_path = manifest
        .response_paths
        .as_ref()
        .and_then(|p| p.embedding_vectors.clone())
        .unwrap_or_else(|| "$.data".to_string());
    let path = crate::util::JsonPath::parse(&items_path).map_err(|e| {
        crate::manifest::ManifestError::invalid("response_paths.embedding_vectors", e.to_string())
    })?;

    let mut vectors = Vec::new();
    if let Some(serde_json::Value::Array(items)) = path.get(body) {
        for item in items {
            let numbers = item
                .get("embedding")
                .or_else(|| item.get("values"))
                .unwrap_or(item);
            if let Some(arr) = numbers.as_array() {
                vectors.push(
                    arr.iter()
                        .filter_map(|n| n.as_f64())
                        .map(|n| n as f32)
                        .collect(),
                );
            }
        }
    }
    if vectors.is_empty() {
        return Err(Error::classified(
            ErrorKind::ServerError,
            "embedding response carried no vectors",
        ));
    }
    Ok(EmbeddingResponse {
        vectors,
        usage: body.get("usage").cloned(),
    })
}
