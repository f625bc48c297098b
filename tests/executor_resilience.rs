//! Executor scenarios against live local HTTP servers: retry with server
//! hints, circuit trips, fallback chains, cancellation, and the
//! non-streaming path.

mod support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use modelwire::cancel::{CancelReason, CancelToken};
use modelwire::exec::{ExecOptions, ResilientExecutor};
use modelwire::manifest::{ManifestLoader, ProtocolManifest, ValidationMode};
use modelwire::observe::MemorySink;
use modelwire::resilience::breaker::CircuitBreakerConfig;
use modelwire::resilience::hub::{HubConfig, ResilienceHub};
use modelwire::resilience::retry::{Jitter, RetryPolicy};
use modelwire::resilience::CircuitState;
use modelwire::taxonomy::ErrorKind;
use modelwire::types::events::CanonicalEvent;
use modelwire::types::message::Message;
use modelwire::types::request::CanonicalRequest;
use modelwire::types::target::ProviderTarget;

use support::{anthropic_style_manifest, openai_style_manifest, Canned, ScriptedServer};

fn executor_with(manifests: Vec<ProtocolManifest>, hub: ResilienceHub) -> ResilientExecutor {
    let loader = Arc::new(ManifestLoader::new().with_validation_mode(ValidationMode::Lenient));
    for manifest in manifests {
        loader.register(manifest).unwrap();
    }
    ResilientExecutor::new()
        .unwrap()
        .with_loader(loader)
        .with_hub(hub)
}

fn no_gates() -> ResilienceHub {
    ResilienceHub::new(HubConfig::disabled())
}

fn one_shot_retry() -> RetryPolicy {
    RetryPolicy::new(1, Duration::ZERO, Duration::ZERO)
}

fn chat_request() -> CanonicalRequest {
    CanonicalRequest::new(vec![Message::user("hi")]).streaming()
}

fn sse_hello() -> Canned {
    Canned::sse(&[
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}",
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}",
        "data: [DONE]",
    ])
}

#[tokio::test]
async fn retry_after_hint_governs_the_retry_delay() {
    let server = ScriptedServer::start(vec![
        Canned::json(429, r#"{"error":{"code":"rate_limit_exceeded"}}"#)
            .with_header("retry-after", "1"),
        sse_hello(),
    ])
    .await;

    let executor = executor_with(vec![openai_style_manifest("acme")], no_gates());
    let target = ProviderTarget::new("acme", "m-1").with_base_url(server.url());
    let options = ExecOptions::new().with_retry(
        RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(5))
            .with_jitter(Jitter::None),
    );

    let started = Instant::now();
    let (outcome, stats) = executor
        .execute(&[target], &chat_request(), &options)
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(outcome.content, "Hello");
    assert_eq!(stats.retry_count, 1);
    assert_eq!(server.hits(), 2);
    assert!(elapsed >= Duration::from_secs(1), "waited the server hint");
    assert!(elapsed < Duration::from_secs(3));
    assert!(stats.time_to_first_event_ms.is_some());
}

#[tokio::test]
async fn circuit_trips_after_threshold_and_recovers_via_probe() {
    let server = ScriptedServer::start(vec![
        Canned::json(500, "{}"),
        Canned::json(500, "{}"),
        sse_hello(),
    ])
    .await;

    let hub = ResilienceHub::new(HubConfig {
        breaker: Some(
            CircuitBreakerConfig::default()
                .with_failure_threshold(2)
                .with_cooldown(Duration::from_secs(1))
                .with_success_threshold(1),
        ),
        limiter: None,
        backpressure: None,
    });
    let gates = hub.gates("acme");
    let breaker = gates.breaker.clone().unwrap();

    let executor = executor_with(vec![openai_style_manifest("acme")], hub);
    let target = ProviderTarget::new("acme", "m-1").with_base_url(server.url());
    let options = ExecOptions::new().with_retry(one_shot_retry());

    for _ in 0..2 {
        let err = executor
            .execute(&[target.clone()], &chat_request(), &options)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServerError);
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    // Third call is rejected locally without touching the wire.
    let err = executor
        .execute(&[target.clone()], &chat_request(), &options)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Overloaded);
    assert_eq!(server.hits(), 2);

    // After the cooldown one probe goes out and closes the circuit.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let (outcome, _) = executor
        .execute(&[target], &chat_request(), &options)
        .await
        .unwrap();
    assert_eq!(outcome.content, "Hello");
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(server.hits(), 3);
}

#[tokio::test]
async fn authentication_failure_falls_back_to_next_target() {
    let bad = ScriptedServer::start(vec![Canned::json(
        401,
        r#"{"error":{"type":"authentication_error","message":"bad key"}}"#,
    )])
    .await;
    let good = ScriptedServer::start(vec![Canned::sse(&[
        "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{}}",
        "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\"}}",
        "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi from Claude\"}}",
        "event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"}}",
        "event: message_stop\ndata: {\"type\":\"message_stop\"}",
    ])])
    .await;

    let executor = executor_with(
        vec![
            openai_style_manifest("openai"),
            anthropic_style_manifest("anthropic"),
        ],
        no_gates(),
    );
    let targets = [
        ProviderTarget::new("openai", "gpt-4o").with_base_url(bad.url()),
        ProviderTarget::new("anthropic", "claude-3-5-sonnet").with_base_url(good.url()),
    ];
    let options = ExecOptions::new().with_retry(one_shot_retry());

    let (outcome, stats) = executor
        .execute(&targets, &chat_request(), &options)
        .await
        .unwrap();

    assert_eq!(outcome.content, "Hi from Claude");
    assert_eq!(stats.target_used, "anthropic/claude-3-5-sonnet");
    assert_eq!(outcome.finish_reason.as_deref(), Some("stop"));
}

#[tokio::test]
async fn exhausted_chain_surfaces_last_error_with_full_history() {
    let server = ScriptedServer::start(vec![Canned::json(503, "{}")]).await;

    let executor = executor_with(
        vec![
            openai_style_manifest("a"),
            openai_style_manifest("b"),
            openai_style_manifest("c"),
        ],
        no_gates(),
    );
    let targets = [
        ProviderTarget::new("a", "m").with_base_url(server.url()),
        ProviderTarget::new("b", "m").with_base_url(server.url()),
        ProviderTarget::new("c", "m").with_base_url(server.url()),
    ];
    let options = ExecOptions::new().with_retry(one_shot_retry());

    let err = executor
        .execute(&targets, &chat_request(), &options)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Overloaded);
    let history = err.history();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].target, "a/m");
    assert_eq!(history[1].target, "b/m");
    assert_eq!(history[2].target, "c/m");
    assert!(history.iter().all(|r| r.kind == ErrorKind::Overloaded));
    assert_eq!(server.hits(), 3);
}

#[tokio::test]
async fn cancellation_mid_stream_is_prompt_and_terminal() {
    let server = ScriptedServer::start(vec![Canned::sse_staged(vec![
        (
            Duration::ZERO,
            "data: {\"choices\":[{\"delta\":{\"content\":\"first\"}}]}\n\n".to_string(),
        ),
        (
            Duration::from_secs(30),
            "data: {\"choices\":[{\"delta\":{\"content\":\"never\"}}]}\n\n".to_string(),
        ),
    ])])
    .await;

    let executor = executor_with(vec![openai_style_manifest("acme")], no_gates());
    let target = ProviderTarget::new("acme", "m-1").with_base_url(server.url());
    let cancel = CancelToken::new();
    let options = ExecOptions::new()
        .with_retry(one_shot_retry())
        .with_cancel(cancel.clone());

    let (mut events, _stats) = executor
        .execute_stream(&[target], &chat_request(), &options)
        .await
        .unwrap();

    let first = events.next().await.unwrap().unwrap();
    assert!(matches!(
        first,
        CanonicalEvent::PartialContentDelta { ref text, .. } if text == "first"
    ));

    let cancelled_at = Instant::now();
    cancel.cancel(CancelReason::UserRequest);

    let last = events.next().await.unwrap().unwrap();
    assert!(matches!(
        last,
        CanonicalEvent::StreamError { kind: ErrorKind::Cancelled, .. }
    ));
    assert!(events.next().await.is_none(), "no events after the terminal one");
    assert!(cancelled_at.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn non_streaming_chat_maps_the_complete_body() {
    let server = ScriptedServer::start(vec![Canned::json(
        200,
        r#"{"choices":[{"message":{"content":"Complete answer"},"finish_reason":"stop"}],
            "usage":{"prompt_tokens":10,"completion_tokens":20}}"#,
    )])
    .await;

    let executor = executor_with(vec![openai_style_manifest("acme")], no_gates());
    let target = ProviderTarget::new("acme", "m-1").with_base_url(server.url());
    let request = CanonicalRequest::new(vec![Message::user("hi")]); // stream = false

    let (outcome, stats) = executor
        .execute(&[target], &request, &ExecOptions::new())
        .await
        .unwrap();

    assert_eq!(outcome.content, "Complete answer");
    assert_eq!(outcome.finish_reason.as_deref(), Some("stop"));
    assert_eq!(stats.tokens_in, Some(10));
    assert_eq!(stats.tokens_out, Some(20));
}

#[tokio::test]
async fn embeddings_ride_the_same_chain() {
    let server = ScriptedServer::start(vec![Canned::json(
        200,
        r#"{"data":[{"embedding":[0.25,0.5]},{"embedding":[0.75,1.0]}],
            "usage":{"prompt_tokens":8}}"#,
    )])
    .await;

    let executor = executor_with(vec![openai_style_manifest("acme")], no_gates());
    let target = ProviderTarget::new("acme", "embed-1").with_base_url(server.url());
    let request = modelwire::types::embedding::EmbeddingRequest::new(vec![
        "alpha".to_string(),
        "beta".to_string(),
    ]);

    let (response, stats) = executor
        .execute_embedding(&[target], &request, &ExecOptions::new())
        .await
        .unwrap();

    assert_eq!(response.vectors.len(), 2);
    assert_eq!(response.vectors[1], vec![0.75, 1.0]);
    assert_eq!(stats.tokens_in, Some(8));
    assert_eq!(stats.target_used, "acme/embed-1");
}

#[tokio::test]
async fn missing_credentials_fail_before_the_wire() {
    let mut manifest = openai_style_manifest("lockedup");
    manifest.auth.scheme = modelwire::manifest::schema::AuthScheme::Bearer;
    manifest.auth.env_var = "LOCKEDUP_TEST_KEY_THAT_IS_UNSET".into();

    let executor = executor_with(vec![manifest], no_gates());
    let target = ProviderTarget::new("lockedup", "m-1");

    let err = executor
        .execute(&[target], &chat_request(), &ExecOptions::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert_eq!(err.history().len(), 1);
}

#[tokio::test]
async fn observability_events_follow_the_request_lifecycle() {
    let server = ScriptedServer::start(vec![Canned::json(
        200,
        r#"{"choices":[{"message":{"content":"ok"},"finish_reason":"stop"}]}"#,
    )])
    .await;

    let sink = Arc::new(MemorySink::new());
    let executor = executor_with(vec![openai_style_manifest("acme")], no_gates())
        .with_sink(sink.clone());
    let target = ProviderTarget::new("acme", "m-1").with_base_url(server.url());

    executor
        .execute(
            &[target],
            &CanonicalRequest::new(vec![Message::user("hi")]),
            &ExecOptions::new(),
        )
        .await
        .unwrap();

    let names = sink.names();
    let order = [
        "request_start",
        "preflight_gate_result",
        "transport_request",
        "transport_response",
        "request_end",
    ];
    let mut cursor = 0;
    for name in names {
        if cursor < order.len() && name == order[cursor] {
            cursor += 1;
        }
    }
    assert_eq!(cursor, order.len(), "lifecycle events in declared order");
}
