//! Canonical → wire compilation cost across tool dialects.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::HashMap;

use modelwire::manifest::compile::compile_request;
use modelwire::manifest::schema::*;
use modelwire::types::message::Message;
use modelwire::types::request::CanonicalRequest;
use modelwire::types::target::ProviderTarget;
use modelwire::types::tool::ToolDef;

fn manifest(dialect: ToolDialect) -> ProtocolManifest {
    ProtocolManifest {
        schema: None,
        id: "bench".into(),
        protocol_version: "1.0".into(),
        endpoint: EndpointSpec {
            base_url: "https://api.bench.test".into(),
            paths: HashMap::from([("chat".to_string(), "/v1/chat".to_string())]),
        },
        auth: AuthSpec {
            scheme: AuthScheme::Bearer,
            env_var: "BENCH_API_KEY".into(),
            header_name: None,
            query_param: None,
            prefix: None,
        },
        capabilities: Capabilities {
            streaming: true,
            tools: true,
            ..Default::default()
        },
        request: RequestRules {
            tool_dialect: dialect,
            ..Default::default()
        },
        streaming: None,
        response_paths: None,
        error_mapping: None,
        rate_limit_headers: None,
    }
}

fn request() -> CanonicalRequest {
    let tools = (0..4)
        .map(|i| {
            ToolDef::new(format!("tool_{i}"))
                .with_description("does a thing")
                .with_schema(serde_json::json!({
                    "type": "object",
                    "properties": {"q": {"type": "string"}},
                }))
        })
        .collect();
    CanonicalRequest::new(vec![
        Message::system("be helpful"),
        Message::user("what's the weather in Tokyo?"),
        Message::assistant("let me check"),
        Message::user("thanks"),
    ])
    .with_tools(tools)
    .with_temperature(0.7)
    .with_max_tokens(512)
    .streaming()
}

fn bench_compile(c: &mut Criterion) {
    let target = ProviderTarget::new("bench", "model-1");
    let request = request();

    let mut group = c.benchmark_group("request_compile");
    for (name, dialect) in [
        ("openai", ToolDialect::Openai),
        ("anthropic", ToolDialect::Anthropic),
        ("gemini", ToolDialect::Gemini),
    ] {
        let manifest = manifest(dialect);
        group.bench_function(name, |b| {
            b.iter(|| {
                let wire = compile_request(
                    black_box(&manifest),
                    black_box(&target),
                    black_box(&request),
                    "chat",
                    Some("sk-bench"),
                )
                .unwrap();
                black_box(wire.body_bytes().unwrap())
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compile);
criterion_main!(benches);
