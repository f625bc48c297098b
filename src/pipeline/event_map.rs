//! Canonical event emission.
//!
//! Final pipeline stage: resolved selections become canonical events, with
//! monotonically increasing `seq` numbers on content deltas and exactly one
//! `StreamEnd` per normally-terminating stream. Upstream errors are
//! forwarded as stream errors and terminate mapping; the executor's public
//! stream wrapper renders them as terminal `StreamError` events.
//!
//! The non-streaming path reuses the same vocabulary:
//! [`map_complete_response`] synthesizes deltas from a complete response
//! body so downstream handling is uniform.

use futures::StreamExt;
use serde_json::Value;

use crate::manifest::schema::ProtocolManifest;
use crate::pipeline::select::Selection;
use crate::types::events::CanonicalEvent;
use crate::util::JsonPath;
use crate::BoxStream;

/// Provider finish reasons vary; the canonical set is OpenAI-shaped.
fn normalize_finish_reason(raw: &str) -> String {
    match raw {
        "end_turn" | "stop_sequence" => "stop".to_string(),
        "tool_use" | "function_call" => "tool_calls".to_string(),
        "max_tokens" => "length".to_string(),
        other => other.to_string(),
    }
}

/// Selections → canonical events.
pub struct EventMapper {
    seq: u64,
    finish_reason: Option<String>,
}

impl EventMapper {
    pub fn new() -> Self {
        Self {
            seq: 0,
            finish_reason: None,
        }
    }

    pub fn map(mut self, mut input: BoxStream<Selection>) -> BoxStream<CanonicalEvent> {
        let stream = async_stream::stream! {
            loop {
                match input.next().await {
                    Some(Ok(selection)) => match selection {
                        Selection::Content(text) => {
                            let seq = self.seq;
                            self.seq += 1;
                            yield Ok(CanonicalEvent::PartialContentDelta { text, seq });
                        }
                        Selection::Thinking(text) => {
                            yield Ok(CanonicalEvent::ThinkingDelta { text });
                        }
                        Selection::ToolStart { id, name, .. } => {
                            yield Ok(CanonicalEvent::ToolCallStarted { id, name });
                        }
                        Selection::ToolDelta { id, args_delta, .. } => {
                            // The accumulator guarantees resolved ids.
                            if let Some(id) = id {
                                yield Ok(CanonicalEvent::PartialToolCall {
                                    id,
                                    args_delta,
                                    is_complete: false,
                                });
                            }
                        }
                        Selection::ToolComplete { id } => {
                            yield Ok(CanonicalEvent::PartialToolCall {
                                id: id.clone(),
                                args_delta: String::new(),
                                is_complete: true,
                            });
                            yield Ok(CanonicalEvent::ToolCallEnded { id });
                        }
                        Selection::Usage(usage) => {
                            yield Ok(CanonicalEvent::Metadata { usage: Some(usage) });
                        }
                        Selection::FinishReason(reason) => {
                            self.finish_reason = Some(normalize_finish_reason(&reason));
                        }
                        Selection::ToolEnd { .. } => {
                            // Consumed by the accumulator; nothing to emit.
                        }
                        Selection::End => {
                            yield Ok(CanonicalEvent::StreamEnd {
                                finish_reason: self.finish_reason.take(),
                            });
                            return;
                        }
                    },
                    Some(Err(e)) => {
                        yield Err(e);
                        return;
                    }
                    None => {
                        yield Ok(CanonicalEvent::StreamEnd {
                            finish_reason: self.finish_reason.take(),
                        });
                        return;
                    }
                }
            }
        };
        Box::pin(stream)
    }
}

impl Default for EventMapper {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a complete (non-streaming) response body into the same event
/// vocabulary: one content delta, fully-formed tool calls, usage metadata,
/// and a single `StreamEnd`. Candidate handling is deterministic: selectors
/// address candidate 0.
pub fn map_complete_response(
    manifest: &ProtocolManifest,
    body: &Value,
) -> crate::Result<Vec<CanonicalEvent>> {
    let defaults = crate::manifest::schema::ResponsePaths {
        content: Some("$.choices[0].message.content".into()),
        tool_calls: Some("$.choices[0].message.tool_calls".into()),
        usage: Some("$.usage".into()),
        finish_reason: Some("$.choices[0].finish_reason".into()),
        embedding_vectors: None,
    };
    let paths = manifest.response_paths.as_ref().unwrap_or(&defaults);

    let mut events = Vec::new();

    if let Some(ref raw) = paths.content {
        let path = compile(raw, "response_paths.content")?;
        if let Some(Value::String(text)) = path.get(body) {
            if !text.is_empty() {
                events.push(CanonicalEvent::PartialContentDelta {
                    text: text.clone(),
                    seq: 0,
                });
            }
        }
    }

    if let Some(ref raw) = paths.tool_calls {
        let path = compile(raw, "response_paths.tool_calls")?;
        if let Some(Value::Array(calls)) = path.get(body) {
            for (pos, call) in calls.iter().enumerate() {
                let id = call
                    .get("id")
                    .and_then(Value::as_str)
                    .map(String::from)
                    .unwrap_or_else(|| format!("call_{pos}"));
                let name = call
                    .pointer("/function/name")
                    .or_else(|| call.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let args = call
                    .pointer("/function/arguments")
                    .or_else(|| call.get("arguments"))
                    .or_else(|| call.get("input"))
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .unwrap_or_default();

                events.push(CanonicalEvent::ToolCallStarted {
                    id: id.clone(),
                    name,
                });
                if !args.is_empty() {
                    events.push(CanonicalEvent::PartialToolCall {
                        id: id.clone(),
                        args_delta: args,
                        is_complete: false,
                    });
                }
                events.push(CanonicalEvent::PartialToolCall {
                    id: id.clone(),
                    args_delta: String::new(),
                    is_complete: true,
                });
                events.push(CanonicalEvent::ToolCallEnded { id });
            }
        }
    }

    if let Some(ref raw) = paths.usage {
        let path = compile(raw, "response_paths.usage")?;
        if let Some(usage) = path.get(body) {
            if !usage.is_null() {
                events.push(CanonicalEvent::Metadata {
                    usage: Some(usage.clone()),
                });
            }
        }
    }

    let finish_reason = match paths.finish_reason {
        Some(ref raw) => compile(raw, "response_paths.finish_reason")?
            .get_string(body)
            .map(|r| normalize_finish_reason(&r)),
        None => None,
    };
    events.push(CanonicalEvent::StreamEnd { finish_reason });

    Ok(events)
}

fn compile(raw: &str, field: &str) -> crate::Result<JsonPath> {
    JsonPath::parse(raw).map_err(|e| {
        crate::pipeline::PipelineError::Config(format!("{field} '{raw}': {e}")).into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn map(selections: Vec<Selection>) -> Vec<CanonicalEvent> {
        let input: BoxStream<Selection> =
            Box::pin(futures::stream::iter(selections.into_iter().map(Ok)));
        EventMapper::new()
            .map(input)
            .map(|e| e.unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn seq_numbers_increase_and_stream_end_is_last() {
        let events = map(vec![
            Selection::Content("a".into()),
            Selection::Content("b".into()),
            Selection::FinishReason("stop".into()),
        ])
        .await;
        assert_eq!(
            events,
            vec![
                CanonicalEvent::PartialContentDelta { text: "a".into(), seq: 0 },
                CanonicalEvent::PartialContentDelta { text: "b".into(), seq: 1 },
                CanonicalEvent::StreamEnd { finish_reason: Some("stop".into()) },
            ]
        );
    }

    #[tokio::test]
    async fn explicit_end_stops_mapping() {
        let events = map(vec![
            Selection::Content("a".into()),
            Selection::End,
            Selection::Content("never".into()),
        ])
        .await;
        assert_eq!(events.len(), 2);
        assert!(events[1].is_terminal());
    }

    #[tokio::test]
    async fn anthropic_finish_reasons_normalize() {
        let events = map(vec![Selection::FinishReason("tool_use".into())]).await;
        assert_eq!(
            events,
            vec![CanonicalEvent::StreamEnd { finish_reason: Some("tool_calls".into()) }]
        );
    }

    #[test]
    fn complete_response_synthesizes_uniform_events() {
        let manifest = test_manifest();
        let body = serde_json::json!({
            "choices": [{
                "message": {
                    "content": "Hello!",
                    "tool_calls": [{
                        "id": "t1",
                        "function": {"name": "f", "arguments": "{\"a\":1}"}
                    }]
                },
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 3, "completion_tokens": 5}
        });
        let events = map_complete_response(&manifest, &body).unwrap();
        assert!(matches!(
            events[0],
            CanonicalEvent::PartialContentDelta { ref text, seq: 0 } if text == "Hello!"
        ));
        assert!(matches!(events[1], CanonicalEvent::ToolCallStarted { .. }));
        assert!(events.last().unwrap().is_terminal());
        let ends = events
            .iter()
            .filter(|e| e.is_terminal())
            .count();
        assert_eq!(ends, 1);
    }

    fn test_manifest() -> ProtocolManifest {
        use crate::manifest::schema::*;
        use std::collections::HashMap;
        ProtocolManifest {
            schema: None,
            id: "acme".into(),
            protocol_version: "1.0".into(),
            endpoint: EndpointSpec {
                base_url: "https://api.test".into(),
                paths: HashMap::from([("chat".to_string(), "/c".to_string())]),
            },
            auth: AuthSpec {
                scheme: AuthScheme::None,
                env_var: String::new(),
                header_name: None,
                query_param: None,
                prefix: None,
            },
            capabilities: Capabilities::default(),
            request: RequestRules::default(),
            streaming: None,
            response_paths: None,
            error_mapping: None,
            rate_limit_headers: None,
        }
    }
}
