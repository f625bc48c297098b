//! Frame selection: decoded JSON frames → typed selections.
//!
//! The selector evaluates the manifest's path selectors against each frame
//! and emits what it found, in frame order. It is stateless; anything that
//! needs memory across frames (tool-call identity, argument buffers) lives
//! in the accumulator.
//!
//! Two flows exist:
//! - the *path flow* for OpenAI-compatible frames, driven entirely by the
//!   manifest's `*_path` selectors;
//! - the *event flow* for Anthropic-SSE, where the frame's `type` field
//!   directs interpretation (`content_block_start` / `content_block_delta`
//!   / `content_block_stop` / `message_delta` / `message_stop`).

use futures::StreamExt;
use serde_json::Value;

use crate::manifest::schema::{DecoderKind, StreamingSpec};
use crate::pipeline::PipelineError;
use crate::util::JsonPath;
use crate::BoxStream;

/// What a frame contributed, before tool-call resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Content(String),
    Thinking(String),
    /// Explicit tool-call opening (Anthropic `content_block_start`).
    ToolStart {
        index: Option<u32>,
        id: String,
        name: String,
    },
    /// A tool-call fragment. OpenAI-style streams may carry id and name
    /// only on the first fragment per index.
    ToolDelta {
        index: Option<u32>,
        id: Option<String>,
        name: Option<String>,
        args_delta: String,
    },
    /// Explicit tool-call close (Anthropic `content_block_stop`). Also
    /// fires for text blocks; the accumulator ignores unknown indices.
    ToolEnd { index: Option<u32> },
    /// A reassembled, parse-validated call. Never produced by the selector;
    /// the accumulator emits it once per id after validating the buffered
    /// arguments.
    ToolComplete { id: String },
    FinishReason(String),
    Usage(Value),
    /// Explicit stream termination (Anthropic `message_stop`).
    End,
}

struct CompiledPaths {
    content: Option<JsonPath>,
    thinking: Option<JsonPath>,
    tool_calls: Option<JsonPath>,
    finish_reason: Option<JsonPath>,
    usage: Option<JsonPath>,
}

impl CompiledPaths {
    fn from_spec(spec: &StreamingSpec) -> crate::Result<Self> {
        let compile = |raw: &Option<String>, field: &str| -> crate::Result<Option<JsonPath>> {
            match raw {
                Some(r) => JsonPath::parse(r)
                    .map(Some)
                    .map_err(|e| PipelineError::Config(format!("{field} '{r}': {e}")).into()),
                None => Ok(None),
            }
        };
        Ok(Self {
            content: compile(&spec.content_path, "streaming.content_path")?,
            thinking: compile(&spec.thinking_path, "streaming.thinking_path")?,
            tool_calls: compile(&spec.tool_call_path, "streaming.tool_call_path")?,
            finish_reason: compile(&spec.finish_reason_path, "streaming.finish_reason_path")?,
            usage: compile(&spec.usage_path, "streaming.usage_path")?,
        })
    }
}

enum Flow {
    Paths,
    AnthropicEvents,
}

/// Stateless frame selector.
pub struct Selector {
    paths: CompiledPaths,
    flow: Flow,
}

impl Selector {
    pub fn from_spec(spec: &StreamingSpec) -> crate::Result<Self> {
        let flow = match spec.decoder {
            DecoderKind::AnthropicSse => Flow::AnthropicEvents,
            _ => Flow::Paths,
        };
        Ok(Self {
            paths: CompiledPaths::from_spec(spec)?,
            flow,
        })
    }

    pub fn select(self, input: BoxStream<Value>) -> BoxStream<Selection> {
        let stream = input.flat_map(move |item| {
            let out: Vec<crate::Result<Selection>> = match item {
                Ok(frame) => {
                    let selections = match self.flow {
                        Flow::Paths => select_by_paths(&self.paths, &frame),
                        Flow::AnthropicEvents => select_by_events(&frame),
                    };
                    selections.into_iter().map(Ok).collect()
                }
                Err(e) => vec![Err(e)],
            };
            futures::stream::iter(out)
        });
        Box::pin(stream)
    }
}

fn select_by_paths(paths: &CompiledPaths, frame: &Value) -> Vec<Selection> {
    let mut out = Vec::new();

    if let Some(ref path) = paths.content {
        if let Some(Value::String(text)) = path.get(frame) {
            if !text.is_empty() {
                out.push(Selection::Content(text.clone()));
            }
        }
    }

    if let Some(ref path) = paths.thinking {
        if let Some(Value::String(text)) = path.get(frame) {
            if !text.is_empty() {
                out.push(Selection::Thinking(text.clone()));
            }
        }
    }

    if let Some(ref path) = paths.tool_calls {
        if let Some(Value::Array(calls)) = path.get(frame) {
            for (pos, call) in calls.iter().enumerate() {
                out.push(tool_delta_from_value(call, pos as u32));
            }
        }
    }

    if let Some(ref path) = paths.usage {
        if let Some(usage) = path.get(frame) {
            if !usage.is_null() {
                out.push(Selection::Usage(usage.clone()));
            }
        }
    }

    if let Some(ref path) = paths.finish_reason {
        if let Some(reason) = path.get_string(frame) {
            if !reason.is_empty() && reason != "null" {
                out.push(Selection::FinishReason(reason));
            }
        }
    }

    out
}

/// OpenAI-style tool-call delta element → selection. Field names tolerate
/// the common dialect variants (`function.name` vs `name`, string vs
/// object arguments).
fn tool_delta_from_value(call: &Value, position: u32) -> Selection {
    let index = call
        .get("index")
        .and_then(Value::as_u64)
        .map(|i| i as u32)
        .or(Some(position));
    let id = call
        .get("id")
        .or_else(|| call.get("tool_call_id"))
        .and_then(Value::as_str)
        .map(String::from);
    let name = call
        .pointer("/function/name")
        .or_else(|| call.get("name"))
        .and_then(Value::as_str)
        .map(String::from);
    let args_delta = call
        .pointer("/function/arguments")
        .or_else(|| call.get("arguments"))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other if other.is_object() || other.is_array() => other.to_string(),
            _ => String::new(),
        })
        .unwrap_or_default();

    Selection::ToolDelta {
        index,
        id,
        name,
        args_delta,
    }
}

fn select_by_events(frame: &Value) -> Vec<Selection> {
    let index = frame.get("index").and_then(Value::as_u64).map(|i| i as u32);
    match frame.get("type").and_then(Value::as_str) {
        Some("content_block_start") => {
            let block = &frame["content_block"];
            if block.get("type").and_then(Value::as_str) == Some("tool_use") {
                let id = block.get("id").and_then(Value::as_str).unwrap_or_default();
                let name = block.get("name").and_then(Value::as_str).unwrap_or_default();
                return vec![Selection::ToolStart {
                    index,
                    id: id.to_string(),
                    name: name.to_string(),
                }];
            }
            Vec::new()
        }
        Some("content_block_delta") => {
            let delta = &frame["delta"];
            match delta.get("type").and_then(Value::as_str) {
                Some("text_delta") => delta
                    .get("text")
                    .and_then(Value::as_str)
                    .filter(|t| !t.is_empty())
                    .map(|t| vec![Selection::Content(t.to_string())])
                    .unwrap_or_default(),
                Some("thinking_delta") => delta
                    .get("thinking")
                    .and_then(Value::as_str)
                    .filter(|t| !t.is_empty())
                    .map(|t| vec![Selection::Thinking(t.to_string())])
                    .unwrap_or_default(),
                Some("input_json_delta") => {
                    let args = delta
                        .get("partial_json")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    vec![Selection::ToolDelta {
                        index,
                        id: None,
                        name: None,
                        args_delta: args.to_string(),
                    }]
                }
                _ => Vec::new(),
            }
        }
        Some("content_block_stop") => vec![Selection::ToolEnd { index }],
        Some("message_delta") => {
            let mut out = Vec::new();
            if let Some(reason) = frame.pointer("/delta/stop_reason").and_then(Value::as_str) {
                out.push(Selection::FinishReason(reason.to_string()));
            }
            if let Some(usage) = frame.get("usage") {
                if !usage.is_null() {
                    out.push(Selection::Usage(usage.clone()));
                }
            }
            out
        }
        Some("message_stop") => vec![Selection::End],
        // message_start, ping, unrecognized event names: nothing to select.
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path_spec() -> StreamingSpec {
        StreamingSpec {
            decoder: DecoderKind::Sse,
            content_path: Some("$.choices[0].delta.content".into()),
            thinking_path: None,
            tool_call_path: Some("$.choices[0].delta.tool_calls".into()),
            role_path: None,
            finish_reason_path: Some("$.choices[0].finish_reason".into()),
            usage_path: Some("$.usage".into()),
            fan_out_path: None,
        }
    }

    async fn run(spec: &StreamingSpec, frames: Vec<Value>) -> Vec<Selection> {
        let selector = Selector::from_spec(spec).unwrap();
        let input: BoxStream<Value> =
            Box::pin(futures::stream::iter(frames.into_iter().map(Ok)));
        selector.select(input).map(|s| s.unwrap()).collect().await
    }

    #[tokio::test]
    async fn path_flow_selects_content_and_finish() {
        let selections = run(
            &path_spec(),
            vec![
                json!({"choices":[{"delta":{"content":"Hel"}}]}),
                json!({"choices":[{"delta":{"content":""}}]}),
                json!({"choices":[{"delta":{}, "finish_reason":"stop"}]}),
            ],
        )
        .await;
        assert_eq!(
            selections,
            vec![
                Selection::Content("Hel".into()),
                Selection::FinishReason("stop".into()),
            ]
        );
    }

    #[tokio::test]
    async fn path_flow_extracts_openai_tool_deltas() {
        let selections = run(
            &path_spec(),
            vec![
                json!({"choices":[{"delta":{"tool_calls":[
                    {"index":0,"id":"t1","function":{"name":"get_weather","arguments":""}}
                ]}}]}),
                json!({"choices":[{"delta":{"tool_calls":[
                    {"index":0,"function":{"arguments":"{\"city\":\"Tokyo\"}"}}
                ]}}]}),
            ],
        )
        .await;
        assert_eq!(
            selections,
            vec![
                Selection::ToolDelta {
                    index: Some(0),
                    id: Some("t1".into()),
                    name: Some("get_weather".into()),
                    args_delta: String::new(),
                },
                Selection::ToolDelta {
                    index: Some(0),
                    id: None,
                    name: None,
                    args_delta: "{\"city\":\"Tokyo\"}".into(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn event_flow_routes_anthropic_frames() {
        let spec = StreamingSpec {
            decoder: DecoderKind::AnthropicSse,
            content_path: None,
            thinking_path: None,
            tool_call_path: None,
            role_path: None,
            finish_reason_path: None,
            usage_path: None,
            fan_out_path: None,
        };
        let selections = run(
            &spec,
            vec![
                json!({"type":"message_start","message":{}}),
                json!({"type":"content_block_start","index":0,
                       "content_block":{"type":"tool_use","id":"t1","name":"get_weather"}}),
                json!({"type":"content_block_delta","index":0,
                       "delta":{"type":"input_json_delta","partial_json":"{\"city\":"}}),
                json!({"type":"content_block_stop","index":0}),
                json!({"type":"message_delta","delta":{"stop_reason":"tool_use"},
                       "usage":{"output_tokens":9}}),
                json!({"type":"message_stop"}),
            ],
        )
        .await;
        assert_eq!(
            selections,
            vec![
                Selection::ToolStart {
                    index: Some(0),
                    id: "t1".into(),
                    name: "get_weather".into()
                },
                Selection::ToolDelta {
                    index: Some(0),
                    id: None,
                    name: None,
                    args_delta: "{\"city\":".into()
                },
                Selection::ToolEnd { index: Some(0) },
                Selection::FinishReason("tool_use".into()),
                Selection::Usage(json!({"output_tokens":9})),
                Selection::End,
            ]
        );
    }
}
