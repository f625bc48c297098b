//! Folding an event sequence into a final response.

use futures::StreamExt;
use std::collections::HashMap;

use crate::types::events::CanonicalEvent;
use crate::types::tool::ToolCall;
use crate::BoxStream;

/// The assembled result of a chat request.
#[derive(Debug, Clone, Default)]
pub struct ChatOutcome {
    pub content: String,
    pub thinking: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<serde_json::Value>,
    pub finish_reason: Option<String>,
}

/// Reassembles tool calls from the event stream.
///
/// Tolerant at this layer: arguments that never parse as JSON are kept as a
/// raw string (the pipeline has already enforced its stricter invariant for
/// `is_complete`).
#[derive(Default)]
struct ToolCallFolder {
    order: Vec<String>,
    names: HashMap<String, String>,
    buffers: HashMap<String, String>,
}

impl ToolCallFolder {
    fn on_started(&mut self, id: &str, name: &str) {
        if !self.names.contains_key(id) {
            self.order.push(id.to_string());
            self.names.insert(id.to_string(), name.to_string());
            self.buffers.insert(id.to_string(), String::new());
        }
    }

    fn on_fragment(&mut self, id: &str, fragment: &str) {
        self.buffers
            .entry(id.to_string())
            .or_default()
            .push_str(fragment);
    }

    fn finish(self) -> Vec<ToolCall> {
        let Self {
            order,
            names,
            mut buffers,
        } = self;
        order
            .into_iter()
            .map(|id| {
                let raw = buffers.remove(&id).unwrap_or_default();
                let arguments = if raw.trim().is_empty() {
                    serde_json::json!({})
                } else {
                    serde_json::from_str(&raw)
                        .unwrap_or(serde_json::Value::String(raw))
                };
                ToolCall {
                    name: names.get(&id).cloned().unwrap_or_default(),
                    id,
                    arguments,
                }
            })
            .collect()
    }
}

/// Information observed while folding, beyond the outcome itself.
#[derive(Debug)]
pub struct FoldReport {
    pub outcome: ChatOutcome,
    /// Milliseconds from fold start to the first event.
    pub first_event_ms: Option<u64>,
}

/// Drain an event stream into a [`ChatOutcome`].
///
/// A transported `Err` or a terminal `StreamError` aborts the fold and
/// surfaces as the classified error, so the caller's retry logic sees it.
pub async fn fold_events(mut events: BoxStream<CanonicalEvent>) -> crate::Result<FoldReport> {
    let started = std::time::Instant::now();
    let mut first_event_ms = None;
    let mut outcome = ChatOutcome::default();
    let mut folder = ToolCallFolder::default();

    while let Some(item) = events.next().await {
        let event = item?;
        if first_event_ms.is_none() {
            first_event_ms = Some(started.elapsed().as_millis() as u64);
        }
        match event {
            CanonicalEvent::PartialContentDelta { text, .. } => outcome.content.push_str(&text),
            CanonicalEvent::ThinkingDelta { text } => outcome.thinking.push_str(&text),
            CanonicalEvent::ToolCallStarted { id, name } => folder.on_started(&id, &name),
            CanonicalEvent::PartialToolCall { id, args_delta, .. } => {
                folder.on_fragment(&id, &args_delta)
            }
            CanonicalEvent::ToolCallEnded { .. } => {}
            CanonicalEvent::Metadata { usage } => {
                if usage.is_some() {
                    outcome.usage = usage;
                }
            }
            CanonicalEvent::StreamEnd { finish_reason } => {
                outcome.finish_reason = finish_reason;
                break;
            }
            CanonicalEvent::StreamError { kind, message } => {
                return Err(crate::Error::classified(kind, message));
            }
        }
    }

    outcome.tool_calls = folder.finish();
    Ok(FoldReport {
        outcome,
        first_event_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(events: Vec<CanonicalEvent>) -> BoxStream<CanonicalEvent> {
        Box::pin(futures::stream::iter(events.into_iter().map(Ok)))
    }

    #[tokio::test]
    async fn folds_content_and_tool_calls() {
        let report = fold_events(stream(vec![
            CanonicalEvent::PartialContentDelta { text: "Hel".into(), seq: 0 },
            CanonicalEvent::PartialContentDelta { text: "lo".into(), seq: 1 },
            CanonicalEvent::ToolCallStarted { id: "t1".into(), name: "f".into() },
            CanonicalEvent::PartialToolCall {
                id: "t1".into(),
                args_delta: "{\"a\":1}".into(),
                is_complete: false,
            },
            CanonicalEvent::PartialToolCall {
                id: "t1".into(),
                args_delta: String::new(),
                is_complete: true,
            },
            CanonicalEvent::ToolCallEnded { id: "t1".into() },
            CanonicalEvent::Metadata { usage: Some(serde_json::json!({"total_tokens": 7})) },
            CanonicalEvent::StreamEnd { finish_reason: Some("tool_calls".into()) },
        ]))
        .await
        .unwrap();

        let outcome = report.outcome;
        assert_eq!(outcome.content, "Hello");
        assert_eq!(outcome.tool_calls.len(), 1);
        assert_eq!(outcome.tool_calls[0].name, "f");
        assert_eq!(outcome.tool_calls[0].arguments, serde_json::json!({"a": 1}));
        assert_eq!(outcome.finish_reason.as_deref(), Some("tool_calls"));
        assert!(report.first_event_ms.is_some());
    }

    #[tokio::test]
    async fn stream_error_aborts_fold() {
        let err = fold_events(stream(vec![
            CanonicalEvent::PartialContentDelta { text: "x".into(), seq: 0 },
            CanonicalEvent::StreamError {
                kind: crate::taxonomy::ErrorKind::ServerError,
                message: "bad frame".into(),
            },
        ]))
        .await
        .unwrap_err();
        assert_eq!(err.kind(), crate::taxonomy::ErrorKind::ServerError);
    }

    #[tokio::test]
    async fn unparseable_arguments_survive_as_raw_string() {
        let report = fold_events(stream(vec![
            CanonicalEvent::ToolCallStarted { id: "t1".into(), name: "f".into() },
            CanonicalEvent::PartialToolCall {
                id: "t1".into(),
                args_delta: "not json".into(),
                is_complete: false,
            },
            CanonicalEvent::StreamEnd { finish_reason: None },
        ]))
        .await
        .unwrap();
        assert_eq!(
            report.outcome.tool_calls[0].arguments,
            serde_json::Value::String("not json".into())
        );
    }
}
