//! The canonical event alphabet produced by the streaming pipeline.
//!
//! A request's event sequence is lazy, finite and non-restartable. Ordering
//! rules the pipeline guarantees:
//!
//! - for a given tool-call id, `ToolCallStarted` precedes every
//!   `PartialToolCall`, and `ToolCallEnded` follows all of them;
//! - `seq` on `PartialContentDelta` is strictly increasing;
//! - exactly one `StreamEnd` or `StreamError` terminates the sequence.

use serde::{Deserialize, Serialize};

use crate::taxonomy::ErrorKind;

/// One element of the canonical event sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum CanonicalEvent {
    /// A text fragment of the assistant's reply.
    #[serde(rename = "partial_content_delta")]
    PartialContentDelta { text: String, seq: u64 },

    /// A fragment of the model's reasoning trace.
    #[serde(rename = "thinking_delta")]
    ThinkingDelta { text: String },

    /// A tool call began; emitted exactly once per id.
    #[serde(rename = "tool_call_started")]
    ToolCallStarted { id: String, name: String },

    /// An argument fragment for an in-flight tool call. The final frame per
    /// id carries an empty delta and `is_complete = true`, emitted only
    /// after the accumulated arguments parsed as JSON.
    #[serde(rename = "partial_tool_call")]
    PartialToolCall {
        id: String,
        args_delta: String,
        is_complete: bool,
    },

    /// A tool call finished; emitted exactly once per id, after its
    /// completing `PartialToolCall`.
    #[serde(rename = "tool_call_ended")]
    ToolCallEnded { id: String },

    /// Usage or other response metadata observed mid-stream.
    #[serde(rename = "metadata")]
    Metadata {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<serde_json::Value>,
    },

    /// Normal termination.
    #[serde(rename = "stream_end")]
    StreamEnd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        finish_reason: Option<String>,
    },

    /// Abnormal termination. Always the last event when emitted.
    #[serde(rename = "stream_error")]
    StreamError { kind: ErrorKind, message: String },
}

impl CanonicalEvent {
    /// Whether this event terminates the sequence.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CanonicalEvent::StreamEnd { .. } | CanonicalEvent::StreamError { .. }
        )
    }
}
