//! 流水线模块:将原始字节流转换为规范事件序列的算子链。
//!
//! The per-request operator chain that turns a raw byte stream into the
//! canonical event sequence:
//!
//! ```text
//! Bytes ── Decode ──> JSON frames ── FanOut ──> frames ── Select ──>
//!   selections ── Accumulate ──> resolved selections ── EventMap ──>
//!   CanonicalEvent
//! ```
//!
//! Operators compose linearly and each instance is exclusively owned by one
//! request; nothing here is shared across requests. The chain is built from
//! the manifest's `streaming` block, so the pipeline decodes *formats*, not
//! providers.
//!
//! | Module | Stage |
//! |--------|-------|
//! | [`decode`] | SSE / NDJSON / Anthropic-SSE framing into JSON values |
//! | [`fan_out`] | multi-candidate array handling (candidate 0 by default) |
//! | [`select`] | manifest-path evaluation into typed selections |
//! | [`accumulate`] | tool-call reassembly (id tracking, argument buffers) |
//! | [`event_map`] | canonical event emission, `seq` numbering, terminators |

pub mod accumulate;
pub mod decode;
pub mod event_map;
pub mod fan_out;
pub mod select;

use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

use crate::manifest::schema::{ProtocolManifest, StreamingSpec};
use crate::types::events::CanonicalEvent;
use crate::BoxStream;

pub use decode::{decoder_for, Decoder};
pub use event_map::map_complete_response;
pub use select::Selection;

/// Pipeline-stage failures. Surfaced to callers as terminal
/// `StreamError { kind: server_error }` events by the executor.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline configuration: {0}")]
    Config(String),

    #[error("malformed stream frame: {detail}")]
    MalformedFrame { detail: String },

    #[error("tool call '{id}' arguments failed to parse: {detail}")]
    ToolArgsParse { id: String, detail: String },
}

/// A fully configured, single-use operator chain for one request.
pub struct Pipeline {
    decoder: Box<dyn Decoder>,
    fan_out: Option<fan_out::FanOut>,
    selector: select::Selector,
}

impl Pipeline {
    /// Build the chain from a manifest's streaming block.
    ///
    /// `expand_candidates` switches the fan-out stage from its default
    /// candidate-0 mode to full expansion; it only has effect when the
    /// manifest sets `streaming.fan_out_path`.
    pub fn build(manifest: &ProtocolManifest, expand_candidates: bool) -> crate::Result<Self> {
        let streaming = manifest.streaming.as_ref().ok_or_else(|| {
            PipelineError::Config("manifest declares no streaming block".to_string())
        })?;
        Self::from_spec(streaming, expand_candidates)
    }

    pub fn from_spec(spec: &StreamingSpec, expand_candidates: bool) -> crate::Result<Self> {
        let decoder = decoder_for(spec.decoder);
        let fan_out = fan_out::FanOut::from_spec(spec, expand_candidates)?;
        let selector = select::Selector::from_spec(spec)?;
        Ok(Self {
            decoder,
            fan_out,
            selector,
        })
    }

    /// Run the chain. Consumes the pipeline: operator state is per-request.
    pub fn run(self, bytes: BoxStream<Bytes>) -> BoxStream<CanonicalEvent> {
        let frames: BoxStream<Value> = self.decoder.decode(bytes);
        let frames = match self.fan_out {
            Some(op) => op.apply(frames),
            None => frames,
        };
        let selections = self.selector.select(frames);
        let resolved = accumulate::ToolCallAccumulator::new().apply(selections);
        event_map::EventMapper::new().map(resolved)
    }
}
